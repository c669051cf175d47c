//! Byte-level helpers for decoders that only stream forward over their input.
//!
//! The VDI decoder never seeks — it discards bytes it doesn't need and pads
//! the output with zeros for sparse regions. These two helpers are shared by
//! every decoder that needs that behavior.

use std::io::{self, Read, Write};

/// Size of the scratch buffer used by [`skip`] and [`write_zeros`].
const CHUNK: usize = 64 * 1024;

/// Discards exactly `n` bytes from `r`, reading in [`CHUNK`]-sized pieces.
///
/// Returns an `UnexpectedEof` error if `r` is exhausted before `n` bytes have
/// been discarded.
pub fn skip<R: Read + ?Sized>(r: &mut R, mut n: u64) -> io::Result<()> {
    let mut buf = [0u8; CHUNK];
    while n > 0 {
        let want = n.min(CHUNK as u64) as usize;
        r.read_exact(&mut buf[..want])?;
        n -= want as u64;
    }
    Ok(())
}

/// Writes exactly `n` zero bytes to `w`.
pub fn write_zeros<W: Write + ?Sized>(w: &mut W, mut n: u64) -> io::Result<()> {
    let buf = [0u8; CHUNK];
    while n > 0 {
        let want = n.min(CHUNK as u64) as usize;
        w.write_all(&buf[..want])?;
        n -= want as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn skip_consumes_exact_count() {
        let data = (0u8..=255).collect::<Vec<_>>();
        let mut cur = Cursor::new(data);
        skip(&mut cur, 10).unwrap();
        let mut rest = Vec::new();
        cur.read_to_end(&mut rest).unwrap();
        assert_eq!(rest[0], 10);
        assert_eq!(rest.len(), 246);
    }

    #[test]
    fn skip_past_eof_errors() {
        let mut cur = Cursor::new(vec![0u8; 4]);
        assert!(skip(&mut cur, 100).is_err());
    }

    #[test]
    fn write_zeros_produces_exact_count() {
        let mut out = Vec::new();
        write_zeros(&mut out, 12345).unwrap();
        assert_eq!(out.len(), 12345);
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn write_zeros_spans_multiple_chunks() {
        let mut out = Vec::new();
        write_zeros(&mut out, (CHUNK as u64) * 2 + 7).unwrap();
        assert_eq!(out.len(), CHUNK * 2 + 7);
    }
}
