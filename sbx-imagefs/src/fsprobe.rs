//! Classifies a partition's filesystem by fixed-offset magic bytes.

use std::io::{Read, Seek, SeekFrom};

use crate::error::Result;

/// Number of bytes read from the start of a partition to probe it.
const PROBE_LEN: usize = 4096;

/// A filesystem kind this core knows how to materialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsKind {
    /// Fourth extended filesystem.
    Ext4,
    /// FAT32.
    Fat32,
    /// exFAT.
    ExFat,
    /// NTFS.
    Ntfs,
    /// No recognized filesystem.
    Unknown,
}

impl FsKind {
    /// Short lowercase name used in scratch-directory names and log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ext4 => "ext4",
            Self::Fat32 => "fat32",
            Self::ExFat => "exfat",
            Self::Ntfs => "ntfs",
            Self::Unknown => "unknown",
        }
    }
}

/// Reads the first [`PROBE_LEN`] bytes at `base_offset` in `r` and classifies
/// the filesystem by magic bytes at fixed offsets.
pub fn probe<R: Read + Seek>(r: &mut R, base_offset: u64) -> Result<FsKind> {
    r.seek(SeekFrom::Start(base_offset))?;
    let mut buf = [0u8; PROBE_LEN];
    let n = read_best_effort(r, &mut buf)?;
    Ok(classify(&buf[..n]))
}

/// Reads up to `buf.len()` bytes, tolerating a short final partition.
fn read_best_effort<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    loop {
        match r.read(&mut buf[total..]) {
            Ok(0) => return Ok(total),
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
        if total == buf.len() {
            return Ok(total);
        }
    }
}

/// Classifies a buffer already read from the start of a partition.
pub fn classify(buf: &[u8]) -> FsKind {
    if buf.len() >= 0x438 + 2 && u16::from_le_bytes([buf[0x438], buf[0x438 + 1]]) == 0xEF53 {
        return FsKind::Ext4;
    }
    if buf.len() >= 11 && &buf[3..11] == b"NTFS    " {
        return FsKind::Ntfs;
    }
    if buf.len() >= 0x52 + 8 && &buf[0x52..0x52 + 8] == b"FAT32   " {
        return FsKind::Fat32;
    }
    if buf.len() >= 11 && &buf[3..11] == b"EXFAT   " {
        return FsKind::ExFat;
    }
    FsKind::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf_with(offset: usize, bytes: &[u8]) -> Vec<u8> {
        let mut v = vec![0u8; PROBE_LEN];
        v[offset..offset + bytes.len()].copy_from_slice(bytes);
        v
    }

    #[test]
    fn detects_ext4() {
        let buf = buf_with(0x438, &0xEF53u16.to_le_bytes());
        assert_eq!(classify(&buf), FsKind::Ext4);
    }

    #[test]
    fn detects_ntfs() {
        let buf = buf_with(3, b"NTFS    ");
        assert_eq!(classify(&buf), FsKind::Ntfs);
    }

    #[test]
    fn detects_fat32() {
        let buf = buf_with(0x52, b"FAT32   ");
        assert_eq!(classify(&buf), FsKind::Fat32);
    }

    #[test]
    fn detects_exfat() {
        let buf = buf_with(3, b"EXFAT   ");
        assert_eq!(classify(&buf), FsKind::ExFat);
    }

    #[test]
    fn unknown_for_garbage() {
        let buf = vec![0u8; PROBE_LEN];
        assert_eq!(classify(&buf), FsKind::Unknown);
    }

    #[test]
    fn ext4_checked_before_others() {
        // ext4 magic at 0x438 should win even if an NTFS-looking tag also appears.
        let mut buf = buf_with(0x438, &0xEF53u16.to_le_bytes());
        buf[3..11].copy_from_slice(b"NTFS    ");
        assert_eq!(classify(&buf), FsKind::Ext4);
    }
}
