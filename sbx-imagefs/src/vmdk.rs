//! VMDK → raw streaming conversion.
//!
//! Two on-disk layouts are supported, matching what hypervisors actually
//! produce: monolithic-sparse (a two-level grain directory/table pointing at
//! fixed-size grains) and stream-optimized (a linear sequence of
//! deflate-compressed grain markers, as produced by `ovftool`/`vmware-vdiskmanager`
//! for OVA export). Both require random access to the backing file, unlike
//! VDI's forward-only layout — see `vdi.rs`.

use std::io::{Read, Seek, SeekFrom, Write};

use flate2::read::ZlibDecoder;

use crate::error::{Error, Result};
use crate::stream::write_zeros;

const SPARSE_MAGIC: u32 = 0x564d_444b; // "KDMV" little-endian
const SECTOR: u64 = 512;

/// Grain table entries with these values mean "unallocated" / "all zero".
const GRAIN_UNALLOCATED: u64 = 0;

/// Marker types in the stream-optimized format (VMDK spec §5).
const MARKER_EOS: u64 = 0;
const MARKER_GRAIN_TABLE: u64 = 1;
const MARKER_GRAIN_DIRECTORY: u64 = 2;
const MARKER_FOOTER: u64 = 3;

struct SparseHeader {
    capacity_sectors: u64,
    grain_size_sectors: u64,
    descriptor_offset: u64,
    descriptor_size: u64,
    num_gtes_per_gt: u32,
    rgd_offset: u64,
    gd_offset: u64,
    flags: u32,
}

const FLAG_COMPRESSED: u32 = 1 << 16;

/// Converts a VMDK image into raw bytes.
///
/// Dispatches between monolithic-sparse and stream-optimized based on the
/// `COMPRESSED` header flag (VMDK spec), since both share the same magic and
/// header shape.
pub fn convert_vmdk_to_raw<R: Read + Seek, W: Write>(mut input: R, mut output: W) -> Result<()> {
    let header = read_header(&mut input)?;
    if header.flags & FLAG_COMPRESSED != 0 {
        convert_stream_optimized(&mut input, &mut output, &header)
    } else {
        convert_monolithic_sparse(&mut input, &mut output, &header)
    }
}

fn read_header<R: Read + Seek>(input: &mut R) -> Result<SparseHeader> {
    input.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; 512];
    input.read_exact(&mut buf)?;

    let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    if magic != SPARSE_MAGIC {
        return Err(Error::format("vmdk", "bad sparse extent magic"));
    }

    let flags = u32::from_le_bytes(buf[12..16].try_into().unwrap());
    let capacity_sectors = u64::from_le_bytes(buf[16..24].try_into().unwrap());
    let grain_size_sectors = u64::from_le_bytes(buf[24..32].try_into().unwrap());
    let descriptor_offset = u64::from_le_bytes(buf[32..40].try_into().unwrap());
    let descriptor_size = u64::from_le_bytes(buf[40..48].try_into().unwrap());
    let num_gtes_per_gt = u32::from_le_bytes(buf[48..52].try_into().unwrap());
    let rgd_offset = u64::from_le_bytes(buf[52..60].try_into().unwrap());
    let gd_offset = u64::from_le_bytes(buf[60..68].try_into().unwrap());

    if grain_size_sectors == 0 {
        return Err(Error::format("vmdk", "zero grain size"));
    }

    Ok(SparseHeader {
        capacity_sectors,
        grain_size_sectors,
        descriptor_offset,
        descriptor_size,
        num_gtes_per_gt,
        rgd_offset,
        gd_offset,
        flags,
    })
}

/// Walks the (possibly two-level) grain directory/table and writes each
/// grain — or a run of zeros for unallocated grains — to `output` in logical
/// order.
fn convert_monolithic_sparse<R: Read + Seek, W: Write>(
    input: &mut R,
    output: &mut W,
    header: &SparseHeader,
) -> Result<()> {
    let gd_offset = if header.gd_offset != 0 && header.gd_offset != u64::MAX {
        header.gd_offset
    } else {
        header.rgd_offset
    };
    if gd_offset == 0 {
        return Err(Error::unsupported("vmdk", "no usable grain directory"));
    }

    let grain_size = header.grain_size_sectors * SECTOR;
    let num_gts = header.num_gtes_per_gt as u64;
    let total_grains = header.capacity_sectors.div_ceil(header.grain_size_sectors);
    let num_gt_entries_needed = total_grains;
    let num_gds = num_gt_entries_needed.div_ceil(num_gts);

    input.seek(SeekFrom::Start(gd_offset * SECTOR))?;
    let mut gd = vec![0u32; num_gds as usize];
    for slot in gd.iter_mut() {
        let mut raw = [0u8; 4];
        input.read_exact(&mut raw)?;
        *slot = u32::from_le_bytes(raw);
    }

    let mut capacity_remaining = header.capacity_sectors * SECTOR;
    let mut grain_index = 0u64;

    for &gt_sector in &gd {
        if capacity_remaining == 0 {
            break;
        }
        let mut gt = vec![0u32; num_gts as usize];
        if gt_sector != 0 {
            input.seek(SeekFrom::Start(u64::from(gt_sector) * SECTOR))?;
            for slot in gt.iter_mut() {
                let mut raw = [0u8; 4];
                input.read_exact(&mut raw)?;
                *slot = u32::from_le_bytes(raw);
            }
        }

        for &gte in &gt {
            if capacity_remaining == 0 {
                break;
            }
            let this_grain_size = grain_size.min(capacity_remaining);
            if gte as u64 == GRAIN_UNALLOCATED {
                write_zeros(output, this_grain_size)?;
            } else {
                input.seek(SeekFrom::Start(u64::from(gte) * SECTOR))?;
                let mut buf = vec![0u8; this_grain_size as usize];
                input.read_exact(&mut buf)?;
                output.write_all(&buf)?;
            }
            capacity_remaining -= this_grain_size;
            grain_index += 1;
        }
    }
    let _ = grain_index;
    let _ = header.descriptor_offset;
    let _ = header.descriptor_size;
    Ok(())
}

/// Decodes a stream-optimized extent: a flat sequence of markers, each
/// either a compressed grain or a structural marker (grain table, grain
/// directory, footer, end-of-stream) to be skipped.
fn convert_stream_optimized<R: Read + Seek, W: Write>(
    input: &mut R,
    output: &mut W,
    header: &SparseHeader,
) -> Result<()> {
    let grain_size = header.grain_size_sectors * SECTOR;
    let total_size = header.capacity_sectors * SECTOR;

    // Grains can arrive out of order or with gaps; buffer logical offset ->
    // bytes, then flush in order. Stream-optimized images are expected to be
    // modest enough in practice for this to be acceptable.
    let mut grains: std::collections::BTreeMap<u64, Vec<u8>> = std::collections::BTreeMap::new();

    input.seek(SeekFrom::Start(grain_directory_start(header)))?;
    loop {
        let mut marker_hdr = [0u8; 12];
        match input.read_exact(&mut marker_hdr) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let value = u64::from_le_bytes(marker_hdr[0..8].try_into().unwrap());
        let size = u32::from_le_bytes(marker_hdr[8..12].try_into().unwrap());

        if size == 0 {
            // Structural marker: `value` field encodes the marker type.
            match value {
                MARKER_EOS => break,
                MARKER_GRAIN_TABLE | MARKER_GRAIN_DIRECTORY => {
                    skip_sectors(input, 1)?;
                }
                MARKER_FOOTER => {
                    skip_sectors(input, 1)?;
                }
                _ => {
                    // Unknown zero-size marker: stop rather than misparse.
                    break;
                }
            }
            continue;
        }

        // Grain marker: `value` is the starting logical sector number.
        let mut compressed = vec![0u8; size as usize];
        input.read_exact(&mut compressed)?;
        // Entries are padded to a multiple of the sector size.
        let padded = (size as u64).div_ceil(SECTOR) * SECTOR;
        skip_bytes(input, padded - size as u64)?;

        let mut decoder = ZlibDecoder::new(&compressed[..]);
        let mut plain = Vec::with_capacity(grain_size as usize);
        decoder
            .read_to_end(&mut plain)
            .map_err(|e| Error::Crypto(format!("grain inflate failed: {e}")))?;

        grains.insert(value * SECTOR, plain);
    }

    let mut cursor = 0u64;
    for (offset, data) in grains {
        if offset > cursor {
            write_zeros(output, offset - cursor)?;
            cursor = offset;
        }
        let take = data.len().min((total_size - cursor) as usize);
        output.write_all(&data[..take])?;
        cursor += take as u64;
    }
    if cursor < total_size {
        write_zeros(output, total_size - cursor)?;
    }
    Ok(())
}

fn grain_directory_start(header: &SparseHeader) -> u64 {
    // Streaming grain data begins right after the 512-byte header in this
    // layout; descriptor text (if any) is embedded inline in data streams
    // produced by the common exporters this core targets.
    let _ = header;
    SECTOR
}

fn skip_sectors<R: Read>(r: &mut R, sectors: u64) -> Result<()> {
    skip_bytes(r, sectors * SECTOR)
}

fn skip_bytes<R: Read>(r: &mut R, n: u64) -> Result<()> {
    crate::stream::skip(r, n).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn build_sparse_header(
        capacity_sectors: u64,
        grain_size_sectors: u64,
        gd_offset_sectors: u64,
        flags: u32,
    ) -> Vec<u8> {
        let mut buf = vec![0u8; 512];
        buf[0..4].copy_from_slice(&SPARSE_MAGIC.to_le_bytes());
        buf[12..16].copy_from_slice(&flags.to_le_bytes());
        buf[16..24].copy_from_slice(&capacity_sectors.to_le_bytes());
        buf[24..32].copy_from_slice(&grain_size_sectors.to_le_bytes());
        buf[48..52].copy_from_slice(&512u32.to_le_bytes()); // num_gtes_per_gt
        buf[60..68].copy_from_slice(&gd_offset_sectors.to_le_bytes());
        buf
    }

    #[test]
    fn bad_magic_errors() {
        let buf = vec![0u8; 512];
        let mut out = Vec::new();
        let err = convert_vmdk_to_raw(Cursor::new(buf), &mut out).unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }

    #[test]
    fn monolithic_sparse_single_allocated_grain() {
        let grain_size_sectors = 1u64; // 512 bytes/grain for test simplicity
        let capacity_sectors = 1u64;
        let gd_sector = 2u64;
        let gt_sector = 3u64;
        let grain_sector = 4u64;

        let mut image = build_sparse_header(capacity_sectors, grain_size_sectors, gd_sector, 0);
        image.resize(512 * 5, 0);

        // grain directory: one entry pointing at the grain table
        image[(gd_sector * SECTOR) as usize..(gd_sector * SECTOR) as usize + 4]
            .copy_from_slice(&(gt_sector as u32).to_le_bytes());
        // grain table: one entry pointing at the grain
        image[(gt_sector * SECTOR) as usize..(gt_sector * SECTOR) as usize + 4]
            .copy_from_slice(&(grain_sector as u32).to_le_bytes());
        // grain payload
        let payload = vec![0xABu8; 512];
        image[(grain_sector * SECTOR) as usize..(grain_sector * SECTOR) as usize + 512]
            .copy_from_slice(&payload);

        let mut out = Vec::new();
        convert_vmdk_to_raw(Cursor::new(image), &mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn monolithic_sparse_unallocated_grain_is_zero() {
        let image = build_sparse_header(1, 1, 2, 0);
        let mut image = image;
        image.resize(512 * 3, 0); // grain directory entry stays zero => unallocated

        let mut out = Vec::new();
        convert_vmdk_to_raw(Cursor::new(image), &mut out).unwrap();
        assert_eq!(out, vec![0u8; 512]);
    }
}
