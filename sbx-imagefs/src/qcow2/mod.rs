//! QCOW2 → raw streaming conversion, including LUKS1 and legacy AES-CBC
//! encrypted images.
//!
//! Clusters are addressed through a two-level L1/L2 table, exactly as QEMU
//! lays them out; each L2 entry may point at a standard data cluster, a
//! deflate-compressed cluster (bit 62), or be marked all-zero. Refcount
//! tables are read only far enough to confirm they exist — this core trusts
//! the L1/L2 chain and does not attempt corruption repair.

pub mod cipher;
pub mod header;
pub mod legacy;
pub mod luks;

use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use flate2::read::ZlibDecoder;

use crate::error::{Error, Result};
use header::{Header, CRYPT_AES, CRYPT_LUKS, CRYPT_NONE};

const L2_COMPRESSED_BIT: u64 = 1 << 62;
const L2_ZERO_BIT: u64 = 1 << 63;
const OFFSET_MASK: u64 = (1 << 56) - 1;

/// Decryption context resolved once up front, then applied per-sector while
/// walking clusters.
enum Decryptor {
    None,
    Legacy { key: [u8; 16] },
    Luks { header: luks::Luks1Header, master_key: Vec<u8> },
}

/// Converts a QCOW2 image into raw bytes, decrypting along the way if
/// `password` is supplied and the image requires one.
pub fn convert_qcow2_to_raw<R: Read + Seek, W: Write>(
    mut input: R,
    mut output: W,
    password: Option<&str>,
) -> Result<()> {
    input.seek(SeekFrom::Start(0))?;
    let header = header::read_header(&mut input)?;

    if header.backing_file_offset != 0 {
        return Err(Error::unsupported(
            "qcow2",
            "backing-file chains are not followed; convert the base image separately",
        ));
    }

    let decryptor = resolve_decryptor(&mut input, &header, password)?;

    let cluster_size = header.cluster_size();
    let l2_entries_per_cluster = cluster_size / 8;
    let total_clusters = header.size.div_ceil(cluster_size);

    input.seek(SeekFrom::Start(header.l1_table_offset))?;
    let mut l1 = vec![0u64; header.l1_size as usize];
    for slot in l1.iter_mut() {
        let mut raw = [0u8; 8];
        input.read_exact(&mut raw)?;
        *slot = u64::from_be_bytes(raw);
    }

    let mut written_clusters = 0u64;
    'outer: for &l1_entry in &l1 {
        let l2_offset = l1_entry & OFFSET_MASK;
        let mut l2 = vec![0u64; l2_entries_per_cluster as usize];
        if l2_offset != 0 {
            input.seek(SeekFrom::Start(l2_offset))?;
            for slot in l2.iter_mut() {
                let mut raw = [0u8; 8];
                input.read_exact(&mut raw)?;
                *slot = u64::from_be_bytes(raw);
            }
        }

        for &l2_entry in &l2 {
            if written_clusters >= total_clusters {
                break 'outer;
            }
            let logical_offset = written_clusters * cluster_size;
            let this_size = cluster_size.min(header.size - logical_offset);

            let plain = read_cluster(&mut input, l2_entry, cluster_size, this_size as usize)?;
            let mut plain = plain;
            decrypt_cluster(&decryptor, logical_offset, &mut plain)?;
            output.write_all(&plain)?;
            written_clusters += 1;
        }
    }

    Ok(())
}

/// Reads and (if needed) decompresses one cluster's worth of plaintext bytes
/// (still encrypted, if applicable — decryption happens afterward since the
/// cipher operates on plaintext cluster offsets, not compressed bytes).
fn read_cluster<R: Read + Seek>(
    input: &mut R,
    l2_entry: u64,
    cluster_size: u64,
    want: usize,
) -> Result<Vec<u8>> {
    if l2_entry & L2_ZERO_BIT != 0 || l2_entry == 0 {
        return Ok(vec![0u8; want]);
    }

    if l2_entry & L2_COMPRESSED_BIT != 0 {
        // Compressed cluster descriptor: the low `offset_bits` bits hold a
        // byte offset into the file; the 8 bits above that hold
        // `nb_sectors - 1` (512-byte sectors of compressed data).
        let cluster_bits = cluster_size.trailing_zeros() as u64;
        let offset_bits = 62 - (cluster_bits - 8);
        let offset_mask = (1u64 << offset_bits) - 1;
        let file_offset = l2_entry & offset_mask;
        let compressed_sectors = ((l2_entry >> offset_bits) & 0xff) + 1;
        let compressed_len = compressed_sectors * 512;

        input.seek(SeekFrom::Start(file_offset))?;
        let mut compressed = vec![0u8; compressed_len as usize];
        input.read_exact(&mut compressed)?;

        let mut decoder = ZlibDecoder::new(&compressed[..]);
        let mut plain = vec![0u8; cluster_size as usize];
        let n = decoder
            .read(&mut plain)
            .map_err(|e| Error::Crypto(format!("cluster inflate failed: {e}")))?;
        plain.truncate(n.max(want));
        plain.resize(want, 0);
        return Ok(plain);
    }

    let offset = l2_entry & OFFSET_MASK;
    input.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; want];
    input.read_exact(&mut buf)?;
    Ok(buf)
}

fn resolve_decryptor<R: Read + Seek>(
    input: &mut R,
    header: &Header,
    password: Option<&str>,
) -> Result<Decryptor> {
    match header.crypt_method {
        CRYPT_NONE => Ok(Decryptor::None),
        CRYPT_AES => {
            let password = password
                .ok_or_else(|| Error::Crypto("image requires a password (legacy AES)".into()))?;
            Ok(Decryptor::Legacy {
                key: legacy::derive_key(password),
            })
        }
        CRYPT_LUKS => {
            let password = password
                .ok_or_else(|| Error::Crypto("image requires a password (LUKS1)".into()))?;
            let (ext_offset, ext_length) = header.luks_header_extension.ok_or_else(|| {
                Error::format("qcow2", "crypt_method is LUKS but no LUKS header extension is present")
            })?;

            input.seek(SeekFrom::Start(ext_offset))?;
            let mut luks_buf = vec![0u8; ext_length as usize];
            input.read_exact(&mut luks_buf)?;
            let luks_header = luks::parse_header(&luks_buf)?;

            let master_key = luks::unlock_master_key(&luks_header, password.as_bytes(), |sector, len| {
                let mut buf = vec![0u8; len];
                let mut r = Cursor::new(&luks_buf[..]);
                r.seek(SeekFrom::Start(sector * 512))?;
                r.read_exact(&mut buf)?;
                Ok(buf)
            })?;

            Ok(Decryptor::Luks {
                header: luks_header,
                master_key,
            })
        }
        other => Err(Error::unsupported("qcow2", format!("crypt_method {other}"))),
    }
}

/// Decrypts `plain` (which may still be ciphertext despite the name) in
/// 512-byte sectors starting at `logical_offset` within the virtual disk.
fn decrypt_cluster(decryptor: &Decryptor, logical_offset: u64, data: &mut [u8]) -> Result<()> {
    match decryptor {
        Decryptor::None => Ok(()),
        Decryptor::Legacy { key } => {
            let start_sector = logical_offset / 512;
            for (i, chunk) in data.chunks_mut(512).enumerate() {
                legacy::decrypt_sector(key, start_sector + i as u64, chunk)?;
            }
            Ok(())
        }
        Decryptor::Luks { header, master_key } => {
            let start_sector = logical_offset / 512;
            for (i, chunk) in data.chunks_mut(512).enumerate() {
                luks::decrypt_payload_sector(header, master_key, start_sector + i as u64, chunk)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn be32(v: u32) -> [u8; 4] {
        v.to_be_bytes()
    }
    fn be64(v: u64) -> [u8; 8] {
        v.to_be_bytes()
    }

    /// Builds a minimal unencrypted v3 QCOW2 image with one allocated
    /// cluster containing a known byte pattern.
    fn build_image(cluster_bits: u32, payload: &[u8]) -> Vec<u8> {
        let cluster_size = 1u64 << cluster_bits;
        let mut buf = vec![0u8; 104];
        buf[0..4].copy_from_slice(&be32(header::MAGIC));
        buf[4..8].copy_from_slice(&be32(3));
        buf[20..24].copy_from_slice(&be32(cluster_bits));
        buf[24..32].copy_from_slice(&be64(cluster_size));
        buf[36..40].copy_from_slice(&be32(1)); // l1_size
        let l1_offset = cluster_size;
        buf[40..48].copy_from_slice(&be64(l1_offset));
        buf[96..100].copy_from_slice(&be32(4));
        buf[100..104].copy_from_slice(&be32(104));
        buf.extend_from_slice(&[0u8; 8]); // end-of-extensions

        buf.resize(l1_offset as usize, 0);
        let l2_offset = l1_offset + cluster_size;
        buf.extend_from_slice(&be64(l2_offset));
        buf.resize(l2_offset as usize, 0);

        let data_offset = l2_offset + cluster_size;
        buf.extend_from_slice(&be64(data_offset));
        buf.resize(data_offset as usize, 0);

        let mut data_cluster = vec![0u8; cluster_size as usize];
        data_cluster[..payload.len()].copy_from_slice(payload);
        buf.extend_from_slice(&data_cluster);
        buf
    }

    #[test]
    fn converts_single_cluster_image() {
        let payload = b"hello qcow2 world";
        let image = build_image(16, payload);
        let mut out = Vec::new();
        convert_qcow2_to_raw(Cursor::new(image), &mut out, None).unwrap();
        assert_eq!(&out[..payload.len()], payload);
        assert_eq!(out.len(), 1 << 16);
    }

    #[test]
    fn backing_file_is_rejected() {
        let mut image = build_image(16, b"x");
        image[8..16].copy_from_slice(&be64(1));
        let mut out = Vec::new();
        let err = convert_qcow2_to_raw(Cursor::new(image), &mut out, None).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFeature { .. }));
    }

    #[test]
    fn converts_compressed_cluster_image() {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write as _;

        let cluster_bits = 16u32;
        let cluster_size = 1u64 << cluster_bits;
        let payload = vec![0x42u8; cluster_size as usize];

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut buf = vec![0u8; 104];
        buf[0..4].copy_from_slice(&be32(header::MAGIC));
        buf[4..8].copy_from_slice(&be32(3));
        buf[20..24].copy_from_slice(&be32(cluster_bits));
        buf[24..32].copy_from_slice(&be64(cluster_size));
        buf[36..40].copy_from_slice(&be32(1)); // l1_size
        let l1_offset = cluster_size;
        buf[40..48].copy_from_slice(&be64(l1_offset));
        buf[96..100].copy_from_slice(&be32(4));
        buf[100..104].copy_from_slice(&be32(104));
        buf.extend_from_slice(&[0u8; 8]); // end-of-extensions

        buf.resize(l1_offset as usize, 0);
        let l2_offset = l1_offset + cluster_size;
        buf.extend_from_slice(&be64(l2_offset));
        buf.resize(l2_offset as usize, 0);

        let compressed_offset = l2_offset + cluster_size;
        let compressed_sectors = compressed.len().div_ceil(512) as u64;
        let offset_bits = 62 - (u64::from(cluster_bits) - 8);
        let l2_entry =
            L2_COMPRESSED_BIT | compressed_offset | ((compressed_sectors - 1) << offset_bits);
        buf.extend_from_slice(&be64(l2_entry));
        buf.resize(compressed_offset as usize, 0);
        buf.extend_from_slice(&compressed);
        buf.resize(compressed_offset as usize + (compressed_sectors * 512) as usize, 0);

        let mut out = Vec::new();
        convert_qcow2_to_raw(Cursor::new(buf), &mut out, None).unwrap();
        assert_eq!(out, payload);
    }
}
