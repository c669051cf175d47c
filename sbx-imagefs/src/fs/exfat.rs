//! Minimal hand-rolled exFAT reader.
//!
//! No confidently-real, actively-maintained pure-Rust exFAT crate was
//! available to ground this on, unlike FAT32 (`fatfs`) and NTFS (`ntfs`), so
//! this walks the on-disk structures directly: boot sector, FAT cluster
//! chains, and directory entry sets (file + stream-extension + filename
//! entries, per the exFAT specification). Directory entry types not needed
//! for tree materialization (volume label, bitmap, upcase table, volume
//! GUID) are skipped.

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Error, Result};

const ENTRY_TYPE_FILE: u8 = 0x85;
const ENTRY_TYPE_STREAM_EXT: u8 = 0xC0;
const ENTRY_TYPE_FILENAME: u8 = 0xC1;
const ATTR_DIRECTORY: u16 = 0x10;
const FLAG_NO_FAT_CHAIN: u8 = 0x02;
const END_OF_CHAIN: u32 = 0xFFFF_FFFF;
const DIR_ENTRY_SIZE: usize = 32;

struct BootSector {
    fat_offset_sectors: u64,
    cluster_heap_offset_sectors: u64,
    cluster_count: u32,
    first_cluster_of_root: u32,
    bytes_per_sector_shift: u32,
    sectors_per_cluster_shift: u32,
}

impl BootSector {
    fn bytes_per_sector(&self) -> u64 {
        1u64 << self.bytes_per_sector_shift
    }
    fn bytes_per_cluster(&self) -> u64 {
        self.bytes_per_sector() << self.sectors_per_cluster_shift
    }
}

pub fn materialize<R: Read + Seek>(
    source: &mut R,
    partition_offset: u64,
    scratch_dir: &Path,
) -> Result<()> {
    source.seek(SeekFrom::Start(partition_offset))?;
    let mut boot = [0u8; 512];
    source.read_exact(&mut boot)?;
    if &boot[3..11] != b"EXFAT   " {
        return Err(Error::format("exfat", "bad boot sector signature"));
    }
    let bs = BootSector {
        fat_offset_sectors: u32::from_le_bytes(boot[80..84].try_into().unwrap()) as u64,
        cluster_heap_offset_sectors: u32::from_le_bytes(boot[88..92].try_into().unwrap()) as u64,
        cluster_count: u32::from_le_bytes(boot[92..96].try_into().unwrap()),
        first_cluster_of_root: u32::from_le_bytes(boot[96..100].try_into().unwrap()),
        bytes_per_sector_shift: boot[108] as u32,
        sectors_per_cluster_shift: boot[109] as u32,
    };

    let fat_base = partition_offset + bs.fat_offset_sectors * bs.bytes_per_sector();
    let heap_base = partition_offset + bs.cluster_heap_offset_sectors * bs.bytes_per_sector();

    copy_dir(
        source,
        &bs,
        fat_base,
        heap_base,
        bs.first_cluster_of_root,
        true,
        scratch_dir,
    )
}

/// Reads the entire contents of a cluster chain starting at `first_cluster`.
fn read_chain<R: Read + Seek>(
    source: &mut R,
    bs: &BootSector,
    fat_base: u64,
    heap_base: u64,
    first_cluster: u32,
    no_fat_chain: bool,
    valid_data_length: u64,
) -> Result<Vec<u8>> {
    let cluster_size = bs.bytes_per_cluster();
    let mut out = Vec::with_capacity(valid_data_length as usize);
    let mut cluster = first_cluster;

    loop {
        if cluster < 2 || cluster >= bs.cluster_count + 2 {
            break;
        }
        let cluster_offset = heap_base + u64::from(cluster - 2) * cluster_size;
        source.seek(SeekFrom::Start(cluster_offset))?;
        let mut buf = vec![0u8; cluster_size as usize];
        source.read_exact(&mut buf)?;
        out.extend_from_slice(&buf);

        if out.len() as u64 >= valid_data_length {
            break;
        }

        cluster = if no_fat_chain {
            cluster + 1
        } else {
            next_cluster(source, fat_base, cluster)?
        };
        if cluster == END_OF_CHAIN {
            break;
        }
    }
    out.truncate(valid_data_length as usize);
    Ok(out)
}

fn next_cluster<R: Read + Seek>(source: &mut R, fat_base: u64, cluster: u32) -> Result<u32> {
    source.seek(SeekFrom::Start(fat_base + u64::from(cluster) * 4))?;
    let mut raw = [0u8; 4];
    source.read_exact(&mut raw)?;
    Ok(u32::from_le_bytes(raw))
}

/// Materializes a directory's entries into `host_dir`, recursing into
/// subdirectories.
#[allow(clippy::too_many_arguments)]
fn copy_dir<R: Read + Seek>(
    source: &mut R,
    bs: &BootSector,
    fat_base: u64,
    heap_base: u64,
    first_cluster: u32,
    no_fat_chain_hint: bool,
    host_dir: &Path,
) -> Result<()> {
    fs::create_dir_all(host_dir)?;
    // The root directory's length isn't stated in the boot sector; read
    // cluster-by-cluster until a fully-zero entry set terminates the list.
    let cluster_size = bs.bytes_per_cluster();
    let raw = read_chain(
        source,
        bs,
        fat_base,
        heap_base,
        first_cluster,
        no_fat_chain_hint,
        cluster_size * bs.cluster_count as u64, // upper bound; trimmed below
    )?;

    let mut i = 0usize;
    while i + DIR_ENTRY_SIZE <= raw.len() {
        let entry = &raw[i..i + DIR_ENTRY_SIZE];
        let entry_type = entry[0];
        if entry_type == 0 {
            break; // unused entry marks end of allocated directory entries
        }
        if entry_type != ENTRY_TYPE_FILE {
            i += DIR_ENTRY_SIZE;
            continue;
        }

        let secondary_count = entry[1] as usize;
        if i + (1 + secondary_count) * DIR_ENTRY_SIZE > raw.len() {
            break;
        }
        let attributes = u16::from_le_bytes(entry[4..6].try_into().unwrap());

        let stream_entry = &raw[i + DIR_ENTRY_SIZE..i + 2 * DIR_ENTRY_SIZE];
        if stream_entry[0] != ENTRY_TYPE_STREAM_EXT {
            i += (1 + secondary_count) * DIR_ENTRY_SIZE;
            continue;
        }
        let general_flags = stream_entry[1];
        let valid_data_length = u64::from_le_bytes(stream_entry[8..16].try_into().unwrap());
        let first_cluster_of_entry =
            u32::from_le_bytes(stream_entry[20..24].try_into().unwrap());
        let name_length = stream_entry[3] as usize;

        let mut name = String::new();
        let name_entries = secondary_count - 1;
        for n in 0..name_entries {
            let off = i + (2 + n) * DIR_ENTRY_SIZE;
            if off + DIR_ENTRY_SIZE > raw.len() || raw[off] != ENTRY_TYPE_FILENAME {
                break;
            }
            for chunk in raw[off + 2..off + DIR_ENTRY_SIZE].chunks_exact(2) {
                let code_unit = u16::from_le_bytes([chunk[0], chunk[1]]);
                if code_unit == 0 {
                    break;
                }
                if let Some(c) = char::from_u32(code_unit as u32) {
                    name.push(c);
                }
            }
        }
        name.truncate(name_length.min(name.chars().count()));

        if !super::SKIP_NAMES.contains(&name.as_str()) && !name.is_empty() {
            let host_child = host_dir.join(&name);
            let no_fat_chain = general_flags & FLAG_NO_FAT_CHAIN != 0;

            if attributes & ATTR_DIRECTORY != 0 {
                copy_dir(
                    source,
                    bs,
                    fat_base,
                    heap_base,
                    first_cluster_of_entry,
                    no_fat_chain,
                    &host_child,
                )?;
            } else {
                let contents = read_chain(
                    source,
                    bs,
                    fat_base,
                    heap_base,
                    first_cluster_of_entry,
                    no_fat_chain,
                    valid_data_length,
                )?;
                fs::write(&host_child, contents)?;
            }
        }

        i += (1 + secondary_count) * DIR_ENTRY_SIZE;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_signature_errors() {
        let mut buf = std::io::Cursor::new(vec![0u8; 512]);
        let dir = tempfile::tempdir().unwrap();
        let err = materialize(&mut buf, 0, dir.path()).unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }
}
