//! Minimal MBR/GPT partition table reader.
//!
//! The full partition-table plugin lives outside this core; this is just
//! enough of a reader to drive the orchestrator end to end without it.
//! No corruption repair: a malformed table simply yields fewer partitions.

use std::io::{Read, Seek, SeekFrom};

use crate::error::Result;

/// Sector size assumed throughout (the only size this core supports).
const SECTOR: u64 = 512;

/// One partition found inside a raw disk image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    /// Byte offset of the partition's first sector within the raw image.
    pub start_bytes: u64,
    /// Size of the partition in bytes.
    pub size_bytes: u64,
    /// 1-based index, in discovery order.
    pub index: u32,
}

/// Reads the partition table of a raw disk image, trying GPT first and
/// falling back to MBR.
pub fn read_partitions<R: Read + Seek>(r: &mut R) -> Result<Vec<Partition>> {
    if let Some(parts) = read_gpt(r)? {
        if !parts.is_empty() {
            return Ok(parts);
        }
    }
    read_mbr(r)
}

/// Reads a protective-MBR + GPT partition table. Returns `None` when no GPT
/// signature is present (caller should fall back to plain MBR).
fn read_gpt<R: Read + Seek>(r: &mut R) -> Result<Option<Vec<Partition>>> {
    r.seek(SeekFrom::Start(0))?;
    let mut mbr = [0u8; SECTOR as usize];
    if r.read(&mut mbr)? < SECTOR as usize {
        return Ok(None);
    }
    if mbr[510] != 0x55 || mbr[511] != 0xAA {
        return Ok(None);
    }
    // Protective MBR: a single entry of type 0xEE.
    let has_protective = (0..4).any(|i| mbr[446 + i * 16 + 4] == 0xEE);
    if !has_protective {
        return Ok(None);
    }

    r.seek(SeekFrom::Start(SECTOR))?;
    let mut hdr = [0u8; 92];
    r.read_exact(&mut hdr)?;
    if &hdr[0..8] != b"EFI PART" {
        return Ok(None);
    }
    let entry_lba = u64::from_le_bytes(hdr[72..80].try_into().unwrap());
    let entry_count = u32::from_le_bytes(hdr[80..84].try_into().unwrap());
    let entry_size = u32::from_le_bytes(hdr[84..88].try_into().unwrap()) as u64;

    r.seek(SeekFrom::Start(entry_lba * SECTOR))?;
    let mut parts = Vec::new();
    let mut index = 1u32;
    for _ in 0..entry_count {
        let mut entry = vec![0u8; entry_size as usize];
        r.read_exact(&mut entry)?;
        let type_guid = &entry[0..16];
        if type_guid.iter().all(|&b| b == 0) {
            continue;
        }
        let first_lba = u64::from_le_bytes(entry[32..40].try_into().unwrap());
        let last_lba = u64::from_le_bytes(entry[40..48].try_into().unwrap());
        if last_lba < first_lba {
            continue;
        }
        parts.push(Partition {
            start_bytes: first_lba * SECTOR,
            size_bytes: (last_lba - first_lba + 1) * SECTOR,
            index,
        });
        index += 1;
    }
    Ok(Some(parts))
}

/// Reads a classic MBR partition table, following the extended-partition
/// linked list for logical partitions.
fn read_mbr<R: Read + Seek>(r: &mut R) -> Result<Vec<Partition>> {
    r.seek(SeekFrom::Start(0))?;
    let mut sector = [0u8; SECTOR as usize];
    if r.read(&mut sector)? < SECTOR as usize || sector[510] != 0x55 || sector[511] != 0xAA {
        return Ok(Vec::new());
    }

    let mut parts = Vec::new();
    let mut index = 1u32;
    let mut extended_start: Option<u64> = None;

    for i in 0..4 {
        let entry = &sector[446 + i * 16..446 + i * 16 + 16];
        let ptype = entry[4];
        if ptype == 0 {
            continue;
        }
        let start_lba = u32::from_le_bytes(entry[8..12].try_into().unwrap()) as u64;
        let num_sectors = u32::from_le_bytes(entry[12..16].try_into().unwrap()) as u64;
        if ptype == 0x05 || ptype == 0x0F {
            extended_start = Some(start_lba);
            continue;
        }
        if num_sectors == 0 {
            continue;
        }
        parts.push(Partition {
            start_bytes: start_lba * SECTOR,
            size_bytes: num_sectors * SECTOR,
            index,
        });
        index += 1;
    }

    if let Some(ebr_base) = extended_start {
        read_extended_chain(r, ebr_base, ebr_base, &mut parts, &mut index)?;
    }

    Ok(parts)
}

/// Walks the linked list of logical partitions inside an extended partition.
fn read_extended_chain<R: Read + Seek>(
    r: &mut R,
    ebr_base: u64,
    ebr_lba: u64,
    parts: &mut Vec<Partition>,
    index: &mut u32,
) -> Result<()> {
    // Defensive bound: extended partition chains are not expected to nest
    // more than a few hundred deep on any real disk.
    const MAX_CHAIN: usize = 10_000;
    let mut lba = ebr_lba;
    for _ in 0..MAX_CHAIN {
        r.seek(SeekFrom::Start(lba * SECTOR))?;
        let mut sector = [0u8; SECTOR as usize];
        if r.read(&mut sector)? < SECTOR as usize || sector[510] != 0x55 || sector[511] != 0xAA {
            return Ok(());
        }
        let first = &sector[446..446 + 16];
        let second = &sector[462..462 + 16];

        if first[4] != 0 {
            let start_lba = u32::from_le_bytes(first[8..12].try_into().unwrap()) as u64;
            let num_sectors = u32::from_le_bytes(first[12..16].try_into().unwrap()) as u64;
            if num_sectors > 0 {
                parts.push(Partition {
                    start_bytes: (lba + start_lba) * SECTOR,
                    size_bytes: num_sectors * SECTOR,
                    index: *index,
                });
                *index += 1;
            }
        }

        let next_type = second[4];
        if next_type != 0x05 && next_type != 0x0F {
            return Ok(());
        }
        let next_start = u32::from_le_bytes(second[8..12].try_into().unwrap()) as u64;
        if next_start == 0 {
            return Ok(());
        }
        lba = ebr_base + next_start;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn mbr_entry(ptype: u8, start_lba: u32, sectors: u32) -> [u8; 16] {
        let mut e = [0u8; 16];
        e[4] = ptype;
        e[8..12].copy_from_slice(&start_lba.to_le_bytes());
        e[12..16].copy_from_slice(&sectors.to_le_bytes());
        e
    }

    #[test]
    fn reads_single_primary_partition() {
        let mut sector = [0u8; 512];
        sector[446..462].copy_from_slice(&mbr_entry(0x83, 2048, 204800));
        sector[510] = 0x55;
        sector[511] = 0xAA;
        let mut disk = sector.to_vec();
        disk.resize(512 * 206_848, 0);

        let mut cur = Cursor::new(disk);
        let parts = read_partitions(&mut cur).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].index, 1);
        assert_eq!(parts[0].start_bytes, 2048 * 512);
        assert_eq!(parts[0].size_bytes, 204800 * 512);
    }

    #[test]
    fn no_signature_yields_empty() {
        let disk = vec![0u8; 1024];
        let mut cur = Cursor::new(disk);
        assert!(read_partitions(&mut cur).unwrap().is_empty());
    }

    #[test]
    fn empty_entries_are_skipped() {
        let mut sector = [0u8; 512];
        sector[446..462].copy_from_slice(&mbr_entry(0x83, 63, 1000));
        // entries 1..4 are all zero
        sector[510] = 0x55;
        sector[511] = 0xAA;
        let mut disk = sector.to_vec();
        disk.resize(512 * 1100, 0);

        let mut cur = Cursor::new(disk);
        let parts = read_partitions(&mut cur).unwrap();
        assert_eq!(parts.len(), 1);
    }
}
