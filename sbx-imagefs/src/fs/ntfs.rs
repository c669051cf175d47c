//! NTFS materialization via the `ntfs` crate.
//!
//! NTFS reserves a family of metadata files with `$`-prefixed names
//! (`$MFT`, `$LogFile`, `$Bitmap`, ...) at the volume root; these are
//! filtered out in addition to the usual [`super::SKIP_NAMES`].

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use ntfs::{Ntfs, NtfsReadSeek};

use crate::error::Result;

/// Thin offsetting wrapper so the `ntfs` crate sees the partition start as
/// byte 0, matching the pattern used for FAT32's `PartitionSlice`.
struct PartitionSource<'a, R> {
    inner: &'a mut R,
    base: u64,
}

impl<R: Read + Seek> Read for PartitionSource<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Seek> Seek for PartitionSource<'_, R> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let absolute = match pos {
            SeekFrom::Start(p) => SeekFrom::Start(self.base + p),
            other => other,
        };
        let actual = self.inner.seek(absolute)?;
        Ok(actual.saturating_sub(self.base))
    }
}

pub fn materialize<R: Read + Seek>(
    source: &mut R,
    partition_offset: u64,
    scratch_dir: &Path,
) -> Result<()> {
    source.seek(SeekFrom::Start(partition_offset))?;
    let mut fs_source = PartitionSource {
        inner: source,
        base: partition_offset,
    };

    let mut ntfs = Ntfs::new(&mut fs_source)
        .map_err(|e| crate::error::Error::format("ntfs", e.to_string()))?;
    ntfs.read_upcase_table(&mut fs_source)
        .map_err(|e| crate::error::Error::format("ntfs", e.to_string()))?;

    let root = ntfs
        .root_directory(&mut fs_source)
        .map_err(|e| crate::error::Error::format("ntfs", e.to_string()))?;
    copy_dir(&ntfs, &mut fs_source, &root, scratch_dir)
}

fn copy_dir<R: Read + Seek>(
    ntfs: &Ntfs,
    fs_source: &mut PartitionSource<'_, R>,
    dir: &ntfs::NtfsFile<'_>,
    host_dir: &Path,
) -> Result<()> {
    fs::create_dir_all(host_dir)?;
    let index = dir
        .directory_index(fs_source)
        .map_err(|e| crate::error::Error::format("ntfs", e.to_string()))?;
    let mut iter = index.entries();
    while let Some(entry) = iter.next(fs_source) {
        let entry = entry.map_err(|e| crate::error::Error::format("ntfs", e.to_string()))?;
        let file_name = entry
            .key()
            .ok_or_else(|| crate::error::Error::format("ntfs", "missing file name attribute"))?
            .map_err(|e| crate::error::Error::format("ntfs", e.to_string()))?;
        let name = file_name.name().to_string_lossy();
        if super::SKIP_NAMES.contains(&name.as_str()) || name.starts_with('$') {
            continue;
        }

        let file = entry
            .to_file(ntfs, fs_source)
            .map_err(|e| crate::error::Error::format("ntfs", e.to_string()))?;
        let host_child = host_dir.join(&name);

        if file_name.is_directory() {
            copy_dir(ntfs, fs_source, &file, &host_child)?;
        } else {
            let data_item = file
                .data(fs_source, "")
                .ok_or_else(|| crate::error::Error::format("ntfs", "no unnamed data stream"))?
                .map_err(|e| crate::error::Error::format("ntfs", e.to_string()))?;
            let mut data_value = data_item
                .to_attribute()
                .value(fs_source)
                .map_err(|e| crate::error::Error::format("ntfs", e.to_string()))?;
            let mut contents = Vec::new();
            data_value
                .read_to_end(fs_source, &mut contents)
                .map_err(|e| crate::error::Error::format("ntfs", e.to_string()))?;
            fs::write(&host_child, contents)?;
        }
    }
    Ok(())
}
