//! FAT32 materialization via the `fatfs` crate.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use fatfs::{FileSystem, FsOptions};

use crate::error::Result;

/// Offsets an underlying `Read + Seek` source so `fatfs` sees byte 0 at the
/// partition's start. `fatfs` requires `Write` even for read-only use; all
/// writes are rejected since this core never mutates guest filesystems.
struct PartitionSlice<'a, R> {
    inner: &'a mut R,
    base: u64,
    pos: u64,
}

impl<R: Read + Seek> Read for PartitionSlice<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.seek(SeekFrom::Start(self.base + self.pos))?;
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R> Write for PartitionSlice<'_, R> {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<R: Seek> Seek for PartitionSlice<'_, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p,
            SeekFrom::Current(d) => (self.pos as i64 + d) as u64,
            SeekFrom::End(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "seek-from-end unsupported on partition slice",
                ))
            }
        };
        self.pos = new_pos;
        Ok(new_pos)
    }
}

pub fn materialize<R: Read + Seek>(
    source: &mut R,
    partition_offset: u64,
    scratch_dir: &Path,
) -> Result<()> {
    let slice = PartitionSlice {
        inner: source,
        base: partition_offset,
        pos: 0,
    };
    let fs = FileSystem::new(slice, FsOptions::new())
        .map_err(|e| crate::error::Error::format("fat32", e.to_string()))?;
    copy_dir(&fs.root_dir(), scratch_dir)
}

fn copy_dir<IO: fatfs::ReadWriteSeek>(
    dir: &fatfs::Dir<'_, IO>,
    host_dir: &Path,
) -> Result<()> {
    fs::create_dir_all(host_dir)?;
    for entry in dir.iter() {
        let entry = entry.map_err(|e| crate::error::Error::format("fat32", e.to_string()))?;
        let name = entry.file_name();
        if super::SKIP_NAMES.contains(&name.as_str()) {
            continue;
        }
        let host_child = host_dir.join(&name);
        if entry.is_dir() {
            copy_dir(&entry.to_dir(), &host_child)?;
        } else {
            let mut file = entry.to_file();
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)
                .map_err(|e| crate::error::Error::format("fat32", e.to_string()))?;
            fs::write(&host_child, contents)?;
        }
    }
    Ok(())
}
