//! ext4 materialization via the pure-Rust `ext4-view` crate.

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use ext4_view::{Ext4, Ext4Error, FileType};

use crate::error::{Error, Result};

impl From<Ext4Error> for Error {
    fn from(e: Ext4Error) -> Self {
        Error::format("ext4", e.to_string())
    }
}

/// Reads the whole partition into memory and walks it into `scratch_dir`.
///
/// `ext4-view` operates on an in-memory byte slice rather than a `Read`
/// stream, so unlike the streaming decoders this materializer has to buffer
/// the partition up front.
pub fn materialize<R: Read + Seek>(
    source: &mut R,
    partition_offset: u64,
    scratch_dir: &Path,
) -> Result<()> {
    source.seek(SeekFrom::Start(partition_offset))?;
    let mut data = Vec::new();
    source.read_to_end(&mut data)?;

    let fs = Ext4::load(data.into_boxed_slice())?;
    copy_dir(&fs, "/", scratch_dir)
}

fn copy_dir(fs: &Ext4, guest_path: &str, host_dir: &Path) -> Result<()> {
    fs::create_dir_all(host_dir)?;
    for entry in fs.read_dir(guest_path)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if super::SKIP_NAMES.contains(&name.as_str()) {
            continue;
        }
        let guest_child = join_guest(guest_path, &name);
        let host_child: PathBuf = host_dir.join(&name);

        match entry.file_type()? {
            FileType::Directory => copy_dir(fs, &guest_child, &host_child)?,
            FileType::Regular => {
                let contents = fs.read(&guest_child)?;
                fs::write(&host_child, contents)?;
            }
            FileType::Symlink => {
                // Materialized trees never contain host symlinks (mirrors
                // the TAR extractor's policy); record the target as a file
                // instead of dereferencing it.
                if let Ok(target) = fs.read_link(&guest_child) {
                    fs::write(&host_child, target.as_os_str().as_encoded_bytes())?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn join_guest(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}
