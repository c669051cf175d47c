//! Per-filesystem materializers.
//!
//! Each module here walks one filesystem kind's on-disk structures and
//! copies its tree into a scratch directory on the host, producing an
//! [`crate::EmbeddedFs`] over the result. None of these mount anything —
//! "materialize" always means "read the guest filesystem and write a mirror
//! of it to a real host directory".

pub mod exfat;
pub mod ext4;
pub mod fat32;
pub mod ntfs;

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use crate::error::Result;
use crate::fsprobe::FsKind;
use crate::mount::EmbeddedFs;

/// Names filtered out of every materialized tree's top level.
pub(crate) const SKIP_NAMES: &[&str] = &[".", "..", "lost+found"];

/// Materializes the filesystem found at `partition_offset` within `source`
/// into `scratch_dir`, dispatching by `kind`.
pub fn materialize<R: Read + Seek>(
    kind: FsKind,
    source: &mut R,
    partition_offset: u64,
    scratch_dir: &Path,
    raw_file: Option<File>,
) -> Result<EmbeddedFs> {
    std::fs::create_dir_all(scratch_dir)?;
    match kind {
        FsKind::Ext4 => ext4::materialize(source, partition_offset, scratch_dir)?,
        FsKind::Fat32 => fat32::materialize(source, partition_offset, scratch_dir)?,
        FsKind::ExFat => exfat::materialize(source, partition_offset, scratch_dir)?,
        FsKind::Ntfs => ntfs::materialize(source, partition_offset, scratch_dir)?,
        FsKind::Unknown => {
            return Err(crate::error::Error::UnknownFilesystem(partition_offset));
        }
    }
    Ok(EmbeddedFs::new(scratch_dir.to_path_buf(), raw_file))
}
