//! TAR / TAR.GZ / OVA materialization into a scratch directory.
//!
//! Grounded on the OCI layer extractor's whiteout handling: same pattern of
//! streaming `tar::Archive::entries()` and dispatching on entry type, minus
//! the whiteout-specific logic (this core has no layering concept).

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::EntryType;

use crate::error::{Error, Result};
use crate::mount::path_escapes_root;

/// Extracts a tar stream (optionally gzip-wrapped) into `dest_root`.
///
/// On the first error the destination directory is removed and the error is
/// returned; non-directory, non-regular entries (symlinks, devices, fifos)
/// are silently skipped — this avoids ever creating a host symlink that
/// could later be followed outside `dest_root`.
pub fn extract_tar(reader: impl Read, dest_root: &Path, gzip: bool) -> Result<()> {
    fs::create_dir_all(dest_root)?;
    let result = if gzip {
        extract_entries(tar::Archive::new(GzDecoder::new(reader)), dest_root)
    } else {
        extract_entries(tar::Archive::new(reader), dest_root)
    };
    if result.is_err() {
        let _ = fs::remove_dir_all(dest_root);
    }
    result
}

/// Shared entry loop for both the plain and gzip-wrapped cases.
fn extract_entries<R: Read>(mut archive: tar::Archive<R>, dest_root: &Path) -> Result<()> {
    for raw_entry in archive.entries()? {
        let mut entry = raw_entry?;
        let rel = entry.path()?.into_owned();

        if path_escapes_root(dest_root, &rel) {
            return Err(Error::PathTraversal {
                entry: rel.display().to_string(),
                root: dest_root.to_path_buf(),
            });
        }

        let target: PathBuf = dest_root.join(&rel);
        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&target)?;
            }
            EntryType::Regular => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut out = fs::File::create(&target)?;
                std::io::copy(&mut entry, &mut out)?;
            }
            other => {
                tracing::debug!(path = %rel.display(), kind = ?other, "skipping non-regular tar entry");
            }
        }
    }
    Ok(())
}

/// An OVA is a TAR container of a VM image's disk(s) and descriptor. Its
/// contents are materialized the same way as any other TAR archive; the
/// orchestrator is responsible for locating the embedded disk image(s)
/// afterward.
pub fn extract_ova(reader: impl Read, dest_root: &Path) -> Result<()> {
    extract_tar(reader, dest_root, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn build_tar(entries: &[(&str, &[u8], bool)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data, is_dir) in entries {
            if *is_dir {
                let mut header = tar::Header::new_gnu();
                header.set_entry_type(EntryType::Directory);
                header.set_size(0);
                header.set_mode(0o755);
                header.set_cksum();
                builder.append_data(&mut header, name, &b""[..]).unwrap();
            } else {
                let mut header = tar::Header::new_gnu();
                header.set_entry_type(EntryType::Regular);
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append_data(&mut header, name, *data).unwrap();
            }
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn extracts_regular_files_and_dirs() {
        let data = build_tar(&[("dir/", &[], true), ("dir/file.txt", b"hello", false)]);
        let dest = tempfile::tempdir().unwrap();
        extract_tar(Cursor::new(data), dest.path(), false).unwrap();
        let content = fs::read_to_string(dest.path().join("dir/file.txt")).unwrap();
        assert_eq!(content, "hello");
    }

    #[test]
    fn rejects_path_traversal() {
        let data = build_tar(&[("../escape.txt", b"bad", false)]);
        let dest = tempfile::tempdir().unwrap();
        let err = extract_tar(Cursor::new(data), dest.path(), false).unwrap_err();
        assert!(matches!(err, Error::PathTraversal { .. }));
        assert!(!dest.path().exists());
    }

    #[test]
    fn gzip_wrapped_tar_extracts() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let tar_bytes = build_tar(&[("a.txt", b"gz-ok", false)]);
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        std::io::Write::write_all(&mut gz, &tar_bytes).unwrap();
        let gz_bytes = gz.finish().unwrap();

        let dest = tempfile::tempdir().unwrap();
        extract_tar(Cursor::new(gz_bytes), dest.path(), true).unwrap();
        assert_eq!(fs::read(dest.path().join("a.txt")).unwrap(), b"gz-ok");
    }
}
