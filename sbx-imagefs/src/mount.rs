//! Read-only filesystem handle over a materialized scratch directory.
//!
//! [`EmbeddedFs`] is the uniform view every per-filesystem materializer
//! produces. Several handles can be derived from the same backing raw image
//! (one per partition); they share ownership of the open raw file through a
//! reference count so the file is closed exactly once, after the last handle
//! is dropped. Deletion of the scratch directories and the raw image's temp
//! path is *not* the handle's job — that's the orchestrator's, once every
//! handle it produced has been closed (see `orchestrator`).

use std::fs::{self, File, Metadata};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::error::{Error, Result};

/// State shared by every `EmbeddedFs` handle derived from the same raw image.
#[derive(Debug)]
struct SharedMount {
    /// Open handle to the backing raw image, released when the refcount hits zero.
    raw_file: Mutex<Option<File>>,
    /// Number of live `EmbeddedFs` handles referencing `raw_file`.
    ref_count: Mutex<u32>,
}

/// A read-only handle onto one partition's (or archive's) extracted file tree.
#[derive(Debug, Clone)]
pub struct EmbeddedFs {
    /// Scratch directory whose contents mirror the partition.
    fs_root: PathBuf,
    /// State shared with sibling handles of the same raw image.
    shared: Arc<SharedMount>,
}

/// Either a regular file or a directory; the minimal `Stat` surface this core needs.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Path this info describes, relative to the handle's root.
    pub name: String,
    /// `true` if this entry is a directory.
    pub is_dir: bool,
    /// Size in bytes (zero for directories).
    pub size: u64,
    /// Unix-style mode bits (best effort; synthesized as `0o755`/`0o644` where
    /// the host doesn't expose real permissions).
    pub mode: u32,
    /// Modification time, or "now" when synthesized.
    pub mod_time: SystemTime,
}

impl EmbeddedFs {
    /// Wraps a freshly materialized scratch directory. `raw_file` is `None`
    /// for archive-backed handles (TAR/OVA) that have no single backing raw
    /// image to keep open.
    pub fn new(fs_root: PathBuf, raw_file: Option<File>) -> Self {
        Self {
            fs_root,
            shared: Arc::new(SharedMount {
                raw_file: Mutex::new(raw_file),
                ref_count: Mutex::new(1),
            }),
        }
    }

    /// Creates another handle onto the same raw image (e.g. for a sibling
    /// partition), incrementing the shared refcount.
    pub fn share(&self, fs_root: PathBuf) -> Self {
        *self.shared.ref_count.lock().expect("ref_count poisoned") += 1;
        Self {
            fs_root,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Root directory of this handle on the host filesystem.
    pub fn root(&self) -> &Path {
        &self.fs_root
    }

    /// Resolves a guest-relative path to a host path under the scratch root,
    /// canonicalizing `"/"`, `"."`, and `""` to the root itself.
    fn resolve(&self, path: &str) -> PathBuf {
        let trimmed = path.trim_start_matches('/');
        if trimmed.is_empty() || trimmed == "." {
            return self.fs_root.clone();
        }
        self.fs_root.join(trimmed)
    }

    /// Opens a file for reading.
    pub fn open(&self, path: &str) -> Result<File> {
        File::open(self.resolve(path)).map_err(Error::from)
    }

    /// Lists the entries of a directory, sorted by name for determinism.
    pub fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>> {
        let host_path = self.resolve(path);
        let mut out = Vec::new();
        for entry in fs::read_dir(&host_path)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            out.push(file_info(&entry.file_name().to_string_lossy(), &meta));
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Stats a path. `Stat("/")` always succeeds, synthesizing a directory
    /// entry when the host API can't stat the scratch root directly.
    pub fn stat(&self, path: &str) -> Result<FileInfo> {
        let host_path = self.resolve(path);
        match fs::metadata(&host_path) {
            Ok(meta) => Ok(file_info(&display_name(path), &meta)),
            Err(e) if host_path == self.fs_root => {
                tracing::warn!(error = %e, "synthesizing root stat");
                Ok(FileInfo {
                    name: "/".to_owned(),
                    is_dir: true,
                    size: 0,
                    mode: 0o755,
                    mod_time: SystemTime::now(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Releases this handle's share of the backing raw image. When the last
    /// handle is closed the raw file is dropped (closed); temp paths are left
    /// in place for the orchestrator to remove.
    pub fn close(&self) -> Result<()> {
        let mut count = self.shared.ref_count.lock().expect("ref_count poisoned");
        *count -= 1;
        if *count == 0 {
            let mut file = self.shared.raw_file.lock().expect("raw_file poisoned");
            *file = None;
            tracing::debug!(root = %self.fs_root.display(), "released backing raw image");
        }
        Ok(())
    }
}

/// Builds a [`FileInfo`] from host metadata.
fn file_info(name: &str, meta: &Metadata) -> FileInfo {
    FileInfo {
        name: name.to_owned(),
        is_dir: meta.is_dir(),
        size: meta.len(),
        mode: host_mode(meta),
        mod_time: meta.modified().unwrap_or_else(|_| SystemTime::now()),
    }
}

/// Synthesizes a conservative Unix mode when the underlying API can't tell us
/// one: `0o755` for directories, `0o644` for files.
#[cfg(unix)]
fn host_mode(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt as _;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn host_mode(meta: &Metadata) -> u32 {
    if meta.is_dir() { 0o755 } else { 0o644 }
}

/// Canonicalizes `"/"`/`"."`/`""` to `"/"` for display purposes.
fn display_name(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        "/".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Rejects a tar-entry path that would escape `root` once joined and
/// normalized (no `..` component may survive normalization outside the root).
pub fn path_escapes_root(root: &Path, entry: &Path) -> bool {
    let mut depth: i64 = 0;
    for comp in entry.components() {
        match comp {
            Component::Normal(_) => depth += 1,
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return true;
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return true,
        }
    }
    let _ = root;
    false
}
