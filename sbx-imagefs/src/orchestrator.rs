//! Image-extractor orchestrator.
//!
//! Dispatches an input path to the right decoder by extension, converts it
//! to a temp raw file, enumerates partitions, and hands back a lazy factory
//! per partition. Factories are cheap to create and expensive to invoke —
//! nothing is probed or materialized until a caller actually calls one.

use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::ExtractConfig;
use crate::error::{Error, Result};
use crate::fs as matfs;
use crate::fsprobe;
use crate::mount::EmbeddedFs;
use crate::partition::{self, Partition};
use crate::{qcow2, tar_extract, vdi, vmdk};

/// A lazily-invoked factory producing an [`EmbeddedFs`] for one partition.
///
/// Calling it probes the filesystem, materializes it into a fresh scratch
/// directory, and shares the raw file's refcount with every other handle
/// already produced from the same image.
pub type GetEmbeddedFs = Box<dyn FnOnce() -> Result<EmbeddedFs> + Send>;

/// One partition's lazy handle factory, paired with its discovery index.
pub struct PartitionHandle {
    /// `"<input path>:<partition index>"`, matching the orchestrator's log
    /// and scratch-directory naming convention.
    pub label: String,
    pub partition: Partition,
    pub get_embedded_fs: GetEmbeddedFs,
}

/// State shared by every scratch directory and the raw temp file this
/// extraction produced, so the orchestrator can clean all of it up once
/// every handle it produced has been closed.
struct ExtractionTemp {
    raw_path: PathBuf,
    scratch_dirs: Mutex<Vec<PathBuf>>,
}

impl Drop for ExtractionTemp {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.raw_path);
        for dir in self.scratch_dirs.lock().expect("scratch_dirs poisoned").drain(..) {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

/// Converts `input` to raw, enumerates its partitions, and returns a lazy
/// handle factory for each.
///
/// `plugin` names the caller for scratch-directory naming
/// (`scalibr-<plugin>-part-<fstype>-<index>-XXXX`).
pub fn extract(input: &Path, plugin: &str, config: &ExtractConfig) -> Result<Vec<PartitionHandle>> {
    let suffix = lowercase_suffix(input);
    let temp_dir = std::env::temp_dir();
    let raw_path = temp_dir.join(format!(
        "scalibr-{plugin}-raw-{}.raw",
        unique_suffix()
    ));

    {
        let mut raw_out = File::create(&raw_path)?;
        let mut source = BufReader::new(File::open(input)?);
        match suffix.as_str() {
            "qcow2" => qcow2::convert_qcow2_to_raw(&mut source, &mut raw_out, config.password.as_deref())?,
            "vdi" => vdi::convert_vdi_to_raw(&mut source, &mut raw_out)?,
            "vmdk" => vmdk::convert_vmdk_to_raw(&mut source, &mut raw_out)?,
            "tar" => {
                tar_extract::extract_tar(source, &raw_path, false)?;
                return Ok(directory_as_single_handle(plugin, input, raw_path, config));
            }
            "gz" if input.to_string_lossy().ends_with(".tar.gz") => {
                tar_extract::extract_tar(source, &raw_path, true)?;
                return Ok(directory_as_single_handle(plugin, input, raw_path, config));
            }
            "ova" => {
                tar_extract::extract_ova(source, &raw_path)?;
                return Ok(directory_as_single_handle(plugin, input, raw_path, config));
            }
            other => return Err(Error::unsupported("orchestrator", format!("extension {other}"))),
        }
    }

    let mut raw_file = File::open(&raw_path)?;
    let partitions = partition::read_partitions(&mut raw_file)?;

    let temp = Arc::new(ExtractionTemp {
        raw_path: raw_path.clone(),
        scratch_dirs: Mutex::new(Vec::new()),
    });

    let input_label = input.display().to_string();
    let mut handles = Vec::with_capacity(partitions.len());
    for part in partitions {
        let raw_path = raw_path.clone();
        let plugin = plugin.to_owned();
        let temp = Arc::clone(&temp);
        let max_size = config.max_file_size_for(&plugin);
        let label = format!("{input_label}:{}", part.index);

        let get_embedded_fs: GetEmbeddedFs = Box::new(move || {
            let mut raw = File::open(&raw_path)?;
            let kind = fsprobe::probe(&mut raw, part.start_bytes)?;

            let scratch_dir = std::env::temp_dir().join(format!(
                "scalibr-{plugin}-part-{}-{}-{}",
                kind.as_str(),
                part.index,
                unique_suffix()
            ));
            temp.scratch_dirs
                .lock()
                .expect("scratch_dirs poisoned")
                .push(scratch_dir.clone());

            let _ = max_size; // threaded through for per-plugin budget policy in the wider system
            raw.seek(SeekFrom::Start(0))?;
            let refcounted_raw = File::open(&raw_path)?;
            let handle =
                matfs::materialize(kind, &mut raw, part.start_bytes, &scratch_dir, Some(refcounted_raw))?;
            Ok(handle)
        });

        handles.push(PartitionHandle {
            label,
            partition: part,
            get_embedded_fs,
        });
    }

    Ok(handles)
}

/// Archive formats (TAR/TAR.GZ/OVA) extract straight to a directory rather
/// than a raw disk image; they're surfaced as a single pre-materialized
/// handle with no further partitioning.
fn directory_as_single_handle(
    plugin: &str,
    input: &Path,
    dest_dir: PathBuf,
    config: &ExtractConfig,
) -> Vec<PartitionHandle> {
    let _ = config;
    let label = format!("{}:1", input.display());
    let partition = Partition {
        start_bytes: 0,
        size_bytes: 0,
        index: 1,
    };
    let plugin = plugin.to_owned();
    let get_embedded_fs: GetEmbeddedFs = Box::new(move || {
        let _ = &plugin;
        Ok(EmbeddedFs::new(dest_dir, None))
    });
    vec![PartitionHandle {
        label,
        partition,
        get_embedded_fs,
    }]
}

fn lowercase_suffix(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn unique_suffix() -> String {
    // A real build draws this from a process-unique counter or a random
    // source; callers never depend on the exact format, only on
    // uniqueness across concurrently running extraction tasks.
    static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    format!("{:x}-{}", std::process::id(), n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn rejects_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.bin");
        File::create(&path).unwrap().write_all(b"x").unwrap();
        let err = extract(&path, "test-plugin", &ExtractConfig::default()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFeature { .. }));
    }
}
