//! Extraction configuration threaded through the orchestrator.

use std::collections::HashMap;

/// Size limits and credentials for a run of the extractor.
#[derive(Debug, Clone, Default)]
pub struct ExtractConfig {
    /// Global ceiling on the size of a single file considered for extraction.
    /// Zero means "no limit".
    pub max_file_size_bytes: u64,
    /// Per-plugin override of `max_file_size_bytes`, keyed by plugin name
    /// (e.g. `"qcow2"`, `"vmdk"`).
    pub plugin_max_file_size_bytes: HashMap<String, u64>,
    /// Password used to unlock an encrypted QCOW2 image. Required
    /// (non-empty) whenever the image's `crypt_method` is non-zero.
    pub password: Option<String>,
}

impl ExtractConfig {
    /// Returns the effective size limit for `plugin`, falling back to the
    /// global limit when no override is configured.
    pub fn max_file_size_for(&self, plugin: &str) -> u64 {
        self.plugin_max_file_size_bytes
            .get(plugin)
            .copied()
            .unwrap_or(self.max_file_size_bytes)
    }

    /// Returns `true` if a file of `size` bytes should be processed by `plugin`.
    pub fn file_required(&self, plugin: &str, size: u64) -> bool {
        let limit = self.max_file_size_for(plugin);
        limit == 0 || size <= limit
    }
}
