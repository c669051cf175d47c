//! Read-only extraction of disk and archive images into materialized,
//! queryable file trees.
//!
//! Supported container formats: QCOW2 (including LUKS1-encrypted and legacy
//! AES-CBC-encrypted images), VMDK (monolithic-sparse and stream-optimized),
//! VDI (dynamic and static), and TAR/TAR.GZ/OVA. Each decodes to a raw byte
//! stream or direct file tree, which [`fsprobe`] classifies and a per-format
//! module under [`fs`] materializes into an [`EmbeddedFs`].

pub mod config;
pub mod error;
pub mod fs;
pub mod fsprobe;
pub mod mount;
pub mod orchestrator;
pub mod partition;
pub mod qcow2;
pub mod stream;
pub mod tar_extract;
pub mod vdi;
pub mod vmdk;

pub use config::ExtractConfig;
pub use error::{Error, Result};
pub use fsprobe::FsKind;
pub use mount::{EmbeddedFs, FileInfo};
pub use orchestrator::{extract, GetEmbeddedFs};
pub use partition::Partition;
