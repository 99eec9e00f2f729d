//! # cowfs-meta
//!
//! Versioned metadata for cowfs logical files.
//!
//! Each logical file owns one [`FileMetadata`] record: an append-only log of
//! [`Version`] snapshots plus a current-version pointer. A version holds only
//! block identifiers; the bytes live in a `cowfs_block::BlockStore`.
//!
//! ## On-disk Format
//!
//! One pretty-printed JSON document per file at `<root>/metadata/<filename>.json`:
//!
//! ```text
//! {
//!   "filename": "notes",
//!   "creation_time": "2024-05-01T12:00:00Z",
//!   "versions": [ { "version": 0, "timestamp": "...", "blocks": [],
//!                   "start": 0, "end": 0, "size": 0 } ],
//!   "current_version": 0,
//!   "size": 0,
//!   "blocks": []
//! }
//! ```

mod record;
mod store;

pub use record::{FileMetadata, Version};
pub use store::{validate_filename, MetadataStats, MetadataStore, META_EXT};

use std::io;

use thiserror::Error;

/// Errors that can occur during metadata operations
#[derive(Error, Debug)]
pub enum MetaError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid file name: {0:?}")]
    InvalidName(String),

    #[error("Corrupt metadata for {filename}: {reason}")]
    Corrupt { filename: String, reason: String },
}

pub type Result<T> = std::result::Result<T, MetaError>;
