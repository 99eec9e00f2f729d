//! Version log and per-file record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cowfs_block::BlockId;

use crate::{MetaError, Result};

/// Immutable snapshot of a file's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Position in the version log (0-based)
    pub version: u64,
    /// When this version was appended
    pub timestamp: DateTime<Utc>,
    /// Ordered block references; concatenated and cut to `size` they give the content
    pub blocks: Vec<BlockId>,
    /// First byte covered (always 0, writes are append-only)
    pub start: u64,
    /// One past the last byte covered
    pub end: u64,
    /// Content length in bytes
    pub size: u64,
}

impl Version {
    pub fn new(version: u64, blocks: Vec<BlockId>, size: u64) -> Self {
        Self {
            version,
            timestamp: Utc::now(),
            blocks,
            start: 0,
            end: size,
            size,
        }
    }
}

/// Per-file record: version log, current pointer and a mirror of the current version.
///
/// Fields are private so the pointer and mirror can only move together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    filename: String,
    creation_time: DateTime<Utc>,
    versions: Vec<Version>,
    current_version: usize,
    size: u64,
    blocks: Vec<BlockId>,
}

impl FileMetadata {
    /// Fresh record whose version 0 is empty.
    pub fn new(filename: impl Into<String>) -> Self {
        Self::import(filename, Vec::new(), 0)
    }

    /// Fresh record whose version 0 covers already-persisted blocks.
    pub fn import(filename: impl Into<String>, blocks: Vec<BlockId>, size: u64) -> Self {
        let initial = Version::new(0, blocks.clone(), size);
        Self {
            filename: filename.into(),
            creation_time: initial.timestamp,
            versions: vec![initial],
            current_version: 0,
            size,
            blocks,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    pub fn current_version(&self) -> usize {
        self.current_version
    }

    /// Size of the current version.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Blocks of the current version.
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// The version reads target by default.
    pub fn current(&self) -> &Version {
        &self.versions[self.current_version]
    }

    pub fn version(&self, n: usize) -> Option<&Version> {
        self.versions.get(n)
    }

    /// Append a version derived from the current one and point at it.
    ///
    /// The new version number is the log length, so numbers stay unique and
    /// equal to their index even after the pointer was rewound.
    pub fn push_version(&mut self, blocks: Vec<BlockId>, size: u64) -> &Version {
        let number = self.versions.len() as u64;
        self.versions.push(Version::new(number, blocks, size));
        self.current_version = self.versions.len() - 1;
        self.sync_mirror();
        self.current()
    }

    /// Move the pointer one version back. Returns false at version 0.
    pub fn rewind(&mut self) -> bool {
        if self.current_version == 0 {
            return false;
        }
        self.current_version -= 1;
        self.sync_mirror();
        true
    }

    fn sync_mirror(&mut self) {
        let current = &self.versions[self.current_version];
        self.size = current.size;
        self.blocks = current.blocks.clone();
    }

    /// Check the structural invariants of a record read from storage.
    pub fn validate(&self) -> Result<()> {
        let corrupt = |reason: String| MetaError::Corrupt {
            filename: self.filename.clone(),
            reason,
        };

        if self.versions.is_empty() {
            return Err(corrupt("empty version log".into()));
        }
        if self.current_version >= self.versions.len() {
            return Err(corrupt(format!(
                "current_version {} outside log of {}",
                self.current_version,
                self.versions.len()
            )));
        }
        for (idx, v) in self.versions.iter().enumerate() {
            if v.version != idx as u64 {
                return Err(corrupt(format!("version {} stored at index {}", v.version, idx)));
            }
            if v.start != 0 || v.end != v.size {
                return Err(corrupt(format!(
                    "version {} covers [{}, {}) but has size {}",
                    v.version, v.start, v.end, v.size
                )));
            }
            // Every block but the last is full, so the count follows from the size
            let needed = v.size.div_ceil(cowfs_block::BLOCK_SIZE as u64);
            if v.blocks.len() as u64 != needed {
                return Err(corrupt(format!(
                    "version {} of size {} needs {} blocks, lists {}",
                    v.version,
                    v.size,
                    needed,
                    v.blocks.len()
                )));
            }
        }
        let current = self.current();
        if current.size != self.size || current.blocks != self.blocks {
            return Err(corrupt("mirror does not match current version".into()));
        }
        Ok(())
    }
}
