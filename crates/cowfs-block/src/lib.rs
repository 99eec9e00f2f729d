//! # cowfs-block
//!
//! Fixed-size, write-once block storage for cowfs.
//!
//! Blocks are identity-addressed: every `put` mints a fresh random
//! [`BlockId`], so identical bytes written twice land in two distinct
//! blocks. Nothing in this crate knows about files or versions.
//!
//! ## Directory Layout
//!
//! ```text
//! <root>/data/
//! ├── 0b6c1f3e-8a0d-4c55-9d8e-3f2a1b7c9e10.block
//! └── 5d2e9a41-77c3-4f0e-b1a2-6c8d0e4f1a23.block
//! ```
//!
//! ## Backends
//!
//! - [`FsBlockStore`]: one file per block under a root directory
//! - [`MemBlockStore`]: in-process map, with failure injection for tests

mod fs;
mod memory;

pub use fs::FsBlockStore;
pub use memory::MemBlockStore;

use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Maximum number of bytes held by a single block.
pub const BLOCK_SIZE: usize = 4096;

/// File extension used for persisted blocks.
pub const BLOCK_EXT: &str = "block";

/// Errors that can occur during block operations
#[derive(Error, Debug)]
pub enum BlockError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Block not found: {id}")]
    NotFound { id: BlockId },

    #[error("Invalid block length {len} (expected 1..={BLOCK_SIZE})")]
    InvalidSize { len: usize },

    #[error("Injected write failure")]
    Injected,
}

pub type Result<T> = std::result::Result<T, BlockError>;

/// Opaque, globally unique block identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(Uuid);

impl BlockId {
    /// Mint a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse either a bare id or a `<id>.block` file name.
    pub fn parse(s: &str) -> Option<Self> {
        let stem = s
            .strip_suffix(BLOCK_EXT)
            .and_then(|s| s.strip_suffix('.'))
            .unwrap_or(s);
        Uuid::parse_str(stem).ok().map(Self)
    }

    /// File name this block is stored under.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.0.hyphenated(), BLOCK_EXT)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for BlockId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Reject payloads that cannot form a block.
pub(crate) fn check_len(data: &[u8]) -> Result<()> {
    if data.is_empty() || data.len() > BLOCK_SIZE {
        return Err(BlockError::InvalidSize { len: data.len() });
    }
    Ok(())
}

/// Persistence contract for immutable blocks.
///
/// Implementations must never change the bytes behind an identifier once
/// `put` has returned it. Block lifetime policy (dedup, collection) belongs
/// behind this trait, not in callers.
pub trait BlockStore: Send + Sync {
    /// Persist `data` (1..=BLOCK_SIZE bytes) under a fresh identifier.
    fn put(&self, data: &[u8]) -> Result<BlockId>;

    /// Fetch the bytes of a block.
    fn get(&self, id: &BlockId) -> Result<Vec<u8>>;

    /// Stored length of a block.
    fn size_of(&self, id: &BlockId) -> Result<u64>;

    /// Every persisted block identifier.
    fn list(&self) -> Result<BTreeSet<BlockId>>;

    /// Irreversibly remove every block, returning how many were removed.
    fn delete_all(&self) -> Result<usize>;

    fn exists(&self, id: &BlockId) -> bool {
        self.size_of(id).is_ok()
    }

    /// Aggregate counts over the whole store.
    fn stats(&self) -> Result<BlockStats> {
        let mut stats = BlockStats::default();
        for id in self.list()? {
            stats.block_count += 1;
            stats.total_bytes += self.size_of(&id)?;
        }
        Ok(stats)
    }
}

/// Statistics about a block store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockStats {
    /// Number of persisted blocks
    pub block_count: u64,
    /// Sum of all block sizes in bytes
    pub total_bytes: u64,
}

impl BlockStats {
    /// Average block size, 0 for an empty store
    pub fn avg_block_size(&self) -> u64 {
        if self.block_count == 0 {
            0
        } else {
            self.total_bytes / self.block_count
        }
    }
}
