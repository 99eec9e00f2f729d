//! # cowfs-core
//!
//! Copy-on-write versioned file engine.
//!
//! A logical file is an append-only log of versions. Each write derives a
//! new version from the current one: every full block is reused by
//! identifier, the partially filled tail block (if any) is re-chunked
//! together with the new bytes into freshly allocated blocks. Undo moves
//! the current-version pointer back without deleting anything.
//!
//! ```ignore
//! let engine = CowEngine::open_dir("cow_filesystem", EngineOptions::default())?;
//! engine.create("notes", false)?;
//! engine.write("notes", b"hello")?;
//! assert_eq!(engine.read("notes", None)?, b"hello");
//! engine.undo("notes")?;
//! engine.close("notes")?;
//! ```

pub mod chunk;
mod engine;
mod error;
mod lock;
mod session;

pub use engine::{CowEngine, EngineOptions, StorageUsage};
pub use error::{CowError, Result};
pub use session::{Session, SessionRegistry};

pub use cowfs_block::{BlockId, BlockStore, FsBlockStore, MemBlockStore, BLOCK_SIZE};
pub use cowfs_meta::{FileMetadata, Version};
