use std::io;
use std::path::PathBuf;

use thiserror::Error;

use cowfs_block::{BlockError, BlockId};
use cowfs_meta::MetaError;

/// Errors surfaced by the engine
#[derive(Error, Debug)]
pub enum CowError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Version {version} not found for {filename}")]
    VersionNotFound { filename: String, version: usize },

    #[error("Block not found: {0}")]
    BlockNotFound(BlockId),

    #[error("File already exists: {0}")]
    AlreadyExists(String),

    #[error("File is not open: {0}")]
    NotOpen(String),

    #[error("No previous version for {0}")]
    NoPreviousVersion(String),

    #[error("Invalid file name: {0:?}")]
    InvalidName(String),

    #[error("Block {id} holds {actual} bytes, version needs {expected}")]
    ShortBlock {
        id: BlockId,
        expected: usize,
        actual: usize,
    },

    #[error("Cannot import {path:?}: {source}")]
    Import { path: PathBuf, source: io::Error },

    #[error("Block storage error: {0}")]
    Block(BlockError),

    #[error("Metadata storage error: {0}")]
    Meta(MetaError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CowError {
    /// True for the file / version / block absent family.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CowError::FileNotFound(_) | CowError::VersionNotFound { .. } | CowError::BlockNotFound(_)
        )
    }

    /// True when the underlying persistence layer failed.
    pub fn is_storage(&self) -> bool {
        matches!(self, CowError::Block(_) | CowError::Meta(_) | CowError::Io(_))
    }
}

impl From<BlockError> for CowError {
    fn from(e: BlockError) -> Self {
        match e {
            BlockError::NotFound { id } => CowError::BlockNotFound(id),
            other => CowError::Block(other),
        }
    }
}

impl From<MetaError> for CowError {
    fn from(e: MetaError) -> Self {
        match e {
            MetaError::NotFound(name) => CowError::FileNotFound(name),
            MetaError::InvalidName(name) => CowError::InvalidName(name),
            other => CowError::Meta(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, CowError>;
