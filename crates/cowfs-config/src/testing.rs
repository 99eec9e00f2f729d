//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage a throwaway storage root with the
//! block and metadata directories already bootstrapped, plus a scratch
//! area for "external" files to import.
//!
//! # Usage
//!
//! ```ignore
//! use cowfs_config::testing::TestEnvironment;
//!
//! let env = TestEnvironment::new().unwrap();
//! // env.root, env.blocks_dir, env.metadata_dir are all isolated
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::{BLOCKS_DIR, METADATA_DIR};

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Storage root holding blocks and metadata
    pub root: PathBuf,
    /// Block directory under the root
    pub blocks_dir: PathBuf,
    /// Metadata directory under the root
    pub metadata_dir: PathBuf,
    /// Directory for files living outside the store
    pub external_dir: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let base = temp_dir.path();

        let root = base.join(format!("store-{}", test_id));
        let blocks_dir = root.join(BLOCKS_DIR);
        let metadata_dir = root.join(METADATA_DIR);
        let external_dir = base.join("external");

        std::fs::create_dir_all(&blocks_dir)?;
        std::fs::create_dir_all(&metadata_dir)?;
        std::fs::create_dir_all(&external_dir)?;

        Ok(Self {
            _temp_dir: temp_dir,
            root,
            blocks_dir,
            metadata_dir,
            external_dir,
            test_id,
        })
    }

    /// Create an external file with content
    pub fn create_external(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.external_dir.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Number of block files currently on disk
    pub fn block_file_count(&self) -> usize {
        std::fs::read_dir(&self.blocks_dir)
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .filter(|e| e.path().extension().is_some_and(|x| x == "block"))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Config pointing at this environment's root
    pub fn config(&self) -> crate::Config {
        let mut cfg = crate::Config::default();
        cfg.storage.root = self.root.clone();
        cfg
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
