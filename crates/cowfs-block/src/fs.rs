//! Directory-backed block store: one `<id>.block` file per block.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{instrument, warn};

use crate::{check_len, BlockError, BlockId, BlockStore, Result, BLOCK_EXT};

/// Attempts at minting a non-colliding id before giving up.
const MAX_ID_ATTEMPTS: usize = 8;

/// Block store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsBlockStore {
    root: PathBuf,
}

impl FsBlockStore {
    /// Create a block store at the given root directory.
    ///
    /// The directory will be created if it doesn't exist.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Get the root path of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn block_path(&self, id: &BlockId) -> PathBuf {
        self.root.join(id.file_name())
    }

    /// Path of an existing block, for direct inspection.
    pub fn block_path_for_id(&self, id: &BlockId) -> Option<PathBuf> {
        let path = self.block_path(id);
        path.exists().then_some(path)
    }

    fn not_found(id: &BlockId) -> BlockError {
        BlockError::NotFound { id: *id }
    }
}

impl BlockStore for FsBlockStore {
    #[instrument(skip(self, data), fields(len = data.len()), level = "debug")]
    fn put(&self, data: &[u8]) -> Result<BlockId> {
        check_len(data)?;

        for _ in 0..MAX_ID_ATTEMPTS {
            let id = BlockId::generate();
            let path = self.block_path(&id);
            if path.exists() {
                warn!(%id, "block id collision, minting another");
                continue;
            }

            // Unique temp name per process/thread, then rename into place
            let temp_path = self.root.join(format!(
                "{}.{}.{:?}.tmp",
                id,
                std::process::id(),
                std::thread::current().id()
            ));
            let mut file = File::create(&temp_path)?;
            if let Err(e) = file.write_all(data).and_then(|_| file.sync_all()) {
                let _ = fs::remove_file(&temp_path);
                return Err(BlockError::Io(e));
            }
            if let Err(e) = fs::rename(&temp_path, &path) {
                let _ = fs::remove_file(&temp_path);
                return Err(BlockError::Io(e));
            }
            return Ok(id);
        }

        Err(BlockError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "could not mint a fresh block id",
        )))
    }

    #[instrument(skip(self), level = "debug")]
    fn get(&self, id: &BlockId) -> Result<Vec<u8>> {
        match fs::read(self.block_path(id)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Self::not_found(id)),
            Err(e) => Err(BlockError::Io(e)),
        }
    }

    fn size_of(&self, id: &BlockId) -> Result<u64> {
        match fs::metadata(self.block_path(id)) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Self::not_found(id)),
            Err(e) => Err(BlockError::Io(e)),
        }
    }

    fn list(&self) -> Result<BTreeSet<BlockId>> {
        let mut ids = BTreeSet::new();
        if !self.root.exists() {
            return Ok(ids);
        }
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != BLOCK_EXT) {
                continue;
            }
            if let Some(id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(BlockId::parse)
            {
                ids.insert(id);
            }
        }
        Ok(ids)
    }

    #[instrument(skip(self), level = "debug")]
    fn delete_all(&self) -> Result<usize> {
        let mut removed = 0;
        for id in self.list()? {
            fs::remove_file(self.block_path(&id))?;
            removed += 1;
        }
        Ok(removed)
    }

    fn exists(&self, id: &BlockId) -> bool {
        self.block_path(id).exists()
    }
}
