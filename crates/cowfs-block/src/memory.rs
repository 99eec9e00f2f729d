//! In-memory block store.
//!
//! Same contract as [`crate::FsBlockStore`], without touching disk. Puts can
//! be made to fail after a given number of successes, which lets callers
//! exercise their partial-failure paths.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::{check_len, BlockError, BlockId, BlockStore, Result};

const NO_LIMIT: usize = usize::MAX;

#[derive(Debug)]
pub struct MemBlockStore {
    blocks: RwLock<HashMap<BlockId, Vec<u8>>>,
    puts_left: AtomicUsize,
}

impl Default for MemBlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemBlockStore {
    pub fn new() -> Self {
        Self {
            blocks: RwLock::new(HashMap::new()),
            puts_left: AtomicUsize::new(NO_LIMIT),
        }
    }

    /// Let `n` more puts succeed, then fail every following put.
    pub fn fail_puts_after(&self, n: usize) {
        self.puts_left.store(n, Ordering::SeqCst);
    }

    /// Lift any failure injection.
    pub fn heal(&self) {
        self.puts_left.store(NO_LIMIT, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    fn take_put_permit(&self) -> bool {
        self.puts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                NO_LIMIT => Some(NO_LIMIT),
                0 => None,
                n => Some(n - 1),
            })
            .is_ok()
    }
}

impl BlockStore for MemBlockStore {
    fn put(&self, data: &[u8]) -> Result<BlockId> {
        check_len(data)?;
        if !self.take_put_permit() {
            return Err(BlockError::Injected);
        }
        let mut blocks = self.blocks.write();
        let mut id = BlockId::generate();
        while blocks.contains_key(&id) {
            id = BlockId::generate();
        }
        blocks.insert(id, data.to_vec());
        Ok(id)
    }

    fn get(&self, id: &BlockId) -> Result<Vec<u8>> {
        self.blocks
            .read()
            .get(id)
            .cloned()
            .ok_or(BlockError::NotFound { id: *id })
    }

    fn size_of(&self, id: &BlockId) -> Result<u64> {
        self.blocks
            .read()
            .get(id)
            .map(|b| b.len() as u64)
            .ok_or(BlockError::NotFound { id: *id })
    }

    fn list(&self) -> Result<BTreeSet<BlockId>> {
        Ok(self.blocks.read().keys().copied().collect())
    }

    fn delete_all(&self) -> Result<usize> {
        let mut blocks = self.blocks.write();
        let removed = blocks.len();
        blocks.clear();
        Ok(removed)
    }
}
