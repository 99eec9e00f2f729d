//! The copy-on-write engine.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::Path;

use cowfs_block::{BlockId, BlockStore, FsBlockStore};
use cowfs_config::{log_engine_debug, log_engine_info, log_engine_warn, EngineConfig};
use cowfs_meta::{validate_filename, FileMetadata, MetadataStore, Version};
use tracing::instrument;

use crate::chunk;
use crate::lock::FileLocks;
use crate::session::SessionRegistry;
use crate::{CowError, Result};

/// Behaviour switches for [`CowEngine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// `read` fails with `NotOpen` unless the file has an open session
    pub read_requires_session: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            read_requires_session: true,
        }
    }
}

impl From<&EngineConfig> for EngineOptions {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            read_requires_session: cfg.read_requires_session,
        }
    }
}

/// Aggregate byte counts over both stores
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageUsage {
    pub block_count: u64,
    pub file_count: u64,
    /// Sum of all block sizes
    pub total_blocks_size: u64,
    /// Sum of all metadata record sizes
    pub total_metadata_size: u64,
    pub total_size: u64,
}

/// Versioned file engine over a block store and a metadata store.
///
/// Every `create`, `open`, `write` and `undo` holds the file's lock for its
/// whole load-modify-save sequence. Reads hold it only while loading the
/// record; block fetches run unlocked since blocks never change.
#[derive(Debug)]
pub struct CowEngine<B: BlockStore = FsBlockStore> {
    blocks: B,
    meta: MetadataStore,
    sessions: SessionRegistry,
    locks: FileLocks,
    options: EngineOptions,
}

impl CowEngine<FsBlockStore> {
    /// Bootstrap `<root>/data` and `<root>/metadata` and build an engine on them.
    pub fn open_dir<P: AsRef<Path>>(root: P, options: EngineOptions) -> Result<Self> {
        let root = root.as_ref();
        let blocks = FsBlockStore::new(root.join(cowfs_config::BLOCKS_DIR))?;
        let meta = MetadataStore::new(root.join(cowfs_config::METADATA_DIR))?;
        log_engine_debug!("storage ready", root = tracing::field::display(root.display()));
        Ok(Self::new(blocks, meta, options))
    }

    /// Engine over the storage root named by `config`.
    pub fn from_config(config: &cowfs_config::Config) -> Result<Self> {
        Self::open_dir(&config.storage.root, EngineOptions::from(&config.engine))
    }
}

impl<B: BlockStore> CowEngine<B> {
    pub fn new(blocks: B, meta: MetadataStore, options: EngineOptions) -> Self {
        Self {
            blocks,
            meta,
            sessions: SessionRegistry::new(),
            locks: FileLocks::default(),
            options,
        }
    }

    pub fn blocks(&self) -> &B {
        &self.blocks
    }

    pub fn metadata_store(&self) -> &MetadataStore {
        &self.meta
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    pub fn is_open(&self, filename: &str) -> bool {
        self.sessions.is_open(filename)
    }

    fn require_open(&self, filename: &str) -> Result<()> {
        if self.sessions.is_open(filename) {
            Ok(())
        } else {
            Err(CowError::NotOpen(filename.to_string()))
        }
    }

    /// Start a new file whose version 0 is empty, and open it.
    ///
    /// Fails with `AlreadyExists` when the file exists and `overwrite` is false.
    #[instrument(skip(self), level = "debug")]
    pub fn create(&self, filename: &str, overwrite: bool) -> Result<()> {
        validate_filename(filename)?;
        self.locks.with(filename, || {
            if self.meta.exists(filename) && !overwrite {
                return Err(CowError::AlreadyExists(filename.to_string()));
            }
            self.meta.save(&FileMetadata::new(filename))?;
            self.sessions.open(filename, None);
            log_engine_info!("create", filename = filename, overwrite = overwrite);
            Ok(())
        })
    }

    /// Open a file for writing.
    ///
    /// With `file_path`, the external file's bytes become version 0 of a new
    /// (or replaced) logical file. If that path cannot be read but the file
    /// already exists, the existing file is opened instead.
    #[instrument(skip(self), level = "debug")]
    pub fn open(&self, filename: &str, file_path: Option<&Path>) -> Result<()> {
        validate_filename(filename)?;
        self.locks.with(filename, || self.open_locked(filename, file_path))
    }

    fn open_locked(&self, filename: &str, file_path: Option<&Path>) -> Result<()> {
        if let Some(path) = file_path {
            match fs::read(path) {
                Ok(bytes) => {
                    let meta = self.import_locked(filename, &bytes)?;
                    self.sessions.open(filename, Some(path));
                    log_engine_info!(
                        "import",
                        filename = filename,
                        source = tracing::field::display(path.display()),
                        bytes = meta.size(),
                        blocks = meta.blocks().len()
                    );
                    return Ok(());
                }
                Err(source) if !self.meta.exists(filename) => {
                    return Err(CowError::Import {
                        path: path.to_path_buf(),
                        source,
                    });
                }
                Err(e) => {
                    log_engine_warn!(
                        "import source unreadable, opening stored file",
                        filename = filename,
                        source = tracing::field::display(path.display()),
                        error = tracing::field::display(&e)
                    );
                }
            }
        }

        // Loading also rejects a corrupt record before a session is handed out
        self.meta.load(filename)?;
        self.sessions.open(filename, None);
        log_engine_info!("open", filename = filename);
        Ok(())
    }

    fn import_locked(&self, filename: &str, bytes: &[u8]) -> Result<FileMetadata> {
        let mut ids = Vec::with_capacity(chunk::blocks_for(bytes.len() as u64));
        for piece in chunk::pieces(bytes) {
            ids.push(self.blocks.put(piece)?);
        }
        let meta = FileMetadata::import(filename, ids, bytes.len() as u64);
        self.meta.save(&meta)?;
        Ok(meta)
    }

    /// Append `data` as a new version. Returns the number of bytes written.
    ///
    /// New blocks are persisted before the record is saved; if any step
    /// fails the stored record still describes the previous version.
    #[instrument(skip(self, data), fields(len = data.len()), level = "debug")]
    pub fn write(&self, filename: &str, data: &[u8]) -> Result<usize> {
        self.require_open(filename)?;
        self.locks.with(filename, || self.append_locked(filename, data))?;
        Ok(data.len())
    }

    fn append_locked(&self, filename: &str, data: &[u8]) -> Result<()> {
        let mut meta = self.meta.load(filename)?;
        let prev = meta.current();
        let (blocks, size) = if data.is_empty() {
            (prev.blocks.clone(), prev.size)
        } else {
            (self.append_blocks(prev, data)?, prev.size + data.len() as u64)
        };
        let reused = count_shared(&meta.current().blocks, &blocks);

        let version = meta.push_version(blocks, size).version;
        self.meta.save(&meta)?;
        log_engine_info!(
            "write",
            filename = filename,
            bytes = data.len(),
            version = version,
            size = size,
            reused_blocks = reused
        );
        Ok(())
    }

    /// Block list for `prev` followed by `data`.
    fn append_blocks(&self, prev: &Version, data: &[u8]) -> Result<Vec<BlockId>> {
        let plan = chunk::plan_append(prev.blocks.len(), prev.size);
        let mut blocks = prev.blocks[..plan.reused].to_vec();

        let mut tail = Vec::with_capacity(plan.carry + data.len());
        if plan.has_carry() {
            let id = prev.blocks[plan.reused];
            let bytes = self.blocks.get(&id)?;
            if bytes.len() < plan.carry {
                return Err(CowError::ShortBlock {
                    id,
                    expected: plan.carry,
                    actual: bytes.len(),
                });
            }
            tail.extend_from_slice(&bytes[..plan.carry]);
        }
        tail.extend_from_slice(data);

        for piece in chunk::pieces(&tail) {
            blocks.push(self.blocks.put(piece)?);
        }
        Ok(blocks)
    }

    /// Content of the current version, or of `version` when given.
    #[instrument(skip(self), level = "debug")]
    pub fn read(&self, filename: &str, version: Option<usize>) -> Result<Vec<u8>> {
        let meta = self.metadata(filename)?;
        if self.options.read_requires_session {
            self.require_open(filename)?;
        }
        let target = match version {
            None => meta.current(),
            Some(n) => meta.version(n).ok_or_else(|| CowError::VersionNotFound {
                filename: filename.to_string(),
                version: n,
            })?,
        };
        self.assemble(target)
    }

    /// Content of an explicit version.
    pub fn read_version(&self, filename: &str, version: usize) -> Result<Vec<u8>> {
        self.read(filename, Some(version))
    }

    fn assemble(&self, version: &Version) -> Result<Vec<u8>> {
        let size = version.size as usize;
        let mut out = Vec::with_capacity(size);
        for id in &version.blocks {
            out.extend_from_slice(&self.blocks.get(id)?);
        }
        if out.len() < size {
            if let Some(&id) = version.blocks.last() {
                return Err(CowError::ShortBlock {
                    id,
                    expected: size,
                    actual: out.len(),
                });
            }
        }
        out.truncate(size);
        Ok(out)
    }

    /// Move the current-version pointer back by one. Returns the new current version.
    #[instrument(skip(self), level = "debug")]
    pub fn undo(&self, filename: &str) -> Result<usize> {
        self.require_open(filename)?;
        self.locks.with(filename, || {
            let mut meta = self.meta.load(filename)?;
            if !meta.rewind() {
                return Err(CowError::NoPreviousVersion(filename.to_string()));
            }
            self.meta.save(&meta)?;
            log_engine_info!(
                "undo",
                filename = filename,
                version = meta.current_version(),
                size = meta.size()
            );
            Ok(meta.current_version())
        })
    }

    /// End the session for `filename`.
    pub fn close(&self, filename: &str) -> Result<()> {
        match self.sessions.close(filename) {
            Some(_) => {
                log_engine_info!("close", filename = filename);
                Ok(())
            }
            None => Err(CowError::NotOpen(filename.to_string())),
        }
    }

    /// Every version in creation order.
    pub fn list_versions(&self, filename: &str) -> Result<Vec<Version>> {
        Ok(self.metadata(filename)?.versions().to_vec())
    }

    /// Snapshot of the stored record.
    pub fn metadata(&self, filename: &str) -> Result<FileMetadata> {
        validate_filename(filename)?;
        self.locks.with(filename, || Ok(self.meta.load(filename)?))
    }

    /// Names of every stored file.
    pub fn list_files(&self) -> Result<Vec<String>> {
        Ok(self.meta.list()?)
    }

    /// Write the current content of `filename` to an external path.
    #[instrument(skip(self), level = "debug")]
    pub fn export(&self, filename: &str, output_path: &Path) -> Result<u64> {
        let meta = self.metadata(filename)?;
        let content = self.assemble(meta.current())?;

        let file_name = output_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.to_string());
        let tmp_path = output_path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));
        let result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&content)?;
            file.sync_all()?;
            fs::rename(&tmp_path, output_path)
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(CowError::Io(e));
        }

        log_engine_info!(
            "export",
            filename = filename,
            target = tracing::field::display(output_path.display()),
            bytes = content.len()
        );
        Ok(content.len() as u64)
    }

    pub fn list_blocks(&self) -> Result<BTreeSet<BlockId>> {
        Ok(self.blocks.list()?)
    }

    pub fn block_size(&self, id: &BlockId) -> Result<u64> {
        Ok(self.blocks.size_of(id)?)
    }

    /// Remove every block. Metadata is left untouched, so reads of any
    /// non-empty version will fail with `BlockNotFound` afterwards.
    pub fn delete_blocks(&self) -> Result<usize> {
        let removed = self.blocks.delete_all()?;
        log_engine_warn!("delete_blocks", removed = removed);
        Ok(removed)
    }

    /// Remove every metadata record. Blocks are left untouched.
    pub fn delete_metadata(&self) -> Result<usize> {
        let removed = self.meta.delete_all()?;
        log_engine_warn!("delete_metadata", removed = removed);
        Ok(removed)
    }

    /// Byte totals across block and metadata storage.
    pub fn usage(&self) -> Result<StorageUsage> {
        let blocks = self.blocks.stats()?;
        let meta = self.meta.stats()?;
        Ok(StorageUsage {
            block_count: blocks.block_count,
            file_count: meta.file_count,
            total_blocks_size: blocks.total_bytes,
            total_metadata_size: meta.total_bytes,
            total_size: blocks.total_bytes + meta.total_bytes,
        })
    }
}

/// Length of the common prefix of two block lists.
fn count_shared(prev: &[BlockId], next: &[BlockId]) -> usize {
    prev.iter().zip(next).take_while(|(a, b)| a == b).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowfs_block::{MemBlockStore, BLOCK_SIZE};
    use tempfile::TempDir;

    fn mem_engine(temp: &TempDir) -> CowEngine<MemBlockStore> {
        let meta = MetadataStore::new(temp.path().join("metadata")).unwrap();
        CowEngine::new(MemBlockStore::new(), meta, EngineOptions::default())
    }

    #[test]
    fn test_create_write_read() {
        let temp = TempDir::new().unwrap();
        let engine = mem_engine(&temp);

        engine.create("f", false).unwrap();
        assert_eq!(engine.write("f", b"hello").unwrap(), 5);
        assert_eq!(engine.read("f", None).unwrap(), b"hello");
    }

    #[test]
    fn test_create_existing_without_overwrite() {
        let temp = TempDir::new().unwrap();
        let engine = mem_engine(&temp);

        engine.create("f", false).unwrap();
        engine.write("f", b"keep").unwrap();
        assert!(matches!(engine.create("f", false), Err(CowError::AlreadyExists(_))));
        assert_eq!(engine.read("f", None).unwrap(), b"keep");

        engine.create("f", true).unwrap();
        assert!(engine.read("f", None).unwrap().is_empty());
        assert_eq!(engine.list_versions("f").unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_name_rejected() {
        let temp = TempDir::new().unwrap();
        let engine = mem_engine(&temp);
        assert!(matches!(engine.create("../x", false), Err(CowError::InvalidName(_))));
        assert!(matches!(engine.open("", None), Err(CowError::InvalidName(_))));
    }

    #[test]
    fn test_write_requires_session() {
        let temp = TempDir::new().unwrap();
        let engine = mem_engine(&temp);

        engine.create("f", false).unwrap();
        engine.close("f").unwrap();
        assert!(matches!(engine.write("f", b"x"), Err(CowError::NotOpen(_))));
        assert_eq!(engine.list_versions("f").unwrap().len(), 1);

        engine.open("f", None).unwrap();
        assert_eq!(engine.write("f", b"x").unwrap(), 1);
    }

    #[test]
    fn test_close_twice() {
        let temp = TempDir::new().unwrap();
        let engine = mem_engine(&temp);
        engine.create("f", false).unwrap();
        engine.close("f").unwrap();
        assert!(matches!(engine.close("f"), Err(CowError::NotOpen(_))));
    }

    #[test]
    fn test_open_missing_file() {
        let temp = TempDir::new().unwrap();
        let engine = mem_engine(&temp);
        assert!(matches!(engine.open("ghost", None), Err(CowError::FileNotFound(_))));
        assert!(!engine.is_open("ghost"));
    }

    #[test]
    fn test_empty_write_reuses_everything() {
        let temp = TempDir::new().unwrap();
        let engine = mem_engine(&temp);

        engine.create("f", false).unwrap();
        engine.write("f", &[1u8; 100]).unwrap();
        let before = engine.blocks().len();
        assert_eq!(engine.write("f", b"").unwrap(), 0);

        let versions = engine.list_versions("f").unwrap();
        assert_eq!(versions.len(), 3);
        assert_eq!(versions[2].blocks, versions[1].blocks);
        assert_eq!(engine.blocks().len(), before);
    }

    #[test]
    fn test_failed_block_write_leaves_record_unchanged() {
        let temp = TempDir::new().unwrap();
        let engine = mem_engine(&temp);

        engine.create("f", false).unwrap();
        engine.write("f", &[1u8; 100]).unwrap();
        let before = engine.metadata("f").unwrap();

        // Tail of 100 + 9000 bytes needs three puts; let only one through
        engine.blocks().fail_puts_after(1);
        let err = engine.write("f", &[2u8; 9000]).unwrap_err();
        assert!(matches!(err, CowError::Block(_)));
        assert!(err.is_storage());

        assert_eq!(engine.metadata("f").unwrap(), before);
        assert_eq!(engine.read("f", None).unwrap(), vec![1u8; 100]);

        engine.blocks().heal();
        engine.write("f", b"ok").unwrap();
        assert_eq!(engine.metadata("f").unwrap().size(), 102);
    }

    #[test]
    fn test_undo_requires_session_and_history() {
        let temp = TempDir::new().unwrap();
        let engine = mem_engine(&temp);

        engine.create("f", false).unwrap();
        assert!(matches!(engine.undo("f"), Err(CowError::NoPreviousVersion(_))));

        engine.write("f", b"a").unwrap();
        engine.close("f").unwrap();
        assert!(matches!(engine.undo("f"), Err(CowError::NotOpen(_))));

        engine.open("f", None).unwrap();
        assert_eq!(engine.undo("f").unwrap(), 0);
    }

    #[test]
    fn test_write_after_undo_branches_from_current() {
        let temp = TempDir::new().unwrap();
        let engine = mem_engine(&temp);

        engine.create("f", false).unwrap();
        engine.write("f", b"abc").unwrap();
        engine.write("f", b"def").unwrap();
        engine.undo("f").unwrap();
        engine.write("f", b"XYZ").unwrap();

        assert_eq!(engine.read("f", None).unwrap(), b"abcXYZ");
        let versions = engine.list_versions("f").unwrap();
        let numbers: Vec<u64> = versions.iter().map(|v| v.version).collect();
        assert_eq!(numbers, vec![0, 1, 2, 3]);
        assert_eq!(engine.read("f", Some(2)).unwrap(), b"abcdef");
    }

    #[test]
    fn test_usage_counts_both_stores() {
        let temp = TempDir::new().unwrap();
        let engine = mem_engine(&temp);

        engine.create("f", false).unwrap();
        engine.write("f", &[0u8; 5000]).unwrap();

        let usage = engine.usage().unwrap();
        assert_eq!(usage.block_count, 2);
        assert_eq!(usage.total_blocks_size, 5000);
        assert_eq!(usage.file_count, 1);
        assert!(usage.total_metadata_size > 0);
        assert_eq!(usage.total_size, usage.total_blocks_size + usage.total_metadata_size);
    }

    #[test]
    fn test_lock_table_does_not_grow() {
        let temp = TempDir::new().unwrap();
        let engine = mem_engine(&temp);

        engine.create("f", false).unwrap();
        engine.write("f", b"abc").unwrap();
        engine.read("f", None).unwrap();
        for i in 0..50 {
            let name = format!("ghost-{i}");
            assert!(matches!(engine.read(&name, None), Err(CowError::FileNotFound(_))));
            assert!(engine.metadata(&name).is_err());
        }
        assert!(matches!(engine.metadata("a/b"), Err(CowError::InvalidName(_))));
        assert_eq!(engine.locks.len(), 0);
    }

    #[test]
    fn test_short_block_detected() {
        let temp = TempDir::new().unwrap();
        let engine = mem_engine(&temp);

        // Record claims 10 live bytes in a block that only holds 4
        let short = engine.blocks().put(b"tiny").unwrap();
        let meta = FileMetadata::import("g", vec![short], 10);
        engine.metadata_store().save(&meta).unwrap();
        engine.open("g", None).unwrap();

        assert!(matches!(
            engine.read("g", None),
            Err(CowError::ShortBlock { expected: 10, actual: 4, .. })
        ));
        assert!(matches!(
            engine.write("g", b"more"),
            Err(CowError::ShortBlock { expected: 10, actual: 4, .. })
        ));
    }
}
