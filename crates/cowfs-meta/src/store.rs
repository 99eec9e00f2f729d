//! JSON-file metadata store.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::instrument;

use crate::{FileMetadata, MetaError, Result};

/// File extension used for metadata records.
pub const META_EXT: &str = "json";

/// Reject names that could escape the metadata directory.
pub fn validate_filename(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(MetaError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// One JSON document per logical file under a root directory.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    root: PathBuf,
}

impl MetadataStore {
    /// Create a metadata store at the given root directory.
    ///
    /// The directory will be created if it doesn't exist.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, filename: &str) -> PathBuf {
        self.root.join(format!("{}.{}", filename, META_EXT))
    }

    pub fn exists(&self, filename: &str) -> bool {
        validate_filename(filename).is_ok() && self.record_path(filename).exists()
    }

    /// Load and validate the record for `filename`.
    #[instrument(skip(self), level = "debug")]
    pub fn load(&self, filename: &str) -> Result<FileMetadata> {
        validate_filename(filename)?;
        let file = match File::open(self.record_path(filename)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(MetaError::NotFound(filename.to_string()))
            }
            Err(e) => return Err(MetaError::Io(e)),
        };
        let meta: FileMetadata = serde_json::from_reader(BufReader::new(file))?;
        if meta.filename() != filename {
            return Err(MetaError::Corrupt {
                filename: filename.to_string(),
                reason: format!("record names {:?}", meta.filename()),
            });
        }
        meta.validate()?;
        Ok(meta)
    }

    /// Replace the persisted record using the write-rename pattern.
    #[instrument(skip(self, meta), fields(filename = meta.filename()), level = "debug")]
    pub fn save(&self, meta: &FileMetadata) -> Result<()> {
        validate_filename(meta.filename())?;
        let path = self.record_path(meta.filename());
        let tmp_path = self.root.join(format!(
            "{}.{}.{:?}.tmp",
            meta.filename(),
            std::process::id(),
            std::thread::current().id()
        ));

        let result = (|| -> Result<()> {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(&file);
            serde_json::to_writer_pretty(&mut writer, meta)?;
            writer.flush()?;
            drop(writer);
            file.sync_all()?;
            fs::rename(&tmp_path, &path)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }

    /// Names of every stored file, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for (name, _) in self.records()? {
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    fn records(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut out = Vec::new();
        if !self.root.exists() {
            return Ok(out);
        }
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != META_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                out.push((stem.to_string(), path));
            }
        }
        Ok(out)
    }

    /// Irreversibly remove every record, returning how many were removed.
    #[instrument(skip(self), level = "debug")]
    pub fn delete_all(&self) -> Result<usize> {
        let mut removed = 0;
        for (_, path) in self.records()? {
            fs::remove_file(path)?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Count and on-disk size of all records.
    pub fn stats(&self) -> Result<MetadataStats> {
        let mut stats = MetadataStats::default();
        for (_, path) in self.records()? {
            stats.file_count += 1;
            stats.total_bytes += fs::metadata(path)?.len();
        }
        Ok(stats)
    }
}

/// Statistics about a metadata store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetadataStats {
    pub file_count: u64,
    /// Sum of record sizes in bytes
    pub total_bytes: u64,
}
