//! Open-file sessions.
//!
//! Sessions are process-local and never persisted: after a restart every
//! file has to be opened again before it can be written.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// State of one open logical file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub filename: String,
    /// External file the content was imported from, if any
    pub source_path: Option<PathBuf>,
    pub opened_at: DateTime<Utc>,
}

/// Filename → session map
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or refresh) a session for `filename`.
    pub fn open(&self, filename: &str, source_path: Option<&Path>) {
        self.sessions.insert(
            filename.to_string(),
            Session {
                filename: filename.to_string(),
                source_path: source_path.map(Path::to_path_buf),
                opened_at: Utc::now(),
            },
        );
    }

    /// Drop the session, returning it if one existed.
    pub fn close(&self, filename: &str) -> Option<Session> {
        self.sessions.remove(filename).map(|(_, s)| s)
    }

    pub fn is_open(&self, filename: &str) -> bool {
        self.sessions.contains_key(filename)
    }

    pub fn get(&self, filename: &str) -> Option<Session> {
        self.sessions.get(filename).map(|s| s.value().clone())
    }

    /// Names of all open files, sorted.
    pub fn open_files(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
