//! Last-seen content storage
//!
//! One entry per monitor fingerprint. Reads of a missing entry return an empty
//! string, so the first check of a new monitor always compares against "".
//! Writes overwrite; there is no history.

use crate::error::Result;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, trace};

/// Key/value store for the last extracted content of each monitor.
pub trait ContentStore: Send + Sync {
    /// Last stored content for `id`, or "" when nothing was stored yet.
    fn get(&self, id: &str) -> Result<String>;
    fn set(&self, id: &str, content: &str) -> Result<()>;
}

/// Stores each entry as a file named after the id inside one directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        self.directory.join(id)
    }
}

impl ContentStore for FileStore {
    fn get(&self, id: &str) -> Result<String> {
        let path = self.entry_path(id);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                trace!("Storage: read {} bytes for {}", content.len(), id);
                Ok(content)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Storage: no entry for {} yet, using empty baseline", id);
                Ok(String::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, id: &str, content: &str) -> Result<()> {
        std::fs::create_dir_all(&self.directory)?;
        std::fs::write(self.entry_path(id), content)?;
        debug!("Storage: wrote {} bytes for {}", content.len(), id);
        Ok(())
    }
}

/// Process-local store. Used by `check` runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContentStore for MemoryStore {
    fn get(&self, id: &str) -> Result<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(id).cloned().unwrap_or_default())
    }

    fn set(&self, id: &str, content: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(id.to_string(), content.to_string());
        Ok(())
    }
}
