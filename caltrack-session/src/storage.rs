//! Key/value storage backends
//!
//! The session keeps its durable state (the token) and its per-tab transient
//! state (refresh flag, password reset progress) behind the same small trait,
//! mirroring the browser's local and session storage.

use caltrack_core::{storage_error, CaltrackError, CaltrackResult, ErrorContext};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::debug;

/// String key/value storage
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> CaltrackResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> CaltrackResult<()>;

    /// Remove an entry, returning what was stored.
    ///
    /// The read and the delete happen atomically with respect to other
    /// callers of the same store, so at most one caller observes `Some`.
    fn remove(&self, key: &str) -> CaltrackResult<Option<String>>;
}

/// In-process storage
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned(operation: &str) -> CaltrackError {
    CaltrackError::Storage {
        message: "storage lock poisoned".to_string(),
        source: None,
        context: ErrorContext::new("memory_store").with_operation(operation),
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> CaltrackResult<Option<String>> {
        let entries = self.entries.read().map_err(|_| poisoned("get"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> CaltrackResult<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned("set"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> CaltrackResult<Option<String>> {
        let mut entries = self.entries.write().map_err(|_| poisoned("remove"))?;
        Ok(entries.remove(key))
    }
}

/// One file per key inside a directory
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub fn open<P: AsRef<Path>>(dir: P) -> CaltrackResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| CaltrackError::Storage {
            message: format!("Failed to create storage directory {}: {}", dir.display(), e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("file_store")
                .with_operation("open")
                .with_suggestion("Check that the data directory is writable"),
        })?;

        debug!(dir = %dir.display(), "Opened file store");

        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Platform data directory, e.g. `~/.local/share/caltrack`
    pub fn default_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("caltrack"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> CaltrackResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(CaltrackError::Validation {
                message: format!("Storage key '{}' contains unsupported characters", key),
                field: Some("key".to_string()),
                context: ErrorContext::new("file_store")
                    .with_suggestion("Use ASCII letters, digits, '-' or '_'"),
            });
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }

    fn read(&self, path: &Path) -> CaltrackResult<Option<String>> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error!(
                format!("Failed to read {}", path.display()),
                "file_store",
                e
            )),
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> CaltrackResult<Option<String>> {
        let path = self.path_for(key)?;
        self.read(&path)
    }

    fn set(&self, key: &str, value: &str) -> CaltrackResult<()> {
        let path = self.path_for(key)?;
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4().simple()));

        let _guard = self.write_lock.lock().map_err(|_| poisoned("set"))?;

        std::fs::write(&tmp, value).map_err(|e| {
            storage_error!(format!("Failed to write {}", tmp.display()), "file_store", e)
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            storage_error!(format!("Failed to replace {}", path.display()), "file_store", e)
        })?;

        Ok(())
    }

    fn remove(&self, key: &str) -> CaltrackResult<Option<String>> {
        let path = self.path_for(key)?;

        let _guard = self.write_lock.lock().map_err(|_| poisoned("remove"))?;

        let previous = self.read(&path)?;
        if previous.is_some() {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => {
                    return Err(storage_error!(
                        format!("Failed to remove {}", path.display()),
                        "file_store",
                        e
                    ))
                }
            }
        }

        Ok(previous)
    }
}
