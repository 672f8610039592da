//! In-memory File Store
//!
//! Named byte blobs shared by every session. Reads go through a forward-only
//! [`FileReader`] that yields fixed-size chunks; writes go through an append-only
//! [`FileWriter`]. Files are never overwritten: a name is either absent or holds
//! bytes that only grow while its writer is alive.
//!
//! A writer reserves its name for as long as it lives, so two concurrent write
//! requests for the same new file cannot interleave their blocks.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::protocol::TftpErrorCode;

/// Errors returned by [`FileStore`] and its handles
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} access violation")]
    AccessViolation(String),

    #[error("{name} would exceed the {limit}-byte file size limit")]
    DiskFull { name: String, limit: usize },
}

impl StoreError {
    /// The error code reported to a TFTP client for this failure
    pub fn error_code(&self) -> TftpErrorCode {
        match self {
            Self::NotFound(_) => TftpErrorCode::FileNotFound,
            Self::AlreadyExists(_) => TftpErrorCode::FileAlreadyExists,
            Self::AccessViolation(_) => TftpErrorCode::AccessViolation,
            Self::DiskFull { .. } => TftpErrorCode::DiskFull,
        }
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    files: HashMap<String, Vec<u8>>,
    // Names with a live FileWriter.
    writing: HashSet<String>,
}

/// Shared, cloneable handle to the file map
#[derive(Debug, Clone, Default)]
pub struct FileStore {
    inner: Arc<Mutex<StoreInner>>,
    max_file_size: Option<usize>,
}

impl FileStore {
    /// Create an empty, unbounded store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store whose files may not grow past `limit` bytes
    pub fn with_max_file_size(limit: usize) -> Self {
        Self {
            inner: Arc::default(),
            max_file_size: Some(limit),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.lock().files.contains_key(name)
    }

    /// Open `name` for reading in chunks of `chunk_size` bytes
    ///
    /// # Examples
    /// ```
    /// use tftp::FileStore;
    ///
    /// let store = FileStore::new();
    /// assert!(store.open_read("missing", 512).is_err());
    /// ```
    pub fn open_read(&self, name: &str, chunk_size: usize) -> Result<FileReader, StoreError> {
        if !self.exists(name) {
            return Err(StoreError::NotFound(name.to_string()));
        }
        Ok(FileReader {
            store: self.clone(),
            name: name.to_string(),
            chunk_size,
            position: 0,
        })
    }

    /// Open `name` for appending
    ///
    /// Fails if the file exists or another writer already holds the name.
    pub fn open_write(&self, name: &str) -> Result<FileWriter, StoreError> {
        let mut inner = self.lock();
        if inner.files.contains_key(name) || !inner.writing.insert(name.to_string()) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        Ok(FileWriter {
            store: self.clone(),
            name: name.to_string(),
        })
    }

    /// Name → size of every stored file
    pub fn snapshot(&self) -> BTreeMap<String, usize> {
        self.lock()
            .files
            .iter()
            .map(|(name, content)| (name.clone(), content.len()))
            .collect()
    }

    /// Remove every file
    ///
    /// Not coordinated with running sessions: readers fail with an access
    /// violation on their next chunk, writers keep appending to a fresh entry.
    pub fn clear(&self) {
        self.lock().files.clear();
    }
}

/// Forward-only chunked reader over one stored file
#[derive(Debug)]
pub struct FileReader {
    store: FileStore,
    name: String,
    chunk_size: usize,
    position: usize,
}

impl FileReader {
    /// Return the next chunk of at most `chunk_size` bytes
    ///
    /// `Ok(None)` marks the end of the file, and keeps being returned on
    /// every later call.
    pub fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, StoreError> {
        let inner = self.store.lock();
        let content = inner
            .files
            .get(&self.name)
            .ok_or_else(|| StoreError::AccessViolation(self.name.clone()))?;

        if self.position >= content.len() {
            return Ok(None);
        }
        let end = content.len().min(self.position + self.chunk_size);
        let chunk = content[self.position..end].to_vec();
        self.position = end;
        Ok(Some(chunk))
    }
}

/// Append-only writer holding the write reservation for one name
#[derive(Debug)]
pub struct FileWriter {
    store: FileStore,
    name: String,
}

impl FileWriter {
    /// Append `buf` to the file, creating the entry on first write
    ///
    /// A write rejected by the size limit leaves the store untouched.
    pub fn write(&mut self, buf: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.store.lock();
        let current_len = inner.files.get(&self.name).map_or(0, Vec::len);
        if let Some(limit) = self.store.max_file_size
            && current_len + buf.len() > limit
        {
            return Err(StoreError::DiskFull {
                name: self.name.clone(),
                limit,
            });
        }
        inner
            .files
            .entry(self.name.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(())
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        self.store.lock().writing.remove(&self.name);
    }
}
