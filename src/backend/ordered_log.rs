//! Ordered-log key-value index backed by sled.
//!
//! Each write call is one atomic batch. A key written twice keeps the most
//! recent value, so re-indexing the same input is idempotent.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use super::{EntryLookup, EntryWriter};
use crate::codec::{decode_span, encode_span};
use crate::entry::{Entry, Span};
use crate::error::{BlobError, Result};

pub struct SledIndex {
    path: PathBuf,
    /// Opened on first use. `sled::Db` is a cheap handle clone.
    db: Mutex<Option<sled::Db>>,
}

impl SledIndex {
    /// Create a handle; the store at `path` is opened (or created) lazily.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            db: Mutex::new(None),
        }
    }

    /// Open (or create) the store at `path` right away.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let index = Self::new(path);
        index.db()?;
        Ok(index)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Handle for writing; creates the store if it does not exist yet.
    fn db(&self) -> Result<sled::Db> {
        self.db_with(true)
    }

    /// Handle for reading; a store that was never written is an error,
    /// not an empty index.
    fn existing_db(&self) -> Result<sled::Db> {
        self.db_with(false)
    }

    fn db_with(&self, create: bool) -> Result<sled::Db> {
        let mut slot = self.db.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(db) = slot.as_ref() {
            return Ok(db.clone());
        }
        if !create && !self.path.exists() {
            return Err(BlobError::BackendOpen {
                path: self.path.clone(),
                reason: "index does not exist".to_string(),
            });
        }
        let db = sled::open(&self.path).map_err(|e| BlobError::BackendOpen {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        debug!(path = %self.path.display(), "opened sled index");
        *slot = Some(db.clone());
        Ok(db)
    }

    /// Number of keys in the index. Fails if the store does not exist.
    pub fn len(&self) -> Result<usize> {
        Ok(self.existing_db()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl EntryWriter for SledIndex {
    fn write_entries(&mut self, entries: &[Entry]) -> Result<()> {
        let db = self.db()?;
        let mut batch = sled::Batch::default();
        for entry in entries {
            let value = encode_span(entry.offset, entry.length)?;
            batch.insert(entry.key.as_bytes(), &value[..]);
        }
        db.apply_batch(batch)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(db) = db {
            db.flush()?;
        }
        Ok(())
    }
}

impl EntryLookup for SledIndex {
    fn lookup(&self, key: &str) -> Result<Option<Span>> {
        match self.existing_db()?.get(key.as_bytes())? {
            Some(value) => Ok(Some(decode_span(&value)?)),
            None => Ok(None),
        }
    }
}
