//! BlobStore - blob file plus index behind one lock
//!
//! Lookups share a read lock; an append holds the write lock for its whole
//! duration, so readers never observe an index that points past the end of
//! the file or a file whose tail is being indexed.
//!
//! ```no_run
//! use microblob::{BlobStore, Backend, SledIndex, KeyExtractor, PipelineConfig};
//!
//! let store = BlobStore::new("data.ldj", Backend::Sled(SledIndex::new("data.sled")));
//! let extractor = KeyExtractor::field("id");
//! store.append(std::io::stdin(), &extractor, &PipelineConfig::default()).unwrap();
//! let record = store.get("ai-49-abc").unwrap();
//! ```

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;

use crate::append::{append, AppendSummary};
use crate::backend::{Backend, EntryLookup, EntryWriter};
use crate::blob::BlobFile;
use crate::config::PipelineConfig;
use crate::entry::Span;
use crate::error::Result;
use crate::extract::KeyExtractor;

pub struct BlobStore {
    blob_path: PathBuf,
    backend: RwLock<Backend>,
}

impl BlobStore {
    pub fn new(blob_path: impl Into<PathBuf>, backend: Backend) -> Self {
        Self {
            blob_path: blob_path.into(),
            backend: RwLock::new(backend),
        }
    }

    pub fn blob_path(&self) -> &Path {
        &self.blob_path
    }

    /// Resolve a key to its byte range.
    pub fn lookup(&self, key: &str) -> Result<Option<Span>> {
        let backend = self.backend.read().unwrap_or_else(|e| e.into_inner());
        backend.lookup(key)
    }

    /// Fetch the raw record stored under `key`, delimiter included.
    ///
    /// `Ok(None)` when the key is not indexed.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let backend = self.backend.read().unwrap_or_else(|e| e.into_inner());
        let span = match backend.lookup(key)? {
            Some(span) => span,
            None => {
                debug!(key, "key not indexed");
                return Ok(None);
            }
        };
        let blob = BlobFile::open(&self.blob_path)?;
        Ok(Some(blob.read_span(span)?))
    }

    /// Append records and index them, excluding readers meanwhile.
    pub fn append<R: Read>(
        &self,
        source: R,
        extractor: &KeyExtractor,
        config: &PipelineConfig,
    ) -> Result<AppendSummary> {
        let mut backend = self.backend.write().unwrap_or_else(|e| e.into_inner());
        append(&self.blob_path, source, &mut *backend, extractor, config)
    }

    /// Close the backend and give it back.
    pub fn close(self) -> Result<Backend> {
        let mut backend = self
            .backend
            .into_inner()
            .unwrap_or_else(|e| e.into_inner());
        backend.close()?;
        Ok(backend)
    }
}

impl std::fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match self.backend.try_read() {
            Ok(b) => b.name(),
            Err(_) => "<locked>",
        };
        f.debug_struct("BlobStore")
            .field("blob_path", &self.blob_path)
            .field("backend", &backend)
            .finish()
    }
}
