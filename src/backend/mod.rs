//! Persistent index backends.
//!
//! A backend receives batches of [`Entry`] values from the indexing
//! pipeline and, where it persists them, answers key lookups for the blob
//! reader.
//!
//! Writers are driven by exactly one thread at a time (the pipeline's writer
//! routine); they are `Send` but need no internal locking for writes.

pub mod debug;
pub mod ordered_log;
pub mod relational;

pub use debug::DebugWriter;
pub use ordered_log::SledIndex;
pub use relational::{DuplicatePolicy, SqliteIndex};

use crate::entry::{Entry, Span};
use crate::error::{BlobError, Result};

/// Durably stores batches of entries.
pub trait EntryWriter {
    /// Store one batch. Each call is atomic for backends that support it.
    fn write_entries(&mut self, entries: &[Entry]) -> Result<()>;

    /// Flush and release the underlying storage. Safe to call more than once.
    fn close(&mut self) -> Result<()>;
}

/// Resolves a key to the byte range of its record.
pub trait EntryLookup {
    /// `Ok(None)` when the key is not indexed.
    fn lookup(&self, key: &str) -> Result<Option<Span>>;
}

impl<W: EntryWriter + ?Sized> EntryWriter for &mut W {
    fn write_entries(&mut self, entries: &[Entry]) -> Result<()> {
        (**self).write_entries(entries)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

impl<W: EntryWriter + ?Sized> EntryWriter for Box<W> {
    fn write_entries(&mut self, entries: &[Entry]) -> Result<()> {
        (**self).write_entries(entries)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

// ── Backend ─────────────────────────────────────────────────────────

/// The configured backend.
pub enum Backend {
    Sled(SledIndex),
    Sqlite(SqliteIndex),
    Debug(DebugWriter),
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Sled(_) => "sled",
            Backend::Sqlite(_) => "sqlite",
            Backend::Debug(_) => "debug",
        }
    }
}

impl EntryWriter for Backend {
    fn write_entries(&mut self, entries: &[Entry]) -> Result<()> {
        match self {
            Backend::Sled(w) => w.write_entries(entries),
            Backend::Sqlite(w) => w.write_entries(entries),
            Backend::Debug(w) => w.write_entries(entries),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            Backend::Sled(w) => w.close(),
            Backend::Sqlite(w) => w.close(),
            Backend::Debug(w) => w.close(),
        }
    }
}

impl EntryLookup for Backend {
    fn lookup(&self, key: &str) -> Result<Option<Span>> {
        match self {
            Backend::Sled(index) => index.lookup(key),
            Backend::Sqlite(index) => index.lookup(key),
            Backend::Debug(_) => Err(BlobError::LookupUnsupported("debug")),
        }
    }
}
