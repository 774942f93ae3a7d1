//! microblob - key-addressable store over a file of newline-delimited records
//!
//! Records stay where they are in the blob file. The index maps each key to
//! the offset and length of its record, so a lookup is one positioned read.
//!
//! - [`pipeline`]: parallel (or sequential) indexing of a record stream
//! - [`extract`]: key extraction by pattern or by JSON field
//! - [`backend`]: sled, SQLite and dry-run index backends
//! - [`append`]: grow the blob file and index only the new records
//! - [`blob`] / [`store`]: random-access reads and a locked store wrapper

pub mod append;
pub mod backend;
pub mod blob;
pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod store;

pub use append::{append, AppendSummary};
pub use backend::{
    Backend, DebugWriter, DuplicatePolicy, EntryLookup, EntryWriter, SledIndex, SqliteIndex,
};
pub use blob::BlobFile;
pub use config::{BackendConfig, Config, ExtractorConfig, FailurePolicy, PipelineConfig, RunMode};
pub use entry::{Entry, Span};
pub use error::{BlobError, Result};
pub use extract::{FieldExtractor, KeyExtractor, PatternExtractor};
pub use pipeline::{IndexSummary, Indexer};
pub use store::BlobStore;
