//! Append/merge: grow the blob file and index only the new bytes.
//!
//! 1. Remember the current blob length `L`.
//! 2. Copy the new records verbatim to the end of the file.
//! 3. Index `[L, L + copied)` into the existing backend, with offsets
//!    starting at `L`.
//!
//! The new slice is read back from the blob file itself, so the offsets
//! always describe bytes that are on disk.
//!
//! If indexing fails part way, the file keeps the appended bytes and the
//! index keeps every batch that was written; re-running the append over the
//! same source after fixing the cause repairs the index for backends with
//! last-write-wins semantics. Callers that serve reads concurrently must hold
//! exclusive access for the whole call (see [`crate::store::BlobStore`]).

use std::fs::OpenOptions;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::Path;

use tracing::{info, warn};

use crate::backend::EntryWriter;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::extract::KeyExtractor;
use crate::pipeline::{IndexSummary, Indexer};

/// Result of one append.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendSummary {
    /// Blob length before the append; offset of the first new record.
    pub previous_len: u64,
    /// Bytes copied onto the end of the blob file.
    pub appended_bytes: u64,
    pub index: IndexSummary,
}

impl AppendSummary {
    pub fn new_len(&self) -> u64 {
        self.previous_len + self.appended_bytes
    }
}

/// Append `source` to the blob file at `blob_path` (created if missing) and
/// index the appended records into `writer`.
///
/// The writer is not closed.
pub fn append<R, W>(
    blob_path: impl AsRef<Path>,
    mut source: R,
    writer: &mut W,
    extractor: &KeyExtractor,
    config: &PipelineConfig,
) -> Result<AppendSummary>
where
    R: Read,
    W: EntryWriter + Send + ?Sized,
{
    let blob_path = blob_path.as_ref();
    config.validate()?;

    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(blob_path)?;
    let previous_len = file.metadata()?.len();

    if previous_len > 0 {
        let mut last = [0u8; 1];
        file.read_exact_at(&mut last, previous_len - 1)?;
        if last[0] != b'\n' {
            warn!(
                path = %blob_path.display(),
                len = previous_len,
                "blob file does not end with a newline; first appended record joins its tail"
            );
        }
    }

    let appended_bytes = io::copy(&mut source, &mut file)?;
    file.sync_data()?;
    info!(
        path = %blob_path.display(),
        previous_len,
        appended_bytes,
        "appended to blob file"
    );

    file.seek(SeekFrom::Start(previous_len))?;
    let new_slice = BufReader::new(file.take(appended_bytes));
    let index = Indexer::new(extractor, config.clone())
        .with_start_offset(previous_len)
        .run(new_slice, writer)?;

    Ok(AppendSummary {
        previous_len,
        appended_bytes,
        index,
    })
}
