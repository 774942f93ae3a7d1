//! Indexing pipeline: newline-delimited records in, index entries out.
//!
//! ## Parallel mode
//!
//! ```text
//!  reader (caller thread) ──WorkPackage──▶ N workers ──Vec<Entry>──▶ writer thread ──▶ backend
//! ```
//!
//! - The reader is the only thread that sees the byte stream. It groups
//!   records into packages of `batch_size` and stamps each package with the
//!   absolute offset of its first record, so package offsets are correct
//!   without any coordination between workers.
//! - A worker walks its package in order; record offsets are the package
//!   offset plus the lengths of the records before it.
//! - The writer thread is the only caller of the backend. Packages may
//!   arrive in any order; backends are keyed, not positional.
//! - All hand-offs are rendezvous channels, so the reader cannot run ahead
//!   of the workers and the workers cannot run ahead of the writer.
//!
//! The first error (extraction or backend) wins and is returned once the
//! run is over. With [`FailurePolicy::Drain`] the whole input is still
//! consumed; with [`FailurePolicy::Abort`] the reader stops at the next
//! package boundary and the remaining packages are dropped. I/O errors
//! while reading the input end the run immediately.
//!
//! ## Sequential mode
//!
//! Same extraction and offset bookkeeping on the calling thread, one entry
//! per backend write, returning on the first error.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::backend::EntryWriter;
use crate::config::{FailurePolicy, PipelineConfig, RunMode};
use crate::entry::Entry;
use crate::error::{BlobError, Result};
use crate::extract::KeyExtractor;

/// Counters of a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexSummary {
    /// Complete records read from the input.
    pub records: u64,
    /// Bytes covered by those records.
    pub bytes: u64,
    /// Work packages handed to workers (0 in sequential mode).
    pub packages: u64,
    /// Entries the backend accepted.
    pub entries_written: u64,
}

/// Records plus the absolute offset of the first one. Consumed by exactly
/// one worker.
struct WorkPackage {
    records: Vec<Vec<u8>>,
    offset: u64,
}

// ── First error ────────────────────────────────────────────────────

/// Race-free "first error wins" slot shared by workers and the writer.
struct FirstError {
    slot: OnceLock<BlobError>,
    cancelled: AtomicBool,
    abort: bool,
}

impl FirstError {
    fn new(policy: FailurePolicy) -> Self {
        Self {
            slot: OnceLock::new(),
            cancelled: AtomicBool::new(false),
            abort: policy == FailurePolicy::Abort,
        }
    }

    fn record(&self, err: BlobError) {
        match self.slot.set(err) {
            Ok(()) => {
                if let Some(first) = self.slot.get() {
                    warn!(error = %first, code = first.code(), "indexing error recorded");
                }
            }
            Err(later) => debug!(error = %later, "further indexing error ignored"),
        }
        if self.abort {
            self.cancelled.store(true, Ordering::Release);
        }
    }

    fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn into_inner(self) -> Option<BlobError> {
        self.slot.into_inner()
    }
}

// ── Record reader ──────────────────────────────────────────────────

/// Read the next newline-terminated record, delimiter included.
///
/// A trailing fragment without a newline is not a record and ends the
/// stream.
fn next_record<R: BufRead>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut record = Vec::new();
    let n = reader.read_until(b'\n', &mut record)?;
    if n == 0 {
        return Ok(None);
    }
    if record.last() != Some(&b'\n') {
        warn!(bytes = n, "ignoring unterminated trailing fragment");
        return Ok(None);
    }
    Ok(Some(record))
}

// ── Indexer ────────────────────────────────────────────────────────

/// Turns a record stream into entries for one backend.
pub struct Indexer<'a> {
    extractor: &'a KeyExtractor,
    config: PipelineConfig,
    start_offset: u64,
}

impl<'a> Indexer<'a> {
    pub fn new(extractor: &'a KeyExtractor, config: PipelineConfig) -> Self {
        Self {
            extractor,
            config,
            start_offset: 0,
        }
    }

    /// Offset of the first record, e.g. the blob length before an append.
    pub fn with_start_offset(mut self, offset: u64) -> Self {
        self.start_offset = offset;
        self
    }

    /// Index everything `reader` yields into `writer`.
    ///
    /// The writer is not closed.
    pub fn run<R, W>(&self, reader: R, writer: &mut W) -> Result<IndexSummary>
    where
        R: BufRead,
        W: EntryWriter + Send + ?Sized,
    {
        self.config.validate()?;
        let summary = match self.config.mode {
            RunMode::Parallel => self.run_parallel(reader, writer)?,
            RunMode::Sequential => self.run_sequential(reader, writer)?,
        };
        info!(
            records = summary.records,
            bytes = summary.bytes,
            packages = summary.packages,
            entries = summary.entries_written,
            "indexing finished"
        );
        Ok(summary)
    }

    fn run_sequential<R, W>(&self, mut reader: R, writer: &mut W) -> Result<IndexSummary>
    where
        R: BufRead,
        W: EntryWriter + ?Sized,
    {
        info!(
            extractor = self.extractor.name(),
            offset = self.start_offset,
            "sequential indexing started"
        );
        let mut summary = IndexSummary::default();
        let mut offset = self.start_offset;
        while let Some(record) = next_record(&mut reader)? {
            let key = self.extractor.extract(&record)?;
            let length = record.len() as u64;
            writer.write_entries(&[Entry { key, offset, length }])?;
            offset += length;
            summary.records += 1;
            summary.bytes += length;
            summary.entries_written += 1;
        }
        Ok(summary)
    }

    fn run_parallel<R, W>(&self, mut reader: R, writer: &mut W) -> Result<IndexSummary>
    where
        R: BufRead,
        W: EntryWriter + Send + ?Sized,
    {
        let workers = self.config.worker_count();
        info!(
            workers,
            batch_size = self.config.batch_size,
            extractor = self.extractor.name(),
            offset = self.start_offset,
            failure = ?self.config.failure,
            "parallel indexing started"
        );

        let errors = FirstError::new(self.config.failure);
        let extractor = self.extractor;

        let (produced, written, panicked) = thread::scope(|s| {
            let (work_tx, work_rx) = bounded::<WorkPackage>(0);
            let (entries_tx, entries_rx) = bounded::<Vec<Entry>>(0);
            let errors = &errors;

            let collector = s.spawn(move || collect(entries_rx, writer, errors));

            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    let queue = work_rx.clone();
                    let sink = entries_tx.clone();
                    s.spawn(move || work(queue, sink, extractor, errors))
                })
                .collect();
            drop(work_rx);

            let produced = self.produce(&mut reader, &work_tx, errors);
            drop(work_tx);

            // Barrier: every worker is done before the entries channel closes.
            let mut panicked = None;
            for handle in handles {
                if handle.join().is_err() {
                    panicked = Some("worker");
                }
            }
            drop(entries_tx);

            let written = match collector.join() {
                Ok(n) => n,
                Err(_) => {
                    panicked = Some("writer");
                    0
                }
            };
            (produced, written, panicked)
        });

        if let Some(which) = panicked {
            return Err(BlobError::WorkerPanicked(which));
        }
        let mut summary = produced?;
        if let Some(err) = errors.into_inner() {
            return Err(err);
        }
        summary.entries_written = written;
        Ok(summary)
    }

    /// Sequential reader: cut the stream into packages with absolute offsets.
    fn produce<R: BufRead>(
        &self,
        reader: &mut R,
        work: &Sender<WorkPackage>,
        errors: &FirstError,
    ) -> Result<IndexSummary> {
        let batch_size = self.config.batch_size;
        let mut summary = IndexSummary::default();
        let mut offset = self.start_offset;
        let mut batch: Vec<Vec<u8>> = Vec::new();
        let mut batch_len = 0u64;

        let mut send = |batch: Vec<Vec<u8>>, batch_len: u64, summary: &mut IndexSummary| {
            debug!(records = batch.len(), offset, "dispatching work package");
            work.send(WorkPackage {
                records: batch,
                offset,
            })
            .map_err(|_| BlobError::WorkerPanicked("worker"))?;
            offset += batch_len;
            summary.packages += 1;
            Ok::<(), BlobError>(())
        };

        while let Some(record) = next_record(reader)? {
            summary.records += 1;
            summary.bytes += record.len() as u64;
            batch_len += record.len() as u64;
            batch.push(record);

            if batch.len() == batch_size {
                if errors.cancelled() {
                    debug!("reader stopping after cancellation");
                    return Ok(summary);
                }
                send(std::mem::take(&mut batch), batch_len, &mut summary)?;
                batch_len = 0;
            }
        }

        if !batch.is_empty() && !errors.cancelled() {
            send(batch, batch_len, &mut summary)?;
        }
        Ok(summary)
    }
}

/// Worker loop: extract keys for each package and forward the entries.
///
/// On an extraction error the package's entries up to the failing record
/// are still forwarded.
fn work(
    queue: Receiver<WorkPackage>,
    sink: Sender<Vec<Entry>>,
    extractor: &KeyExtractor,
    errors: &FirstError,
) {
    for package in queue {
        if errors.cancelled() {
            continue;
        }
        let mut entries = Vec::with_capacity(package.records.len());
        let mut offset = package.offset;
        for record in &package.records {
            let key = match extractor.extract(record) {
                Ok(key) => key,
                Err(err) => {
                    errors.record(err);
                    break;
                }
            };
            let length = record.len() as u64;
            entries.push(Entry { key, offset, length });
            offset += length;
        }
        if sink.send(entries).is_err() {
            break;
        }
    }
}

/// Writer loop: the single caller of the backend. Returns the number of
/// entries written.
fn collect<W: EntryWriter + ?Sized>(
    batches: Receiver<Vec<Entry>>,
    writer: &mut W,
    errors: &FirstError,
) -> u64 {
    let mut written = 0;
    for batch in batches {
        if batch.is_empty() || errors.cancelled() {
            continue;
        }
        match writer.write_entries(&batch) {
            Ok(()) => written += batch.len() as u64,
            Err(err) => errors.record(err),
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{self, BufReader, Cursor, Read};

    /// Collects every batch it is given.
    #[derive(Default)]
    struct Recorder {
        batches: Vec<Vec<Entry>>,
        fail_on: Option<String>,
    }

    impl Recorder {
        fn entries(&self) -> Vec<Entry> {
            let mut all: Vec<Entry> = self.batches.iter().flatten().cloned().collect();
            all.sort_by_key(|e| e.offset);
            all
        }
    }

    impl EntryWriter for Recorder {
        fn write_entries(&mut self, entries: &[Entry]) -> Result<()> {
            if let Some(bad) = &self.fail_on {
                if entries.iter().any(|e| &e.key == bad) {
                    return Err(BlobError::DuplicateKey(bad.clone()));
                }
            }
            self.batches.push(entries.to_vec());
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn lines(n: usize) -> String {
        (0..n).map(|i| format!("{{\"id\":\"k{i}\",\"pad\":\"{}\"}}\n", "x".repeat(i % 7))).collect()
    }

    #[test]
    fn test_three_records_batch_of_two() {
        let input = "{\"id\":\"a\"}\n{\"id\":\"b\"}\n{\"id\":\"c\"}\n";
        let extractor = KeyExtractor::field("id");
        let config = PipelineConfig::default().with_batch_size(2).with_workers(2);
        let mut rec = Recorder::default();

        let summary = Indexer::new(&extractor, config)
            .run(Cursor::new(input), &mut rec)
            .unwrap();

        assert_eq!(
            rec.entries(),
            vec![Entry::new("a", 0, 11), Entry::new("b", 11, 11), Entry::new("c", 22, 11)]
        );
        assert_eq!(summary.records, 3);
        assert_eq!(summary.bytes, 33);
        assert_eq!(summary.packages, 2);
        assert_eq!(summary.entries_written, 3);
        // Order inside a package is preserved
        assert!(rec.batches.iter().any(|b| b.len() == 2 && b[0].key == "a" && b[1].key == "b"));
    }

    #[test]
    fn test_offsets_contiguous_across_packages() {
        let input = lines(1000);
        let extractor = KeyExtractor::field("id");
        let config = PipelineConfig::default().with_batch_size(7).with_workers(4);
        let mut rec = Recorder::default();

        let summary = Indexer::new(&extractor, config)
            .run(Cursor::new(input.as_bytes()), &mut rec)
            .unwrap();
        assert_eq!(summary.packages, 143);

        let entries = rec.entries();
        assert_eq!(entries.len(), 1000);
        assert_eq!(entries[0].offset, 0);
        for pair in entries.windows(2) {
            assert_eq!(pair[0].offset + pair[0].length, pair[1].offset);
        }
        let last = entries.last().unwrap();
        assert_eq!(last.offset + last.length, input.len() as u64);

        for e in &entries {
            let bytes = &input.as_bytes()[e.offset as usize..(e.offset + e.length) as usize];
            assert_eq!(extractor.extract(bytes).unwrap(), e.key);
            assert_eq!(*bytes.last().unwrap(), b'\n');
        }
    }

    #[test]
    fn test_sequential_matches_parallel() {
        let input = lines(50);
        let extractor = KeyExtractor::field("id");

        let mut parallel = Recorder::default();
        Indexer::new(&extractor, PipelineConfig::default().with_batch_size(3))
            .run(Cursor::new(input.as_bytes()), &mut parallel)
            .unwrap();

        let mut sequential = Recorder::default();
        let summary = Indexer::new(&extractor, PipelineConfig::sequential())
            .run(Cursor::new(input.as_bytes()), &mut sequential)
            .unwrap();

        assert_eq!(parallel.entries(), sequential.entries());
        assert_eq!(summary.packages, 0);
        assert!(sequential.batches.iter().all(|b| b.len() == 1));
    }

    #[test]
    fn test_start_offset_is_applied() {
        let extractor = KeyExtractor::field("id");
        let mut rec = Recorder::default();
        Indexer::new(&extractor, PipelineConfig::default())
            .with_start_offset(1000)
            .run(Cursor::new("{\"id\":\"a\"}\n{\"id\":\"b\"}\n"), &mut rec)
            .unwrap();
        assert_eq!(
            rec.entries(),
            vec![Entry::new("a", 1000, 11), Entry::new("b", 1011, 11)]
        );
    }

    #[test]
    fn test_empty_input() {
        let extractor = KeyExtractor::default();
        let mut rec = Recorder::default();
        let summary = Indexer::new(&extractor, PipelineConfig::default())
            .run(Cursor::new(""), &mut rec)
            .unwrap();
        assert_eq!(summary, IndexSummary::default());
        assert!(rec.batches.is_empty());
    }

    #[test]
    fn test_unterminated_tail_is_not_indexed() {
        let extractor = KeyExtractor::field("id");
        let mut rec = Recorder::default();
        let summary = Indexer::new(&extractor, PipelineConfig::default())
            .run(Cursor::new("{\"id\":\"a\"}\n{\"id\":\"b\"}"), &mut rec)
            .unwrap();
        assert_eq!(summary.records, 1);
        assert_eq!(summary.bytes, 11);
        assert_eq!(rec.entries(), vec![Entry::new("a", 0, 11)]);
    }

    #[test]
    fn test_missing_key_drains_remaining_input() {
        // Record 3 (second package) lacks the field
        let input = "{\"id\":\"a\"}\n{\"id\":\"b\"}\n{\"x\":1}\n{\"id\":\"d\"}\n{\"id\":\"e\"}\n{\"id\":\"f\"}\n";
        let extractor = KeyExtractor::field("id");
        let config = PipelineConfig::default().with_batch_size(2).with_workers(1);
        let mut rec = Recorder::default();

        let err = Indexer::new(&extractor, config)
            .run(Cursor::new(input), &mut rec)
            .unwrap_err();
        assert!(matches!(err, BlobError::KeyNotFound { .. }));

        // Packages before and after the failure are written; the failing
        // package stops at the bad record.
        let keys: Vec<String> = rec.entries().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["a", "b", "e", "f"]);
    }

    #[test]
    fn test_partial_package_forwarded() {
        let input = "{\"id\":\"a\"}\n{\"id\":\"b\"}\nnot json\n{\"id\":\"d\"}\n";
        let extractor = KeyExtractor::field("id");
        let config = PipelineConfig::default().with_batch_size(10).with_workers(1);
        let mut rec = Recorder::default();

        let err = Indexer::new(&extractor, config)
            .run(Cursor::new(input), &mut rec)
            .unwrap_err();
        assert!(matches!(err, BlobError::Parse(_)));
        assert_eq!(rec.entries(), vec![Entry::new("a", 0, 11), Entry::new("b", 11, 11)]);
    }

    #[test]
    fn test_sequential_stops_at_first_error() {
        let input = "{\"id\":\"a\"}\n{\"x\":1}\n{\"id\":\"c\"}\n";
        let extractor = KeyExtractor::field("id");
        let mut rec = Recorder::default();
        let err = Indexer::new(&extractor, PipelineConfig::sequential())
            .run(Cursor::new(input), &mut rec)
            .unwrap_err();
        assert!(matches!(err, BlobError::KeyNotFound { .. }));
        assert_eq!(rec.entries(), vec![Entry::new("a", 0, 11)]);
    }

    #[test]
    fn test_backend_error_is_reported_after_drain() {
        let input = lines(20);
        let extractor = KeyExtractor::field("id");
        let config = PipelineConfig::default().with_batch_size(5).with_workers(3);
        let mut rec = Recorder {
            fail_on: Some("k7".to_string()),
            ..Recorder::default()
        };

        let err = Indexer::new(&extractor, config)
            .run(Cursor::new(input.as_bytes()), &mut rec)
            .unwrap_err();
        assert!(matches!(err, BlobError::DuplicateKey(ref k) if k == "k7"));
        // The other three packages still reach the backend
        assert_eq!(rec.batches.len(), 3);
        assert_eq!(rec.entries().len(), 15);
    }

    #[test]
    fn test_abort_policy_stops_early() {
        let mut input = String::from("{\"x\":1}\n");
        input.push_str(&lines(500));
        let extractor = KeyExtractor::field("id");
        let config = PipelineConfig::default()
            .with_batch_size(1)
            .with_workers(1)
            .with_failure(FailurePolicy::Abort);
        let mut rec = Recorder::default();

        let err = Indexer::new(&extractor, config)
            .run(Cursor::new(input.as_bytes()), &mut rec)
            .unwrap_err();
        assert!(matches!(err, BlobError::KeyNotFound { .. }));
        // A few packages may be in flight when the error lands, not all 500.
        assert!(rec.entries().len() < 500);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let extractor = KeyExtractor::default();
        let mut rec = Recorder::default();
        let err = Indexer::new(&extractor, PipelineConfig::default().with_batch_size(0))
            .run(Cursor::new("a\n"), &mut rec)
            .unwrap_err();
        assert!(matches!(err, BlobError::InvalidConfig(_)));
    }

    /// Yields some data, then fails.
    struct FailingReader {
        data: Cursor<Vec<u8>>,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.data.read(buf)?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "disk on fire"));
            }
            Ok(n)
        }
    }

    #[test]
    fn test_read_error_aborts_run() {
        let extractor = KeyExtractor::field("id");
        let reader = BufReader::new(FailingReader {
            data: Cursor::new(lines(10).into_bytes()),
        });
        let mut rec = Recorder::default();
        let err = Indexer::new(&extractor, PipelineConfig::default().with_batch_size(4))
            .run(reader, &mut rec)
            .unwrap_err();
        assert!(matches!(err, BlobError::Io(_)));
    }

    #[test]
    fn test_duplicate_keys_pass_through() {
        let input = "{\"id\":\"a\"}\n{\"id\":\"a\"}\n";
        let extractor = KeyExtractor::field("id");
        let mut rec = Recorder::default();
        Indexer::new(&extractor, PipelineConfig::default())
            .run(Cursor::new(input), &mut rec)
            .unwrap();

        let by_key: HashMap<_, _> = rec.entries().into_iter().map(|e| (e.offset, e.key)).collect();
        assert_eq!(by_key.len(), 2);
        assert!(by_key.values().all(|k| k == "a"));
    }

    /// Writer that dies on its first batch.
    struct Exploding;

    impl EntryWriter for Exploding {
        fn write_entries(&mut self, _entries: &[Entry]) -> Result<()> {
            panic!("backend blew up");
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_writer_panic_surfaces_without_hanging() {
        let input = lines(20);
        let extractor = KeyExtractor::field("id");
        let config = PipelineConfig::default().with_batch_size(3).with_workers(2);

        let err = Indexer::new(&extractor, config)
            .run(Cursor::new(input.as_bytes()), &mut Exploding)
            .unwrap_err();
        assert!(matches!(err, BlobError::WorkerPanicked("writer")), "got {:?}", err);
    }
}
