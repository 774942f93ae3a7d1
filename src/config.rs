//! Configuration for the indexing pipeline, key extraction and backends.
//!
//! All types deserialize from JSON, e.g.
//!
//! ```json
//! {
//!   "pipeline": { "batch_size": 50000, "workers": 0, "mode": "parallel", "failure": "drain" },
//!   "extractor": { "type": "field", "name": "finc.record_id" },
//!   "backend": { "type": "sqlite", "path": "index.db", "duplicates": "reject" }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::{Backend, DebugWriter, DuplicatePolicy, SledIndex, SqliteIndex};
use crate::error::{BlobError, Result};
use crate::extract::{KeyExtractor, DEFAULT_KEY_PATTERN};

/// Records per work package when none is configured.
pub const DEFAULT_BATCH_SIZE: usize = 50_000;

// ── Pipeline ────────────────────────────────────────────────────────

/// Whether records are fanned out to a worker pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Parallel,
    /// One record at a time on the calling thread.
    Sequential,
}

/// What the parallel pipeline does after the first error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Keep reading and writing until the input is exhausted, then report
    /// the first error.
    #[default]
    Drain,
    /// Stop producing packages and stop writing once an error is recorded.
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Records per work package.
    pub batch_size: usize,
    /// Worker threads; 0 uses the host's available parallelism.
    pub workers: usize,
    pub mode: RunMode,
    pub failure: FailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            workers: 0,
            mode: RunMode::Parallel,
            failure: FailurePolicy::Drain,
        }
    }
}

impl PipelineConfig {
    pub fn sequential() -> Self {
        Self {
            mode: RunMode::Sequential,
            ..Self::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_failure(mut self, failure: FailurePolicy) -> Self {
        self.failure = failure;
        self
    }

    /// Number of worker threads to start.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(BlobError::InvalidConfig("batch_size must be at least 1".to_string()));
        }
        Ok(())
    }
}

// ── Extractor ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExtractorConfig {
    /// First match of a regular expression.
    Pattern { pattern: String },
    /// Top-level field of a JSON object.
    Field { name: String },
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        ExtractorConfig::Pattern {
            pattern: DEFAULT_KEY_PATTERN.to_string(),
        }
    }
}

impl ExtractorConfig {
    pub fn build(&self) -> Result<KeyExtractor> {
        match self {
            ExtractorConfig::Pattern { pattern } => {
                if pattern.is_empty() {
                    return Err(BlobError::InvalidConfig("key pattern is empty".to_string()));
                }
                KeyExtractor::pattern(pattern)
            }
            ExtractorConfig::Field { name } => {
                if name.is_empty() {
                    return Err(BlobError::InvalidConfig("key field name is empty".to_string()));
                }
                Ok(KeyExtractor::field(name.clone()))
            }
        }
    }
}

// ── Backend ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Sled {
        path: PathBuf,
    },
    Sqlite {
        path: PathBuf,
        #[serde(default)]
        duplicates: DuplicatePolicy,
    },
    /// Print entries to stdout.
    #[default]
    Debug,
}

impl BackendConfig {
    /// Build the backend. Storage is opened lazily on first use.
    pub fn build(&self) -> Result<Backend> {
        Ok(match self {
            BackendConfig::Sled { path } => Backend::Sled(SledIndex::new(path)),
            BackendConfig::Sqlite { path, duplicates } => {
                Backend::Sqlite(SqliteIndex::new(path, *duplicates)?)
            }
            BackendConfig::Debug => Backend::Debug(DebugWriter::stdout()),
        })
    }
}

// ── Config ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub extractor: ExtractorConfig,
    pub backend: BackendConfig,
}

impl Config {
    /// Load a JSON config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&text)
            .map_err(|e| BlobError::InvalidConfig(format!("{}: {}", path.as_ref().display(), e)))?;
        config.pipeline.validate()?;
        Ok(config)
    }
}
