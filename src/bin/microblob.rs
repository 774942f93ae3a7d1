//! microblob - index line-delimited records by key, fetch them by key
//!
//! Usage:
//!   microblob index --backend sled --index data.sled --key-field id < data.ldj
//!   microblob append --blob data.ldj --backend sled --index data.sled --input more.ldj
//!   microblob get --blob data.ldj --backend sled --index data.sled ai-49-abc
//!
//! Logs go to stderr (`RUST_LOG` overrides the default `info` level);
//! stdout carries only data.

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use microblob::{
    BackendConfig, BlobError, BlobStore, Config, DuplicatePolicy, EntryWriter, ExtractorConfig,
    FailurePolicy, Indexer, Result, RunMode,
};

#[derive(Parser, Debug)]
#[command(name = "microblob", version, about = "Key-addressable store over line-delimited records")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index records from a file (or stdin) into the backend
    Index {
        /// Input file; stdin when omitted
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Append records to the blob file and index only the new ones
    Append {
        /// Blob file to grow (created if missing)
        #[arg(long)]
        blob: PathBuf,
        /// Records to append; stdin when omitted
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Print the records stored under the given keys
    Get {
        #[arg(long)]
        blob: PathBuf,
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    Sled,
    Sqlite,
    Debug,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// JSON config file; flags below override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, global = true)]
    backend: Option<BackendKind>,

    /// Index location for the sled and sqlite backends
    #[arg(long, global = true)]
    index: Option<PathBuf>,

    /// Extract keys with this regular expression
    #[arg(long, global = true, conflicts_with = "key_field")]
    key_pattern: Option<String>,

    /// Extract keys from this top-level JSON field
    #[arg(long, global = true)]
    key_field: Option<String>,

    /// Records per work package
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Worker threads (default: available parallelism)
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Index one record at a time, without the worker pool
    #[arg(long, global = true)]
    sequential: bool,

    /// Stop at the first error instead of draining the input
    #[arg(long, global = true)]
    abort_on_error: bool,

    /// Let the sqlite backend replace existing keys instead of failing
    #[arg(long, global = true)]
    overwrite: bool,
}

impl CommonArgs {
    /// Merge the config file (if any) with command-line overrides.
    fn resolve(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_path(path)?,
            None => Config::default(),
        };

        if let Some(pattern) = &self.key_pattern {
            config.extractor = ExtractorConfig::Pattern {
                pattern: pattern.clone(),
            };
        }
        if let Some(name) = &self.key_field {
            config.extractor = ExtractorConfig::Field { name: name.clone() };
        }
        if let Some(n) = self.batch_size {
            config.pipeline.batch_size = n;
        }
        if let Some(n) = self.workers {
            config.pipeline.workers = n;
        }
        if self.sequential {
            config.pipeline.mode = RunMode::Sequential;
        }
        if self.abort_on_error {
            config.pipeline.failure = FailurePolicy::Abort;
        }

        let duplicates = if self.overwrite {
            DuplicatePolicy::Overwrite
        } else {
            DuplicatePolicy::Reject
        };
        if let Some(kind) = self.backend {
            config.backend = match kind {
                BackendKind::Debug => BackendConfig::Debug,
                BackendKind::Sled => BackendConfig::Sled {
                    path: self.index_path()?,
                },
                BackendKind::Sqlite => BackendConfig::Sqlite {
                    path: self.index_path()?,
                    duplicates,
                },
            };
        } else if let Some(path) = &self.index {
            // --index alone retargets whatever backend the config names
            match &mut config.backend {
                BackendConfig::Sled { path: p } => *p = path.clone(),
                BackendConfig::Sqlite { path: p, .. } => *p = path.clone(),
                BackendConfig::Debug => {
                    return Err(BlobError::InvalidConfig(
                        "--index needs --backend sled or sqlite".to_string(),
                    ))
                }
            }
        }
        if self.overwrite {
            if let BackendConfig::Sqlite { duplicates: d, .. } = &mut config.backend {
                *d = DuplicatePolicy::Overwrite;
            }
        }

        config.pipeline.validate()?;
        Ok(config)
    }

    fn index_path(&self) -> Result<PathBuf> {
        self.index
            .clone()
            .ok_or_else(|| BlobError::InvalidConfig("--index is required for this backend".to_string()))
    }
}

fn open_input(path: Option<&PathBuf>) -> Result<Box<dyn io::Read>> {
    Ok(match path {
        Some(p) => Box::new(File::open(p)?),
        None => Box::new(io::stdin().lock()),
    })
}

/// Returns `Ok(false)` when some requested keys were not found.
fn run(cli: Cli) -> Result<bool> {
    let config = cli.common.resolve()?;
    let extractor = config.extractor.build()?;
    let mut backend = config.backend.build()?;
    info!(
        backend = backend.name(),
        extractor = extractor.name(),
        key = extractor.source(),
        "microblob starting"
    );

    match cli.command {
        Command::Index { input } => {
            let reader = BufReader::new(open_input(input.as_ref())?);
            let result = Indexer::new(&extractor, config.pipeline.clone()).run(reader, &mut backend);
            let closed = backend.close();
            let summary = result?;
            closed?;
            info!(records = summary.records, bytes = summary.bytes, "index complete");
        }
        Command::Append { blob, input } => {
            let store = BlobStore::new(blob, backend);
            let result = store.append(open_input(input.as_ref())?, &extractor, &config.pipeline);
            let closed = store.close();
            let summary = result?;
            closed?;
            info!(
                previous_len = summary.previous_len,
                new_len = summary.new_len(),
                records = summary.index.records,
                "append complete"
            );
        }
        Command::Get { blob, keys } => {
            let store = BlobStore::new(blob, backend);
            let stdout = io::stdout();
            let mut out = stdout.lock();
            let mut missing = 0usize;
            for key in &keys {
                match store.get(key)? {
                    Some(record) => out.write_all(&record)?,
                    None => {
                        error!(key = %key, "key not found");
                        missing += 1;
                    }
                }
            }
            out.flush()?;
            store.close()?;
            return Ok(missing == 0);
        }
    }
    Ok(true)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            error!(code = e.code(), "{}", e);
            ExitCode::FAILURE
        }
    }
}
