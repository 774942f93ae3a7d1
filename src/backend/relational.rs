//! Relational index backed by SQLite.
//!
//! Table layout:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS blob (
//!     key    TEXT    NOT NULL PRIMARY KEY,
//!     offset INTEGER NOT NULL,
//!     length INTEGER NOT NULL
//! );
//! ```
//!
//! Every write call is one transaction. With [`DuplicatePolicy::Reject`] a
//! key that is already present aborts the whole batch, so unlike the
//! ordered-log backend re-indexing the same input fails.
//! [`DuplicatePolicy::Overwrite`] switches to last-write-wins.
//!
//! sqlx is async; the index drives it from a private current-thread runtime,
//! so its methods must not be called from inside another tokio runtime.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tokio::runtime::Runtime;
use tracing::debug;

use super::{EntryLookup, EntryWriter};
use crate::entry::{Entry, Span};
use crate::error::{BlobError, Result};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS blob (
    "key"    TEXT    NOT NULL PRIMARY KEY,
    "offset" INTEGER NOT NULL,
    "length" INTEGER NOT NULL
)"#;

const INSERT: &str = r#"INSERT INTO blob ("key", "offset", "length") VALUES (?, ?, ?)"#;
const UPSERT: &str = r#"INSERT OR REPLACE INTO blob ("key", "offset", "length") VALUES (?, ?, ?)"#;
const SELECT: &str = r#"SELECT "offset", "length" FROM blob WHERE "key" = ?"#;
const COUNT: &str = "SELECT COUNT(*) FROM blob";

/// What the relational backend does with a key that is already stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Primary-key violation; the batch's transaction is rolled back.
    #[default]
    Reject,
    /// Replace the stored offset and length.
    Overwrite,
}

pub struct SqliteIndex {
    path: PathBuf,
    duplicates: DuplicatePolicy,
    runtime: Runtime,
    pool: Mutex<Option<OpenPool>>,
}

struct OpenPool {
    pool: SqlitePool,
    /// `CREATE TABLE` has run on this connection.
    writable: bool,
}

impl SqliteIndex {
    /// Create a handle; the database is opened and the table created on
    /// first use.
    pub fn new(path: impl Into<PathBuf>, duplicates: DuplicatePolicy) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            path: path.into(),
            duplicates,
            runtime,
            pool: Mutex::new(None),
        })
    }

    /// Open the database right away.
    pub fn open(path: impl Into<PathBuf>, duplicates: DuplicatePolicy) -> Result<Self> {
        let index = Self::new(path, duplicates)?;
        index.pool()?;
        Ok(index)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn duplicates(&self) -> DuplicatePolicy {
        self.duplicates
    }

    /// Pool for writing; creates the database file and the table if needed.
    fn pool(&self) -> Result<SqlitePool> {
        self.pool_with(true)
    }

    /// Pool for reading; a database that was never written is an error,
    /// not an empty index.
    fn existing_pool(&self) -> Result<SqlitePool> {
        self.pool_with(false)
    }

    fn pool_with(&self, create: bool) -> Result<SqlitePool> {
        let mut slot = self.pool.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(open) = slot.as_mut() {
            if create && !open.writable {
                self.runtime
                    .block_on(sqlx::query(CREATE_TABLE).execute(&open.pool))
                    .map_err(|e| self.open_error(e))?;
                open.writable = true;
            }
            return Ok(open.pool.clone());
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(create);
        let pool = self
            .runtime
            .block_on(async {
                let pool = SqlitePoolOptions::new()
                    .max_connections(1)
                    .connect_with(options)
                    .await?;
                if create {
                    sqlx::query(CREATE_TABLE).execute(&pool).await?;
                }
                Ok::<_, sqlx::Error>(pool)
            })
            .map_err(|e| self.open_error(e))?;

        debug!(path = %self.path.display(), policy = ?self.duplicates, create, "opened sqlite index");
        *slot = Some(OpenPool {
            pool: pool.clone(),
            writable: create,
        });
        Ok(pool)
    }

    fn open_error(&self, err: sqlx::Error) -> BlobError {
        BlobError::BackendOpen {
            path: self.path.clone(),
            reason: err.to_string(),
        }
    }

    /// Number of rows in the table. Fails if the database does not exist.
    pub fn len(&self) -> Result<u64> {
        let pool = self.existing_pool()?;
        let count: i64 = self
            .runtime
            .block_on(async { sqlx::query(COUNT).fetch_one(&pool).await?.try_get(0) })?;
        Ok(count as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn to_sql_int(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| BlobError::ValueOverflow(value))
}

fn from_sql_int(value: i64, what: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| BlobError::CorruptValue(format!("negative {what}: {value}")))
}

impl EntryWriter for SqliteIndex {
    fn write_entries(&mut self, entries: &[Entry]) -> Result<()> {
        let pool = self.pool()?;
        let statement = match self.duplicates {
            DuplicatePolicy::Reject => INSERT,
            DuplicatePolicy::Overwrite => UPSERT,
        };

        self.runtime.block_on(async {
            let mut tx = pool.begin().await?;
            for entry in entries {
                let result = sqlx::query(statement)
                    .bind(&entry.key)
                    .bind(to_sql_int(entry.offset)?)
                    .bind(to_sql_int(entry.length)?)
                    .execute(&mut *tx)
                    .await;
                match result {
                    Ok(_) => {}
                    Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                        // Dropping `tx` rolls the batch back
                        return Err(BlobError::DuplicateKey(entry.key.clone()));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            tx.commit().await?;
            Ok::<(), BlobError>(())
        })
    }

    fn close(&mut self) -> Result<()> {
        let open = self.pool.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(open) = open {
            self.runtime.block_on(open.pool.close());
        }
        Ok(())
    }
}

impl EntryLookup for SqliteIndex {
    fn lookup(&self, key: &str) -> Result<Option<Span>> {
        let pool = self.existing_pool()?;
        let row = self
            .runtime
            .block_on(async { sqlx::query(SELECT).bind(key).fetch_optional(&pool).await })?;
        match row {
            Some(row) => {
                let offset: i64 = row.try_get(0)?;
                let length: i64 = row.try_get(1)?;
                Ok(Some(Span::new(
                    from_sql_int(offset, "offset")?,
                    from_sql_int(length, "length")?,
                )))
            }
            None => Ok(None),
        }
    }
}
