//! Random-access reads from the blob file.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::entry::Span;
use crate::error::{BlobError, Result};

/// Read-only handle on the blob file. Positioned reads take `&self`, so one
/// handle can be shared by many readers.
pub struct BlobFile {
    path: PathBuf,
    file: File,
}

impl BlobFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file size. Re-read on every call so appended bytes show up.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Read exactly `length` bytes at `offset`.
    ///
    /// Fails with `OutOfRange` when the file is shorter than
    /// `offset + length`, which means the index and the file disagree.
    pub fn read_range(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let size = self.len()?;
        let end = offset
            .checked_add(length)
            .ok_or(BlobError::OutOfRange { offset, length, size })?;
        if end > size {
            return Err(BlobError::OutOfRange { offset, length, size });
        }
        let mut buf = vec![0u8; length as usize];
        self.file.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }

    pub fn read_span(&self, span: Span) -> Result<Vec<u8>> {
        self.read_range(span.offset, span.length)
    }
}
