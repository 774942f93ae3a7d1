//! Dry-run writer: prints entries instead of storing them.

use std::io::{self, Write};

use super::EntryWriter;
use crate::entry::Entry;
use crate::error::Result;

/// Writes one `key\toffset\tlength` line per entry.
pub struct DebugWriter {
    out: Box<dyn Write + Send + Sync>,
}

impl DebugWriter {
    pub fn new(out: Box<dyn Write + Send + Sync>) -> Self {
        Self { out }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }
}

impl Default for DebugWriter {
    fn default() -> Self {
        Self::stdout()
    }
}

impl EntryWriter for DebugWriter {
    fn write_entries(&mut self, entries: &[Entry]) -> Result<()> {
        for e in entries {
            writeln!(self.out, "{}\t{}\t{}", e.key, e.offset, e.length)?;
        }
        self.out.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}
