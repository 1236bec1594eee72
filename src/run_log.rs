//! Append-only record of completed cycles.
//!
//! File format (overwritten each session):
//!
//! ```text
//! Tests run:
//! 1
//! 2
//! ...
//! ```
//!
//! Each index is flushed as soon as it is written, so an interrupted session still leaves
//! an accurate count on disk.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::AppResult;

/// First line of every run log.
pub const HEADER: &str = "Tests run:";

/// Line-oriented log of completed cycle indices.
pub struct RunLog<W: Write> {
    writer: W,
    path: Option<PathBuf>,
    records: u32,
}

impl RunLog<BufWriter<File>> {
    /// Create (or truncate) the log file at `path` and write the header.
    pub fn create<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let file = File::create(path.as_ref())?;
        let mut log = Self::from_writer(BufWriter::new(file))?;
        log.path = Some(path.as_ref().to_path_buf());
        debug!(path = %path.as_ref().display(), "Opened run log");
        Ok(log)
    }
}

impl<W: Write> RunLog<W> {
    /// Start a log on an arbitrary writer and write the header.
    pub fn from_writer(mut writer: W) -> AppResult<Self> {
        writeln!(writer, "{}", HEADER)?;
        writer.flush()?;
        Ok(Self {
            writer,
            path: None,
            records: 0,
        })
    }

    /// Append a completed cycle index (1-based).
    pub fn record(&mut self, cycle: u32) -> AppResult<()> {
        writeln!(self.writer, "{}", cycle)?;
        self.writer.flush()?;
        self.records += 1;
        Ok(())
    }

    /// Number of indices written so far.
    pub fn records(&self) -> u32 {
        self.records
    }

    /// Path of the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Flush and hand back the writer.
    pub fn close(mut self) -> AppResult<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_then_indices() {
        let mut log = RunLog::from_writer(Vec::new()).unwrap();
        log.record(1).unwrap();
        log.record(2).unwrap();
        assert_eq!(log.records(), 2);

        let bytes = log.close().unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "Tests run:\n1\n2\n");
    }

    #[test]
    fn empty_log_has_only_header() {
        let log = RunLog::from_writer(Vec::new()).unwrap();
        let bytes = log.close().unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "Tests run:\n");
    }

    #[test]
    fn create_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("droptests.txt");
        std::fs::write(&path, "stale contents\n99\n").unwrap();

        let mut log = RunLog::create(&path).unwrap();
        log.record(1).unwrap();
        assert_eq!(log.path(), Some(path.as_path()));

        // Flushed per record, readable before close
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Tests run:\n1\n");
        log.close().unwrap();
    }
}
