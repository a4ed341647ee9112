//! CSV sink and log file naming
//!
//! Logs are header-less CSV: one row per record (snapshots) or per
//! stream entry, columns in buffer/field order. File names carry the
//! epoch second so logs sort chronologically and never collide.

use chrono::Utc;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::RowSink;
use crate::protocol::RecordValue;
use crate::snapshot::BufferSnapshot;

/// Buffered CSV writer implementing [`RowSink`]
pub struct CsvWriter<W: Write> {
    out: W,
}

impl CsvWriter<BufWriter<File>> {
    /// Create a CSV log file at `path`
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> CsvWriter<W> {
    /// Wrap any writer
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Flush buffered rows to the underlying writer
    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

impl<W: Write> RowSink for CsvWriter<W> {
    fn write_row(&mut self, row: &[RecordValue]) -> io::Result<()> {
        for (i, value) in row.iter().enumerate() {
            if i > 0 {
                write!(self.out, ",")?;
            }
            write!(self.out, "{}", value)?;
        }
        writeln!(self.out)
    }
}

/// Write a buffer snapshot as CSV rows, transposing columns
pub fn write_snapshot_csv<W: Write>(out: W, snapshot: &BufferSnapshot) -> io::Result<()> {
    let mut writer = CsvWriter::new(out);
    for row in snapshot.rows() {
        writer.write_row(&row)?;
    }
    writer.flush()
}

/// Path for a buffer snapshot log inside `dir`
pub fn buffers_log_path(dir: &Path) -> PathBuf {
    dir.join(format!("buffers_log_{}.csv", Utc::now().timestamp()))
}

/// Path for a stream log inside `dir`
pub fn stream_log_path(dir: &Path, stream_id: u8) -> PathBuf {
    dir.join(format!(
        "stream_id_{}_log_{}.csv",
        stream_id,
        Utc::now().timestamp()
    ))
}

/// Path for a converted timeline-event log inside `dir`
pub fn trace_log_path(dir: &Path) -> PathBuf {
    dir.join(format!("trace_log_{}.json", Utc::now().timestamp()))
}
