//! Persisted log formats
//!
//! Sinks the protocol readers write decoded rows into, plus the
//! epoch-stamped file naming the log directory uses.

mod format;

pub use format::{
    buffers_log_path, stream_log_path, trace_log_path, write_snapshot_csv, CsvWriter,
};

use std::io;

use crate::protocol::RecordValue;

/// A sink for decoded record rows.
///
/// The buffer and stream readers hand rows over as they are decoded;
/// rows written before a failure are retained, never rolled back.
pub trait RowSink {
    /// Write one row of typed records
    fn write_row(&mut self, row: &[RecordValue]) -> io::Result<()>;
}

/// In-memory sink, mostly useful for tests and short captures
impl RowSink for Vec<Vec<RecordValue>> {
    fn write_row(&mut self, row: &[RecordValue]) -> io::Result<()> {
        self.push(row.to_vec());
        Ok(())
    }
}
