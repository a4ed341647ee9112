//! # mculink Core Library
//!
//! Host-side client for the MCU serial debug protocol.
//!
//! This library provides:
//! - Binary frame codec and connection state machine for the debug link
//! - Snapshot retrieval of device-side debug buffers
//! - Live telemetry streaming with negotiated message shapes
//! - CYCCNT-overflow-aware conversion of recorded traces into
//!   timeline events for chrome://tracing / ui.perfetto.dev
//! - CSV and JSON log sinks
//!
//! ## Example
//!
//! ```rust,ignore
//! use mculink_core::protocol::{Session, SessionConfig};
//!
//! let mut session = Session::open(&SessionConfig {
//!     port_name: "/dev/ttyUSB0".into(),
//!     ..Default::default()
//! })?;
//! session.establish()?;
//!
//! let snapshot = session.read_all_buffers()?;
//! for row in snapshot.rows() {
//!     println!("{:?}", row);
//! }
//!
//! session.close();
//! ```

#![warn(missing_docs)]

pub mod datalog;
pub mod protocol;
pub mod snapshot;
pub mod streaming;
pub mod trace;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::datalog::{CsvWriter, RowSink};
    pub use crate::protocol::{
        Command, ProtocolError, RecordType, RecordValue, Session, SessionConfig, ShortReply,
    };
    pub use crate::snapshot::{BufferColumn, BufferSet, BufferSnapshot};
    pub use crate::streaming::{StopReason, StreamDescriptor, StreamOptions, StreamOutcome};
    pub use crate::trace::{PointTable, TimelineEvent, TraceConverter, TraceError, TraceSample};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
