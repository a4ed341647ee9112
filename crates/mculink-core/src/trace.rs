//! Trace timestamp reconstruction
//!
//! Offline conversion of saved profiling samples into the trace-event
//! JSON format understood by chrome://tracing and ui.perfetto.dev.
//! Samples carry timestamps from the MCU's 32-bit cycle counter, which
//! wraps every few seconds at typical clock rates; the converter
//! detects wraps and unfolds the ticks into monotonic microseconds.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use thiserror::Error;
use tracing::{info, warn};

/// Wrap modulus of the hardware cycle counter (32-bit CYCCNT)
pub const CYCCNT_WRAP_TICKS: u64 = (1 << 32) - 1;

/// Errors raised by trace conversion
#[derive(Debug, Error)]
pub enum TraceError {
    /// Reading or writing a trace file failed
    #[error("trace I/O error: {0}")]
    Io(#[from] io::Error),
    /// The point-description JSON could not be parsed
    #[error("trace JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// The point-description JSON has no `mcu_clock_frequency` entry
    #[error("point description has no mcu_clock_frequency entry")]
    MissingClockFrequency,
    /// A sample row does not follow the 4-column format
    #[error("malformed sample row: {0}")]
    MalformedRow(String),
    /// The sample input contains no rows at all
    #[error("sample input is empty")]
    EmptyInput,
}

/// One raw profiling sample, in cycle-counter ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceSample {
    /// Tick count at which the traced section started
    pub start_ticks: u64,
    /// Tick count the section lasted
    pub duration_ticks: u64,
    /// Thread the section ran on
    pub thread_id: u32,
    /// Trace point identifier, resolved through the point table
    pub point_id: u64,
}

impl TraceSample {
    /// Whether this is the all-zero row the firmware writes to mark
    /// the end of a capture
    pub fn is_sentinel(&self) -> bool {
        self.start_ticks == 0
            && self.duration_ticks == 0
            && self.thread_id == 0
            && self.point_id == 0
    }
}

/// One complete ("X" phase) trace event, in microseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Human-readable event name from the point table
    pub name: String,
    /// Event phase; always "X" (complete event)
    #[serde(rename = "ph")]
    pub phase: String,
    /// Start timestamp in microseconds, wrap-compensated
    #[serde(rename = "ts")]
    pub timestamp_us: u64,
    /// Duration in microseconds
    #[serde(rename = "dur")]
    pub duration_us: u64,
    /// Thread identifier
    #[serde(rename = "tid")]
    pub thread_id: u32,
    /// Process identifier; always 0, the MCU has one process
    #[serde(rename = "pid")]
    pub process_id: u32,
}

/// Top-level trace-event document
#[derive(Debug, Serialize, Deserialize)]
struct TimelineDocument {
    #[serde(rename = "traceEvents")]
    trace_events: Vec<TimelineEvent>,
}

/// Trace point description: the MCU clock rate plus an id→name table.
///
/// Parsed from a JSON object of the form
/// `{"mcu_clock_frequency": 168000000, "1": "adc_isr", ...}`.
#[derive(Debug, Clone)]
pub struct PointTable {
    /// MCU core clock in Hz; the tick-to-microsecond scale
    pub clock_hz: f64,
    names: HashMap<String, String>,
}

impl PointTable {
    /// Build a table directly from a clock rate and id→name pairs
    pub fn new(clock_hz: f64, names: HashMap<String, String>) -> Self {
        Self { clock_hz, names }
    }

    /// Parse the description JSON from a reader
    pub fn from_reader(reader: impl io::Read) -> Result<Self, TraceError> {
        let value: Value = serde_json::from_reader(reader)?;
        let object = value
            .as_object()
            .ok_or(TraceError::MissingClockFrequency)?;
        let clock_hz = object
            .get("mcu_clock_frequency")
            .and_then(Value::as_f64)
            .ok_or(TraceError::MissingClockFrequency)?;
        let mut names = HashMap::new();
        for (key, entry) in object {
            if key == "mcu_clock_frequency" {
                continue;
            }
            if let Value::String(name) = entry {
                names.insert(key.clone(), name.clone());
            }
        }
        Ok(Self { clock_hz, names })
    }

    /// Resolve a point id to its event name
    pub fn name(&self, point_id: u64) -> Option<&str> {
        self.names.get(&point_id.to_string()).map(String::as_str)
    }
}

/// Converts tick-domain samples into microsecond timeline events
#[derive(Debug)]
pub struct TraceConverter {
    table: PointTable,
    wrap_ticks: u64,
}

impl TraceConverter {
    /// Converter for the real 32-bit cycle counter
    pub fn new(table: PointTable) -> Self {
        Self::with_wrap_ticks(table, CYCCNT_WRAP_TICKS)
    }

    /// Converter with an explicit wrap modulus
    pub fn with_wrap_ticks(table: PointTable, wrap_ticks: u64) -> Self {
        Self { table, wrap_ticks }
    }

    /// Convert samples, in capture order, into timeline events.
    ///
    /// A wrap is inferred whenever a sample's end ticks fall below the
    /// previous sample's end ticks; every inferred wrap shifts all
    /// later timestamps forward by one full counter period. A sample
    /// whose point id is missing from the table is skipped with a
    /// warning but still participates in wrap detection. An all-zero
    /// sample ends the conversion early. With `absolute_timestamps`
    /// a synthetic zero-duration event anchors the timeline at zero.
    pub fn convert(&self, samples: &[TraceSample], absolute_timestamps: bool) -> Vec<TimelineEvent> {
        let us_per_tick = 1e6 / self.table.clock_hz;
        let wrap_us = (self.wrap_ticks as f64 * us_per_tick).trunc();

        let mut events = Vec::with_capacity(samples.len() + 1);
        if absolute_timestamps {
            events.push(TimelineEvent {
                name: "start_profiling".to_string(),
                phase: "X".to_string(),
                timestamp_us: 0,
                duration_us: 0,
                thread_id: 0,
                process_id: 0,
            });
        }

        let mut overflow_count: u64 = 0;
        let mut previous_end_ticks: u64 = 0;
        for sample in samples {
            if sample.is_sentinel() {
                break;
            }
            let end_ticks = sample.start_ticks + sample.duration_ticks;
            if previous_end_ticks > end_ticks {
                overflow_count += 1;
            }
            let timestamp_us = sample.start_ticks as f64 * us_per_tick
                + overflow_count as f64 * wrap_us;
            let duration_us = sample.duration_ticks as f64 * us_per_tick;

            match self.table.name(sample.point_id) {
                Some(name) => events.push(TimelineEvent {
                    name: name.to_string(),
                    phase: "X".to_string(),
                    timestamp_us: timestamp_us as u64,
                    duration_us: duration_us as u64,
                    thread_id: sample.thread_id,
                    process_id: 0,
                }),
                None => {
                    warn!(
                        point_id = sample.point_id,
                        "point description has no entry for this id, sample skipped"
                    );
                }
            }
            previous_end_ticks = end_ticks;
        }
        events
    }
}

/// Read saved samples from 4-column CSV rows.
///
/// The column count of the first row decides whether the file is a
/// trace log at all; a row count other than 4 anywhere is an error.
/// An all-zero row ends the capture, later rows are ignored.
pub fn read_trace_csv(reader: impl BufRead) -> Result<Vec<TraceSample>, TraceError> {
    fn parse_field<T: std::str::FromStr>(s: &str, row: &str) -> Result<T, TraceError> {
        s.parse().map_err(|_| {
            TraceError::MalformedRow(format!("invalid field {:?} in row {:?}", s, row))
        })
    }

    let mut samples = Vec::new();
    let mut saw_row = false;
    for line in reader.lines() {
        let line = line?;
        let row = line.trim();
        if row.is_empty() {
            continue;
        }
        saw_row = true;
        let columns: Vec<&str> = row.split(',').map(str::trim).collect();
        if columns.len() != 4 {
            return Err(TraceError::MalformedRow(format!(
                "{} columns, expected 4: {:?}",
                columns.len(),
                row
            )));
        }
        let sample = TraceSample {
            start_ticks: parse_field(columns[0], row)?,
            duration_ticks: parse_field(columns[1], row)?,
            thread_id: parse_field(columns[2], row)?,
            point_id: parse_field(columns[3], row)?,
        };
        if sample.is_sentinel() {
            break;
        }
        samples.push(sample);
    }
    if !saw_row {
        return Err(TraceError::EmptyInput);
    }
    Ok(samples)
}

/// Write events as a `{"traceEvents": [...]}` document
pub fn write_timeline_json(out: impl Write, events: Vec<TimelineEvent>) -> Result<(), TraceError> {
    let document = TimelineDocument {
        trace_events: events,
    };
    serde_json::to_writer_pretty(out, &document)?;
    Ok(())
}

/// One-call translation from a sample CSV and a point-description JSON
/// into a timeline document
pub fn translate(
    samples_csv: impl BufRead,
    description_json: impl io::Read,
    absolute_timestamps: bool,
    out: impl Write,
) -> Result<(), TraceError> {
    let table = PointTable::from_reader(description_json)?;
    let samples = read_trace_csv(samples_csv)?;
    let converter = TraceConverter::new(table);
    let events = converter.convert(&samples, absolute_timestamps);
    info!(events = events.len(), "trace translated");
    write_timeline_json(out, events)
}
