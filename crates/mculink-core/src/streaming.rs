//! Live telemetry streaming
//!
//! Negotiates the shape of the device's active stream, then decodes
//! fixed-size framed messages into rows until the device goes quiet,
//! a caller-supplied duration elapses, or the caller cancels. The
//! stop-stream handshake runs on every exit path out of the decode
//! loop, including framing aborts and cancellation.

use byteorder::{ByteOrder, LittleEndian};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::datalog::RowSink;
use crate::protocol::{
    frame, Command, ProtocolError, RecordType, Session, ShortReply, SHORT_REPLY_LEN,
};

/// Maximum tolerated alignment padding per entry, in bytes.
///
/// The firmware pads entries to their natural alignment; more slack
/// than this means the stream properties are wrong.
pub const MAX_ENTRY_PADDING: usize = 3;

/// The device UART cannot transmit messages shorter than 3 bytes, so
/// the field-type reply is padded up to this length.
const MIN_FIELD_TAG_READ: usize = 3;

/// Read timeout while streaming; short so the exit conditions are
/// checked often between messages
const STREAM_READ_TIMEOUT_MS: u64 = 100;

/// Negotiated shape of the active stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    /// Stream identifier; 0 means no stream is configured
    pub stream_id: u8,
    /// Number of fields per entry
    pub field_count: u8,
    /// Entries packed into each message
    pub entries_per_message: u16,
    /// Device-side inactivity timeout in milliseconds
    pub timeout_ms: u32,
    /// Payload bytes per message, excluding the 3-byte frame header
    pub bytes_per_message: u16,
    /// Field record types, in declaration order
    pub fields: Vec<RecordType>,
}

impl StreamDescriptor {
    /// Bytes each entry occupies inside a message, padding included
    pub fn entry_stride(&self) -> usize {
        self.bytes_per_message as usize / self.entries_per_message as usize
    }

    /// Sum of the declared field widths
    pub fn field_width_sum(&self) -> usize {
        self.fields.iter().map(|f| f.width()).sum()
    }

    /// Check the descriptor invariants.
    ///
    /// The message length must divide evenly into entries, the fields
    /// must fit inside the per-entry byte budget, and at most
    /// [`MAX_ENTRY_PADDING`] bytes of alignment slack are tolerated.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.entries_per_message == 0 {
            return Err(ProtocolError::MalformedDescriptor(
                "message declares zero entries".into(),
            ));
        }
        if self.bytes_per_message as usize % self.entries_per_message as usize != 0 {
            return Err(ProtocolError::MalformedDescriptor(format!(
                "message length {} is not proportional to {} entries",
                self.bytes_per_message, self.entries_per_message
            )));
        }
        let stride = self.entry_stride();
        let expected = self.field_width_sum();
        if expected > stride {
            return Err(ProtocolError::MalformedDescriptor(format!(
                "expected entry length {} exceeds {} bytes available per entry",
                expected, stride
            )));
        }
        if stride - expected > MAX_ENTRY_PADDING {
            return Err(ProtocolError::MalformedDescriptor(format!(
                "{} dummy bytes per entry, data struct is likely misaligned",
                stride - expected
            )));
        }
        Ok(())
    }
}

/// Why the streaming loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The device reported no configured stream; nothing was read
    NoActiveStream,
    /// No valid message arrived within the stream's timeout window
    TimeoutElapsed,
    /// The caller-supplied capture duration elapsed
    DurationElapsed,
    /// The caller cancelled the capture
    Cancelled,
}

/// Outcome of a streaming capture
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    /// Why the loop stopped
    pub reason: StopReason,
    /// Total entries handed to the sink
    pub points_saved: u64,
    /// The negotiated descriptor, absent when no stream was active
    pub descriptor: Option<StreamDescriptor>,
}

/// Caller-side knobs for a streaming capture
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Stop after this much wall-clock time; `None` streams until the
    /// device-side timeout fires
    pub duration: Option<Duration>,
    /// Cooperative cancellation flag, typically flipped from a signal
    /// handler; checked once per loop iteration
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Session {
    /// Capture the device's active stream into `sink`.
    ///
    /// Rows already written to the sink when the capture aborts are
    /// retained. A framing violation mid-stream stops the stream,
    /// kills the session and surfaces as an error; timeout, duration
    /// and cancellation are ordinary outcomes.
    pub fn stream_to_sink(
        &mut self,
        options: &StreamOptions,
        sink: &mut dyn RowSink,
    ) -> Result<StreamOutcome, ProtocolError> {
        self.ensure_connected()?;

        self.send_frame(Command::StartStream)?;
        let reply = self.read_exact_reply(SHORT_REPLY_LEN)?;
        match frame::decode_short(&reply) {
            Ok(ShortReply::Ack) => {}
            Ok(ShortReply::Nack) => {
                self.mark_disconnected();
                return Err(ProtocolError::Declined);
            }
            Ok(ShortReply::Other(b)) => {
                return Err(
                    self.fail_framing(format!("unexpected start-stream marker {:#04x}", b))
                );
            }
            Err(e) => {
                self.mark_disconnected();
                return Err(e);
            }
        }

        let reply = self.read_exact_reply(13)?;
        let payload = self.expect_tagged(&reply, Command::StartStream.opcode(), 13)?;
        let stream_id = payload[0];
        let field_count = payload[1];
        let entries_per_message = LittleEndian::read_u16(&payload[2..4]);
        let timeout_ms = LittleEndian::read_u32(&payload[4..8]);
        let bytes_per_message = LittleEndian::read_u16(&payload[8..10]);

        if stream_id == 0 {
            info!("no active stream is registered on the device");
            return Ok(StreamOutcome {
                reason: StopReason::NoActiveStream,
                points_saved: 0,
                descriptor: None,
            });
        }

        // Short UART messages are padded; only field_count tags matter.
        let tag_read_len = (field_count as usize).max(MIN_FIELD_TAG_READ);
        let tag_bytes = self.read_exact_reply(tag_read_len)?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for &tag in &tag_bytes[..field_count as usize] {
            match RecordType::from_tag(tag) {
                Some(t) if t.width() > 0 => fields.push(t),
                _ => {
                    self.mark_disconnected();
                    return Err(ProtocolError::MalformedDescriptor(format!(
                        "unknown field type tag {:#04x}",
                        tag
                    )));
                }
            }
        }

        let descriptor = StreamDescriptor {
            stream_id,
            field_count,
            entries_per_message,
            timeout_ms,
            bytes_per_message,
            fields,
        };
        if let Err(e) = descriptor.validate() {
            warn!(%e, "stream descriptor rejected");
            self.mark_disconnected();
            return Err(e);
        }
        info!(
            stream_id,
            field_count,
            entries_per_message,
            bytes_per_message,
            timeout_ms,
            "stream negotiated"
        );

        let result = self
            .set_read_timeout(Duration::from_millis(STREAM_READ_TIMEOUT_MS))
            .and_then(|()| self.stream_loop(&descriptor, options, sink));

        // Unsubscribe on every exit path; the reply does not matter.
        self.fire_and_drain(Command::StopStream);
        // Put the request/reply timeout back for later exchanges
        let restored = self.set_read_timeout(self.read_timeout());

        let (reason, points_saved) = result?;
        restored?;
        match reason {
            StopReason::TimeoutElapsed => info!(points_saved, "stream timeout elapsed"),
            StopReason::DurationElapsed => info!(points_saved, "capture duration elapsed"),
            StopReason::Cancelled => warn!(points_saved, "stream capture cancelled"),
            StopReason::NoActiveStream => unreachable!(),
        }
        Ok(StreamOutcome {
            reason,
            points_saved,
            descriptor: Some(descriptor),
        })
    }

    fn stream_loop(
        &mut self,
        descriptor: &StreamDescriptor,
        options: &StreamOptions,
        sink: &mut dyn RowSink,
    ) -> Result<(StopReason, u64), ProtocolError> {
        let message_len = descriptor.bytes_per_message as usize + 3;
        let stride = descriptor.entry_stride();
        let inactivity = Duration::from_millis(descriptor.timeout_ms as u64);
        let started = Instant::now();
        let mut last_message = Instant::now();
        let mut points_saved: u64 = 0;

        loop {
            if let Some(cancel) = &options.cancel {
                if cancel.load(Ordering::Relaxed) {
                    return Ok((StopReason::Cancelled, points_saved));
                }
            }
            // Duration wins the final message when both expire in the
            // same iteration.
            if let Some(duration) = options.duration {
                if started.elapsed() >= duration {
                    return Ok((StopReason::DurationElapsed, points_saved));
                }
            }
            if last_message.elapsed() >= inactivity {
                return Ok((StopReason::TimeoutElapsed, points_saved));
            }

            let message = self.read_raw(message_len)?;
            if message.is_empty() {
                // A quiet read window is not a violation and does not
                // count as a timeout by itself; keep waiting.
                continue;
            }
            if message.len() != message_len {
                return Err(self.fail_framing(format!(
                    "stream message has {} bytes, expected {}",
                    message.len(),
                    message_len
                )));
            }
            let payload =
                match frame::decode_tagged(&message, Command::StreamData.opcode(), message_len) {
                    Ok(p) => p,
                    Err(e) => {
                        self.mark_disconnected();
                        return Err(e);
                    }
                };

            last_message = Instant::now();

            for entry in 0..descriptor.entries_per_message as usize {
                let mut row = Vec::with_capacity(descriptor.fields.len());
                let mut offset = entry * stride;
                for field in &descriptor.fields {
                    row.push(field.decode(&payload[offset..offset + field.width()])?);
                    offset += field.width();
                }
                sink.write_row(&row)?;
            }
            points_saved += descriptor.entries_per_message as u64;
            debug!(points_saved, "stream points saved");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::channel::mock::MockChannel;
    use crate::protocol::RecordValue;

    fn ack() -> Vec<u8> {
        vec![0xAA, 0x55, 0xAA]
    }

    fn nack() -> Vec<u8> {
        vec![0xAA, 0x55, 0x55]
    }

    fn descriptor_reply(
        stream_id: u8,
        field_count: u8,
        entries: u16,
        timeout_ms: u32,
        bytes_per_message: u16,
    ) -> Vec<u8> {
        let mut v = vec![0xAA, 0x55, 0x31, stream_id, field_count];
        v.extend_from_slice(&entries.to_le_bytes());
        v.extend_from_slice(&timeout_ms.to_le_bytes());
        v.extend_from_slice(&bytes_per_message.to_le_bytes());
        v
    }

    fn init_logging() {
        use tracing_subscriber::EnvFilter;
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn connected_session(mut reads: Vec<Vec<u8>>) -> (Session, MockChannel) {
        init_logging();
        reads.insert(0, ack());
        let ch = MockChannel::new(reads);
        let mut session = Session::new(Box::new(ch.clone()));
        session.establish().unwrap();
        (session, ch)
    }

    fn valid_descriptor() -> StreamDescriptor {
        StreamDescriptor {
            stream_id: 1,
            field_count: 2,
            entries_per_message: 4,
            timeout_ms: 100,
            bytes_per_message: 8,
            fields: vec![RecordType::U8, RecordType::U8],
        }
    }

    #[test]
    fn test_validator_rejects_uneven_split() {
        let mut d = valid_descriptor();
        d.bytes_per_message = 10;
        assert!(matches!(
            d.validate().unwrap_err(),
            ProtocolError::MalformedDescriptor(_)
        ));
    }

    #[test]
    fn test_validator_accepts_exact_fit() {
        // entry budget 2, field widths sum 2, no padding
        let d = valid_descriptor();
        d.validate().unwrap();
    }

    #[test]
    fn test_validator_rejects_oversized_fields() {
        let mut d = valid_descriptor();
        d.fields = vec![RecordType::U32, RecordType::U16]; // sum 6 > budget 2
        assert!(matches!(
            d.validate().unwrap_err(),
            ProtocolError::MalformedDescriptor(_)
        ));
    }

    #[test]
    fn test_validator_tolerates_three_padding_bytes() {
        // budget 4, one U8 field: 3 bytes of slack is the limit
        let d = StreamDescriptor {
            stream_id: 1,
            field_count: 1,
            entries_per_message: 2,
            timeout_ms: 100,
            bytes_per_message: 8,
            fields: vec![RecordType::U8],
        };
        d.validate().unwrap();
    }

    #[test]
    fn test_validator_rejects_four_padding_bytes() {
        // budget 5, one U8 field: 4 bytes of slack
        let d = StreamDescriptor {
            stream_id: 1,
            field_count: 1,
            entries_per_message: 2,
            timeout_ms: 100,
            bytes_per_message: 10,
            fields: vec![RecordType::U8],
        };
        assert!(matches!(
            d.validate().unwrap_err(),
            ProtocolError::MalformedDescriptor(_)
        ));
    }

    #[test]
    fn test_no_active_stream() {
        let (mut session, _ch) =
            connected_session(vec![ack(), descriptor_reply(0, 0, 0, 0, 0)]);
        let mut sink: Vec<Vec<RecordValue>> = Vec::new();
        let outcome = session
            .stream_to_sink(&StreamOptions::default(), &mut sink)
            .unwrap();
        assert_eq!(outcome.reason, StopReason::NoActiveStream);
        assert_eq!(outcome.points_saved, 0);
        assert!(outcome.descriptor.is_none());
        assert!(sink.is_empty());
        assert!(session.is_connected());
    }

    #[test]
    fn test_declined_start() {
        let (mut session, _ch) = connected_session(vec![nack()]);
        let mut sink: Vec<Vec<RecordValue>> = Vec::new();
        assert!(matches!(
            session
                .stream_to_sink(&StreamOptions::default(), &mut sink)
                .unwrap_err(),
            ProtocolError::Declined
        ));
        assert!(!session.is_connected());
    }

    fn stream_message(entries: &[[u8; 2]]) -> Vec<u8> {
        let mut v = vec![0xAA, 0x55, 0x32];
        for e in entries {
            v.extend_from_slice(e);
        }
        v
    }

    #[test]
    fn test_stream_decodes_entries_until_timeout() {
        // 2 U8 fields, 2 entries per message, 4 payload bytes
        let reads = vec![
            ack(),
            descriptor_reply(1, 2, 2, 50, 4),
            vec![6, 6, 0], // field tags padded to 3 bytes
            stream_message(&[[1, 2], [3, 4]]),
            stream_message(&[[5, 6], [7, 8]]),
            // then silence until the device timeout
        ];
        let (mut session, ch) = connected_session(reads);
        let mut sink: Vec<Vec<RecordValue>> = Vec::new();
        let outcome = session
            .stream_to_sink(&StreamOptions::default(), &mut sink)
            .unwrap();

        assert_eq!(outcome.reason, StopReason::TimeoutElapsed);
        assert_eq!(outcome.points_saved, 4);
        let d = outcome.descriptor.unwrap();
        assert_eq!(d.fields, vec![RecordType::U8, RecordType::U8]);
        assert_eq!(sink.len(), 4);
        assert_eq!(sink[0], vec![RecordValue::U8(1), RecordValue::U8(2)]);
        assert_eq!(sink[3], vec![RecordValue::U8(7), RecordValue::U8(8)]);

        // connect, start-stream, stop-stream were written
        let written = ch.written();
        assert_eq!(written[..6], [0xAA, 0x55, 0x01, 0xAA, 0x55, 0x31]);
        assert_eq!(written[written.len() - 3..], [0xAA, 0x55, 0x33]);
        // Timeout stop keeps the session alive
        assert!(session.is_connected());
    }

    #[test]
    fn test_entry_padding_is_skipped() {
        // One U16 field, stride 4 (2 padding bytes), 2 entries per message
        let reads = vec![
            ack(),
            descriptor_reply(1, 1, 2, 50, 8),
            vec![5, 0, 0],
            {
                let mut m = vec![0xAA, 0x55, 0x32];
                m.extend_from_slice(&[0x34, 0x12, 0xEE, 0xEE]); // entry 0 + padding
                m.extend_from_slice(&[0x78, 0x56, 0xEE, 0xEE]); // entry 1 + padding
                m
            },
        ];
        let (mut session, _ch) = connected_session(reads);
        let mut sink: Vec<Vec<RecordValue>> = Vec::new();
        session
            .stream_to_sink(&StreamOptions::default(), &mut sink)
            .unwrap();
        assert_eq!(sink[0], vec![RecordValue::U16(0x1234)]);
        assert_eq!(sink[1], vec![RecordValue::U16(0x5678)]);
    }

    #[test]
    fn test_zero_length_read_retries() {
        // Two quiet read windows between valid messages must not stop
        // the loop or count as the timeout themselves.
        let reads = vec![
            ack(),
            descriptor_reply(1, 2, 1, 60, 2),
            vec![6, 6, 0],
            stream_message(&[[1, 2]]),
            vec![], // timeout tick
            vec![], // timeout tick
            stream_message(&[[3, 4]]),
        ];
        let (mut session, _ch) = connected_session(reads);
        let mut sink: Vec<Vec<RecordValue>> = Vec::new();
        let outcome = session
            .stream_to_sink(&StreamOptions::default(), &mut sink)
            .unwrap();
        assert_eq!(outcome.reason, StopReason::TimeoutElapsed);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_wrong_message_length_aborts_and_stops_stream() {
        let reads = vec![
            ack(),
            descriptor_reply(1, 2, 1, 1000, 2),
            vec![6, 6, 0],
            vec![0xAA, 0x55, 0x32, 1], // 4 of the 5 expected bytes
        ];
        let (mut session, ch) = connected_session(reads);
        let mut sink: Vec<Vec<RecordValue>> = Vec::new();
        let err = session
            .stream_to_sink(&StreamOptions::default(), &mut sink)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::FramingError(_)));
        assert!(!session.is_connected());
        // stop-stream was still sent
        let written = ch.written();
        assert_eq!(written[written.len() - 3..], [0xAA, 0x55, 0x33]);
    }

    #[test]
    fn test_wrong_message_tag_aborts() {
        let reads = vec![
            ack(),
            descriptor_reply(1, 2, 1, 1000, 2),
            vec![6, 6, 0],
            vec![0xAA, 0x55, 0x31, 1, 2], // tagged 0x31 instead of 0x32
        ];
        let (mut session, _ch) = connected_session(reads);
        let mut sink: Vec<Vec<RecordValue>> = Vec::new();
        assert!(matches!(
            session
                .stream_to_sink(&StreamOptions::default(), &mut sink)
                .unwrap_err(),
            ProtocolError::FramingError(_)
        ));
        assert!(!session.is_connected());
    }

    #[test]
    fn test_unknown_field_tag_is_malformed_descriptor() {
        let reads = vec![
            ack(),
            descriptor_reply(1, 2, 1, 1000, 2),
            vec![6, 9, 0], // tag 9 is not a record type
        ];
        let (mut session, ch) = connected_session(reads);
        let mut sink: Vec<Vec<RecordValue>> = Vec::new();
        assert!(matches!(
            session
                .stream_to_sink(&StreamOptions::default(), &mut sink)
                .unwrap_err(),
            ProtocolError::MalformedDescriptor(_)
        ));
        assert!(!session.is_connected());
        // Rejected before streaming began: no stop-stream handshake
        let written = ch.written();
        assert_eq!(written[written.len() - 3..], [0xAA, 0x55, 0x31]);
    }

    #[test]
    fn test_malformed_descriptor_aborts_before_streaming() {
        let reads = vec![
            ack(),
            descriptor_reply(1, 2, 4, 1000, 10), // 10 % 4 != 0
            vec![6, 6, 0],
        ];
        let (mut session, _ch) = connected_session(reads);
        let mut sink: Vec<Vec<RecordValue>> = Vec::new();
        assert!(matches!(
            session
                .stream_to_sink(&StreamOptions::default(), &mut sink)
                .unwrap_err(),
            ProtocolError::MalformedDescriptor(_)
        ));
        assert!(!session.is_connected());
    }

    #[test]
    fn test_cancellation_still_stops_stream() {
        let cancel = Arc::new(AtomicBool::new(true));
        let reads = vec![ack(), descriptor_reply(1, 1, 1, 1000, 1), vec![6, 0, 0]];
        let (mut session, ch) = connected_session(reads);
        let mut sink: Vec<Vec<RecordValue>> = Vec::new();
        let options = StreamOptions {
            duration: None,
            cancel: Some(cancel),
        };
        let outcome = session.stream_to_sink(&options, &mut sink).unwrap();
        assert_eq!(outcome.reason, StopReason::Cancelled);
        assert_eq!(outcome.points_saved, 0);
        let written = ch.written();
        assert_eq!(written[written.len() - 3..], [0xAA, 0x55, 0x33]);
    }

    #[test]
    fn test_reply_timeout_restored_after_stream() {
        // The loop shortens the channel timeout; later request/reply
        // exchanges on the same session need the configured one back.
        let reads = vec![ack(), descriptor_reply(1, 1, 1, 30, 1), vec![6, 0, 0]];
        let (mut session, ch) = connected_session(reads);
        let mut sink: Vec<Vec<RecordValue>> = Vec::new();
        session
            .stream_to_sink(&StreamOptions::default(), &mut sink)
            .unwrap();
        assert_eq!(
            ch.timeout(),
            Some(Duration::from_millis(crate::protocol::DEFAULT_TIMEOUT_MS))
        );
    }

    #[test]
    fn test_duration_takes_precedence_over_timeout() {
        // Both a zero duration and a zero device timeout expire in the
        // first iteration; the duration must win the report.
        let reads = vec![ack(), descriptor_reply(1, 1, 1, 0, 1), vec![6, 0, 0]];
        let (mut session, _ch) = connected_session(reads);
        let mut sink: Vec<Vec<RecordValue>> = Vec::new();
        let options = StreamOptions {
            duration: Some(Duration::ZERO),
            cancel: None,
        };
        let outcome = session.stream_to_sink(&options, &mut sink).unwrap();
        assert_eq!(outcome.reason, StopReason::DurationElapsed);
    }
}
