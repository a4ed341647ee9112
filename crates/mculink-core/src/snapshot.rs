//! Debug-buffer snapshots
//!
//! Pulls every registered debug buffer off the device in one pass.
//! The device first reports how many buffers exist and how many
//! records each holds; every buffer is then read independently with
//! its own record type.

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info};

use crate::protocol::{
    frame, Command, ProtocolError, RecordType, RecordValue, Session, ShortReply,
};

/// Shape shared by every buffer in one snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSet {
    /// Number of registered buffers on the device
    pub buffer_count: u8,
    /// Records held by each buffer; identical across the snapshot
    pub records_per_buffer: u16,
}

/// One decoded buffer: a column of typed records
#[derive(Debug, Clone)]
pub struct BufferColumn {
    /// 1-based buffer index, as used in the per-buffer opcode
    pub index: u8,
    /// Record type reported by the buffer header
    pub record_type: RecordType,
    /// Decoded records, `records_per_buffer` of them
    pub values: Vec<RecordValue>,
}

/// Result of one snapshot pass
#[derive(Debug, Clone)]
pub struct BufferSnapshot {
    /// Buffer count and per-buffer record count
    pub set: BufferSet,
    /// One column per buffer, in device order
    pub columns: Vec<BufferColumn>,
}

impl BufferSnapshot {
    /// Whether the device had no buffers registered
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Iterate record-wise rows, transposing the buffer columns.
    ///
    /// Row `r` holds record `r` of every buffer, in buffer order. This
    /// is the layout the CSV log uses.
    pub fn rows(&self) -> impl Iterator<Item = Vec<RecordValue>> + '_ {
        (0..self.set.records_per_buffer as usize)
            .map(move |r| self.columns.iter().map(|c| c.values[r]).collect())
    }
}

impl Session {
    /// Read every registered debug buffer.
    ///
    /// Zero registered buffers is a legitimate empty snapshot and
    /// causes no further transport reads. Any framing violation or
    /// short read aborts the whole snapshot and kills the session; no
    /// partial buffer is retained.
    pub fn read_all_buffers(&mut self) -> Result<BufferSnapshot, ProtocolError> {
        self.ensure_connected()?;

        self.send_frame(Command::ReadBufferProperties)?;
        let reply = self.read_exact_reply(6)?;
        let payload = self.expect_tagged(&reply, Command::ReadBufferProperties.opcode(), 6)?;

        let set = BufferSet {
            buffer_count: payload[0],
            records_per_buffer: LittleEndian::read_u16(&payload[1..3]),
        };
        info!(
            buffer_count = set.buffer_count,
            records_per_buffer = set.records_per_buffer,
            "buffer properties"
        );

        // Per-buffer opcodes occupy 0x11..=0x30; a count above 32 is
        // not addressable and means the reply is garbage.
        if set.buffer_count > 32 {
            return Err(self.fail_framing(format!(
                "device claims {} buffers, at most 32 are addressable",
                set.buffer_count
            )));
        }

        if set.buffer_count == 0 {
            info!("no active buffers are registered");
            return Ok(BufferSnapshot {
                set,
                columns: Vec::new(),
            });
        }

        let mut columns = Vec::with_capacity(set.buffer_count as usize);
        for index in 1..=set.buffer_count {
            columns.push(self.read_buffer_column(index, set.records_per_buffer)?);
        }

        Ok(BufferSnapshot { set, columns })
    }

    fn read_buffer_column(
        &mut self,
        index: u8,
        records_per_buffer: u16,
    ) -> Result<BufferColumn, ProtocolError> {
        let cmd = Command::ReadBuffer(index);
        self.send_frame(cmd)?;

        // The device first acks the read request with a plain Ack,
        // then sends a tagged header naming the record type.
        let reply = self.read_exact_reply(3)?;
        match frame::decode_short(&reply) {
            Ok(ShortReply::Ack) => {}
            Ok(ShortReply::Nack) => {
                self.mark_disconnected();
                return Err(ProtocolError::Declined);
            }
            Ok(ShortReply::Other(b)) => {
                return Err(self.fail_framing(format!(
                    "unexpected reply marker {:#04x} for buffer {}",
                    b, index
                )));
            }
            Err(e) => {
                self.mark_disconnected();
                return Err(e);
            }
        }

        let header = self.read_exact_reply(4)?;
        let payload = self.expect_tagged(&header, cmd.opcode(), 4)?;
        let tag = payload[0];
        let record_type = match RecordType::from_tag(tag) {
            Some(t) if t.width() > 0 => t,
            _ => {
                return Err(
                    self.fail_framing(format!("buffer {} has unusable type tag {:#04x}", index, tag))
                );
            }
        };
        debug!(index, ?record_type, "reading buffer");

        let width = record_type.width();
        let raw = self.read_exact_reply(width * records_per_buffer as usize)?;

        let mut values = Vec::with_capacity(records_per_buffer as usize);
        for chunk in raw.chunks_exact(width) {
            values.push(record_type.decode(chunk)?);
        }

        Ok(BufferColumn {
            index,
            record_type,
            values,
        })
    }
}
