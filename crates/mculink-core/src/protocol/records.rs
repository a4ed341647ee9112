//! Typed record decoding
//!
//! The firmware tags every buffer and stream field with a one-byte
//! record type. The tag alone decides the byte width and decode rule;
//! widths are never inferred from payload sizes.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ProtocolError;

/// Record type tags as sent by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordType {
    /// Buffer slot is not populated; never carries data
    None,
    /// 32-bit IEEE float
    F32,
    /// Signed 32-bit integer
    I32,
    /// Unsigned 32-bit integer
    U32,
    /// Signed 16-bit integer
    I16,
    /// Unsigned 16-bit integer
    U16,
    /// Unsigned byte
    U8,
}

impl RecordType {
    /// Look up a record type from its wire tag
    pub fn from_tag(tag: u8) -> Option<RecordType> {
        match tag {
            0 => Some(RecordType::None),
            1 => Some(RecordType::F32),
            2 => Some(RecordType::I32),
            3 => Some(RecordType::U32),
            4 => Some(RecordType::I16),
            5 => Some(RecordType::U16),
            6 => Some(RecordType::U8),
            _ => None,
        }
    }

    /// Get the wire tag for this record type
    pub fn tag(&self) -> u8 {
        match self {
            RecordType::None => 0,
            RecordType::F32 => 1,
            RecordType::I32 => 2,
            RecordType::U32 => 3,
            RecordType::I16 => 4,
            RecordType::U16 => 5,
            RecordType::U8 => 6,
        }
    }

    /// Get the decoded width in bytes; `None` records have no width
    pub fn width(&self) -> usize {
        match self {
            RecordType::None => 0,
            RecordType::F32 | RecordType::I32 | RecordType::U32 => 4,
            RecordType::I16 | RecordType::U16 => 2,
            RecordType::U8 => 1,
        }
    }

    /// Decode one record from the front of `bytes`.
    ///
    /// All multi-byte fields are little-endian, matching the firmware.
    pub fn decode(&self, bytes: &[u8]) -> Result<RecordValue, ProtocolError> {
        if bytes.len() < self.width() || *self == RecordType::None {
            return Err(ProtocolError::FramingError(format!(
                "cannot decode {:?} record from {} bytes",
                self,
                bytes.len()
            )));
        }
        Ok(match self {
            RecordType::None => unreachable!(),
            RecordType::F32 => RecordValue::F32(LittleEndian::read_f32(bytes)),
            RecordType::I32 => RecordValue::I32(LittleEndian::read_i32(bytes)),
            RecordType::U32 => RecordValue::U32(LittleEndian::read_u32(bytes)),
            RecordType::I16 => RecordValue::I16(LittleEndian::read_i16(bytes)),
            RecordType::U16 => RecordValue::U16(LittleEndian::read_u16(bytes)),
            RecordType::U8 => RecordValue::U8(bytes[0]),
        })
    }
}

/// One decoded record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RecordValue {
    /// 32-bit float value
    F32(f32),
    /// Signed 32-bit value
    I32(i32),
    /// Unsigned 32-bit value
    U32(u32),
    /// Signed 16-bit value
    I16(i16),
    /// Unsigned 16-bit value
    U16(u16),
    /// Byte value
    U8(u8),
}

impl RecordValue {
    /// Widen to f64, mostly for plotting and assertions
    pub fn as_f64(&self) -> f64 {
        match self {
            RecordValue::F32(v) => *v as f64,
            RecordValue::I32(v) => *v as f64,
            RecordValue::U32(v) => *v as f64,
            RecordValue::I16(v) => *v as f64,
            RecordValue::U16(v) => *v as f64,
            RecordValue::U8(v) => *v as f64,
        }
    }
}

impl fmt::Display for RecordValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordValue::F32(v) => write!(f, "{}", v),
            RecordValue::I32(v) => write!(f, "{}", v),
            RecordValue::U32(v) => write!(f, "{}", v),
            RecordValue::I16(v) => write!(f, "{}", v),
            RecordValue::U16(v) => write!(f, "{}", v),
            RecordValue::U8(v) => write!(f, "{}", v),
        }
    }
}
