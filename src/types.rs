//! Core data types for turbine-rs
//!
//! This module contains the typed-buffer vocabulary shared by the channel map,
//! the data tree and the clients.
//!
//! # Main Types
//!
//! - [`DataType`] - Element type codes (float64 ... int8, string, byte array, user)
//! - [`ByteOrder`] - Word order of packed fixed-width payloads
//! - [`ChannelData`] - Typed values handed to or read back from a channel
//!
//! Fixed-width payloads are kept as packed bytes tagged with a [`ByteOrder`];
//! the codec functions at the bottom of this module convert between packed
//! bytes and typed vectors.

use crate::error::{Result, TurbineError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Element type of a typed buffer.
///
/// The numeric codes match the wire type identifiers used by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DataType {
    /// No data, or data of unknown layout
    #[default]
    Unknown,
    /// 8-bit signed integer
    Int8,
    /// 16-bit signed integer
    Int16,
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
    /// One string per point
    String,
    /// One arbitrary byte array per point
    ByteArray,
    /// Descriptive user data merged into registration metadata
    User,
}

impl DataType {
    /// All types, in code order.
    pub const ALL: [DataType; 10] = [
        DataType::Unknown,
        DataType::Int8,
        DataType::Int16,
        DataType::Int32,
        DataType::Int64,
        DataType::Float32,
        DataType::Float64,
        DataType::String,
        DataType::ByteArray,
        DataType::User,
    ];

    /// Wire type code
    pub fn code(self) -> u8 {
        match self {
            DataType::Unknown => 0,
            DataType::Int8 => 3,
            DataType::Int16 => 4,
            DataType::Int32 => 5,
            DataType::Int64 => 6,
            DataType::Float32 => 7,
            DataType::Float64 => 8,
            DataType::String => 9,
            DataType::ByteArray => 10,
            DataType::User => 11,
        }
    }

    pub fn from_code(code: u8) -> Option<DataType> {
        DataType::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Size in bytes of one element for fixed-width types.
    pub fn element_size(self) -> Option<usize> {
        match self {
            DataType::Int8 => Some(1),
            DataType::Int16 => Some(2),
            DataType::Int32 | DataType::Float32 => Some(4),
            DataType::Int64 | DataType::Float64 => Some(8),
            DataType::Unknown | DataType::String | DataType::ByteArray | DataType::User => None,
        }
    }

    /// Strings, byte arrays and user data carry one independently sized
    /// value per point.
    pub fn is_variable_width(self) -> bool {
        matches!(self, DataType::String | DataType::ByteArray | DataType::User)
    }

    /// Text-like types never coalesce with earlier writes.
    pub fn is_text(self) -> bool {
        matches!(self, DataType::String | DataType::User)
    }

    /// Display name of this type
    pub fn name(self) -> &'static str {
        match self {
            DataType::Unknown => "unknown",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::String => "string",
            DataType::ByteArray => "bytearray",
            DataType::User => "user",
        }
    }

    /// Parse a type name, accepting the short aliases (`i32`, `f64`, `s`, `ba`, ...).
    pub fn from_name(name: &str) -> Result<DataType> {
        let lower = name.trim().to_ascii_lowercase();
        let ty = match lower.as_str() {
            "int8" | "i8" => DataType::Int8,
            "int16" | "i16" => DataType::Int16,
            "int32" | "i32" => DataType::Int32,
            "int64" | "i64" => DataType::Int64,
            "float32" | "f32" => DataType::Float32,
            "float64" | "f64" => DataType::Float64,
            "string" | "s" => DataType::String,
            "user" => DataType::User,
            "unknown" => DataType::Unknown,
            "bytearray" | "b" | "ba" => DataType::ByteArray,
            _ => {
                return Err(TurbineError::InvalidArgument(format!(
                    "Unrecognized type name \"{}\"",
                    name
                )))
            }
        };
        Ok(ty)
    }
}

impl FromStr for DataType {
    type Err = TurbineError;

    fn from_str(s: &str) -> Result<Self> {
        DataType::from_name(s)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Word order of packed fixed-width data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ByteOrder {
    /// Least significant byte first
    Lsb,
    /// Most significant byte first
    Msb,
}

impl ByteOrder {
    /// Native order of the running machine
    #[cfg(target_endian = "little")]
    pub const LOCAL: ByteOrder = ByteOrder::Lsb;
    #[cfg(target_endian = "big")]
    pub const LOCAL: ByteOrder = ByteOrder::Msb;

    pub fn code(self) -> u8 {
        match self {
            ByteOrder::Lsb => 1,
            ByteOrder::Msb => 2,
        }
    }
}

impl Default for ByteOrder {
    fn default() -> Self {
        ByteOrder::Msb
    }
}

/// Typed values for one channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelData {
    Float64(Vec<f64>),
    Float32(Vec<f32>),
    Int64(Vec<i64>),
    Int32(Vec<i32>),
    Int16(Vec<i16>),
    Int8(Vec<i8>),
    String(Vec<String>),
    ByteArray(Vec<Vec<u8>>),
    User(Vec<Vec<u8>>),
}

impl ChannelData {
    pub fn data_type(&self) -> DataType {
        match self {
            ChannelData::Float64(_) => DataType::Float64,
            ChannelData::Float32(_) => DataType::Float32,
            ChannelData::Int64(_) => DataType::Int64,
            ChannelData::Int32(_) => DataType::Int32,
            ChannelData::Int16(_) => DataType::Int16,
            ChannelData::Int8(_) => DataType::Int8,
            ChannelData::String(_) => DataType::String,
            ChannelData::ByteArray(_) => DataType::ByteArray,
            ChannelData::User(_) => DataType::User,
        }
    }

    /// Number of points
    pub fn len(&self) -> usize {
        match self {
            ChannelData::Float64(v) => v.len(),
            ChannelData::Float32(v) => v.len(),
            ChannelData::Int64(v) => v.len(),
            ChannelData::Int32(v) => v.len(),
            ChannelData::Int16(v) => v.len(),
            ChannelData::Int8(v) => v.len(),
            ChannelData::String(v) => v.len(),
            ChannelData::ByteArray(v) | ChannelData::User(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ==================== Codec ====================

macro_rules! numeric_codec {
    ($encode:ident, $decode:ident, $ty:ty, $size:expr) => {
        /// Pack values in the given byte order.
        pub fn $encode(values: &[$ty], order: ByteOrder) -> Vec<u8> {
            let mut out = Vec::with_capacity(values.len() * $size);
            for value in values {
                match order {
                    ByteOrder::Lsb => out.extend_from_slice(&value.to_le_bytes()),
                    ByteOrder::Msb => out.extend_from_slice(&value.to_be_bytes()),
                }
            }
            out
        }

        /// Unpack values; a trailing partial element is ignored.
        pub fn $decode(bytes: &[u8], order: ByteOrder) -> Vec<$ty> {
            bytes
                .chunks_exact($size)
                .map(|chunk| {
                    let mut raw = [0u8; $size];
                    raw.copy_from_slice(chunk);
                    match order {
                        ByteOrder::Lsb => <$ty>::from_le_bytes(raw),
                        ByteOrder::Msb => <$ty>::from_be_bytes(raw),
                    }
                })
                .collect()
        }
    };
}

numeric_codec!(encode_f64, decode_f64, f64, 8);
numeric_codec!(encode_f32, decode_f32, f32, 4);
numeric_codec!(encode_i64, decode_i64, i64, 8);
numeric_codec!(encode_i32, decode_i32, i32, 4);
numeric_codec!(encode_i16, decode_i16, i16, 2);

pub fn encode_i8(values: &[i8]) -> Vec<u8> {
    values.iter().map(|v| *v as u8).collect()
}

pub fn decode_i8(bytes: &[u8]) -> Vec<i8> {
    bytes.iter().map(|b| *b as i8).collect()
}

/// Reverse the byte order of every `element_size` wide element in place.
pub fn swap_order(bytes: &mut [u8], element_size: usize) {
    if element_size > 1 {
        for chunk in bytes.chunks_exact_mut(element_size) {
            chunk.reverse();
        }
    }
}
