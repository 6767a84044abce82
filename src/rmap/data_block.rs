//! Typed buffers carried by data tree nodes.

use crate::error::{Result, TurbineError};
use crate::types::{self, ByteOrder, ChannelData, DataType};
use std::ops::Range;

/// Raw storage of a [`DataBlock`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Fixed-width elements packed back to back
    Packed(Vec<u8>),
    /// One value per point for strings, byte arrays and user data
    Points(Vec<Vec<u8>>),
}

/// A typed buffer: element type, point count, element size, byte order,
/// payload and an optional MIME type.
#[derive(Debug, Clone, PartialEq)]
pub struct DataBlock {
    data_type: DataType,
    order: ByteOrder,
    point_size: usize,
    points: usize,
    payload: Payload,
    mime: Option<String>,
}

impl DataBlock {
    /// Fixed-width block from packed bytes.
    pub fn packed(bytes: Vec<u8>, data_type: DataType, order: ByteOrder) -> Result<Self> {
        let size = data_type.element_size().ok_or_else(|| {
            TurbineError::InvalidArgument(format!(
                "Type {} cannot be stored as packed data",
                data_type
            ))
        })?;
        if bytes.len() % size != 0 {
            return Err(TurbineError::InvalidSize {
                len: bytes.len(),
                element_size: size,
            });
        }
        Ok(Self {
            data_type,
            order,
            point_size: size,
            points: bytes.len() / size,
            payload: Payload::Packed(bytes),
            mime: None,
        })
    }

    /// Variable-width block holding one value per point.
    pub fn from_points(values: Vec<Vec<u8>>, data_type: DataType) -> Self {
        let point_size = values.first().map(Vec::len).unwrap_or(0);
        Self {
            data_type,
            order: ByteOrder::Msb,
            point_size,
            points: values.len(),
            payload: Payload::Points(values),
            mime: None,
        }
    }

    /// Encode typed values.
    pub fn from_data(data: &ChannelData, order: ByteOrder) -> Self {
        let packed = |bytes: Vec<u8>, data_type: DataType| {
            let point_size = data_type.element_size().unwrap_or(1);
            Self {
                data_type,
                order,
                point_size,
                points: bytes.len() / point_size,
                payload: Payload::Packed(bytes),
                mime: None,
            }
        };
        match data {
            ChannelData::Float64(v) => packed(types::encode_f64(v, order), DataType::Float64),
            ChannelData::Float32(v) => packed(types::encode_f32(v, order), DataType::Float32),
            ChannelData::Int64(v) => packed(types::encode_i64(v, order), DataType::Int64),
            ChannelData::Int32(v) => packed(types::encode_i32(v, order), DataType::Int32),
            ChannelData::Int16(v) => packed(types::encode_i16(v, order), DataType::Int16),
            ChannelData::Int8(v) => packed(types::encode_i8(v), DataType::Int8),
            ChannelData::String(v) => Self::from_points(
                v.iter().map(|s| s.as_bytes().to_vec()).collect(),
                DataType::String,
            ),
            ChannelData::ByteArray(v) => Self::from_points(v.clone(), DataType::ByteArray),
            ChannelData::User(v) => Self::from_points(v.clone(), DataType::User),
        }
    }

    /// Empty placeholder marking a requested or registered channel.
    pub fn marker() -> Self {
        Self {
            data_type: DataType::Unknown,
            order: ByteOrder::Msb,
            point_size: 1,
            points: 0,
            payload: Payload::Packed(Vec::new()),
            mime: None,
        }
    }

    pub fn is_marker(&self) -> bool {
        self.data_type == DataType::Unknown && self.points == 0
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn point_size(&self) -> usize {
        self.point_size
    }

    pub fn points(&self) -> usize {
        self.points
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    pub fn set_mime(&mut self, mime: Option<String>) {
        self.mime = mime;
    }

    pub fn with_mime(mut self, mime: Option<String>) -> Self {
        self.mime = mime;
        self
    }

    /// Total payload size in bytes.
    pub fn byte_len(&self) -> usize {
        match &self.payload {
            Payload::Packed(bytes) => bytes.len(),
            Payload::Points(values) => values.iter().map(Vec::len).sum(),
        }
    }

    /// True when `other` may be appended to this block as further points.
    pub fn accepts(&self, other: &DataBlock) -> bool {
        if self.data_type != other.data_type || self.data_type.is_text() {
            return false;
        }
        match self.data_type {
            DataType::ByteArray => self.point_size == other.point_size,
            _ => true,
        }
    }

    /// Append the points of `other`, converting its byte order if needed.
    pub fn append(&mut self, other: DataBlock) {
        let other_order = other.order;
        match (&mut self.payload, other.payload) {
            (Payload::Packed(mine), Payload::Packed(mut theirs)) => {
                if other_order != self.order {
                    types::swap_order(&mut theirs, self.point_size);
                }
                mine.extend_from_slice(&theirs);
            }
            (Payload::Points(mine), Payload::Points(theirs)) => mine.extend(theirs),
            (Payload::Packed(mine), Payload::Points(theirs)) => {
                for value in theirs {
                    mine.extend_from_slice(&value);
                }
            }
            (Payload::Points(mine), Payload::Packed(theirs)) => mine.push(theirs),
        }
        self.points += other.points;
    }

    /// Copy of the points in `range`.
    pub fn select(&self, range: Range<usize>) -> DataBlock {
        let start = range.start.min(self.points);
        let end = range.end.min(self.points).max(start);
        let payload = match &self.payload {
            Payload::Packed(bytes) => {
                Payload::Packed(bytes[start * self.point_size..end * self.point_size].to_vec())
            }
            Payload::Points(values) => Payload::Points(values[start..end].to_vec()),
        };
        DataBlock {
            data_type: self.data_type,
            order: self.order,
            point_size: self.point_size,
            points: end - start,
            payload,
            mime: self.mime.clone(),
        }
    }

    /// Decode into typed values. Markers and unknown data yield `None`.
    pub fn to_channel_data(&self) -> Option<ChannelData> {
        let data = match (&self.payload, self.data_type) {
            (Payload::Packed(b), DataType::Float64) => {
                ChannelData::Float64(types::decode_f64(b, self.order))
            }
            (Payload::Packed(b), DataType::Float32) => {
                ChannelData::Float32(types::decode_f32(b, self.order))
            }
            (Payload::Packed(b), DataType::Int64) => {
                ChannelData::Int64(types::decode_i64(b, self.order))
            }
            (Payload::Packed(b), DataType::Int32) => {
                ChannelData::Int32(types::decode_i32(b, self.order))
            }
            (Payload::Packed(b), DataType::Int16) => {
                ChannelData::Int16(types::decode_i16(b, self.order))
            }
            (Payload::Packed(b), DataType::Int8) => ChannelData::Int8(types::decode_i8(b)),
            (Payload::Points(v), DataType::String) => ChannelData::String(
                v.iter()
                    .map(|p| String::from_utf8_lossy(p).into_owned())
                    .collect(),
            ),
            (Payload::Points(v), DataType::ByteArray) => ChannelData::ByteArray(v.clone()),
            (Payload::Points(v), DataType::User) => ChannelData::User(v.clone()),
            _ => return None,
        };
        Some(data)
    }

    /// Payload flattened to bytes, fixed-width values in little-endian order.
    pub fn to_bytes(&self) -> Vec<u8> {
        match &self.payload {
            Payload::Packed(bytes) => {
                let mut out = bytes.clone();
                if self.order == ByteOrder::Msb {
                    types::swap_order(&mut out, self.point_size);
                }
                out
            }
            Payload::Points(values) => values.concat(),
        }
    }
}
