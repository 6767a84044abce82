//! Decoding server results and the typed accessors.

use super::ChannelMap;
use crate::error::{Result, TurbineError};
use crate::rmap::{DataArray, DataTree};
use crate::types::{ChannelData, DataType};

const REGISTRATION_MIME: &str = "text/xml";

macro_rules! typed_getter {
    ($(#[$meta:meta])* $name:ident, $variant:ident, $elem:ty) => {
        $(#[$meta])*
        pub fn $name(&self, index: usize) -> Result<Vec<$elem>> {
            match self.data(index)? {
                None => Ok(Vec::new()),
                Some(ChannelData::$variant(values)) => Ok(values),
                Some(other) => Err(TurbineError::TypeMismatch {
                    index,
                    expected: DataType::$variant.name().to_string(),
                    actual: other.data_type().name().to_string(),
                }),
            }
        }
    };
}

impl ChannelMap {
    /// Load a result tree into the map.
    ///
    /// `None` marks a fetch that timed out. Otherwise every data-bearing
    /// channel of the tree is added (or refreshed) in first-seen order and
    /// bare named leaves are recorded as folders. With `keep` the tree is
    /// retained for forwarding and for the client lists.
    pub fn process_result(&mut self, result: Option<DataTree>, keep: bool, remove_leading_slash: bool) {
        self.fetched_folders.clear();
        let Some(tree) = result else {
            self.fetch_timed_out = true;
            return;
        };
        self.fetch_timed_out = false;

        let extracted = tree.extract(tree.root());
        for (name, array) in extracted.channels {
            let name = trim_name(name, remove_leading_slash);
            self.add_fetched(&name, array);
        }
        self.fetched_folders = extracted
            .folders
            .into_iter()
            .map(|f| trim_name(f, remove_leading_slash))
            .collect();

        if keep {
            self.response = Some(tree);
        }
    }

    fn add_fetched(&mut self, name: &str, array: DataArray) {
        let index = self.add_unchecked(name);
        self.channels[index].result = Some(array);
    }

    /// Decoded data of channel `index`. Channels without data, including
    /// registration markers, yield `None`.
    pub fn data(&self, index: usize) -> Result<Option<ChannelData>> {
        Ok(self
            .channel(index)?
            .result
            .as_ref()
            .and_then(DataArray::block)
            .and_then(|b| b.to_channel_data()))
    }

    typed_getter!(data_as_f64, Float64, f64);
    typed_getter!(data_as_f32, Float32, f32);
    typed_getter!(data_as_i64, Int64, i64);
    typed_getter!(data_as_i32, Int32, i32);
    typed_getter!(data_as_i16, Int16, i16);
    typed_getter!(data_as_i8, Int8, i8);
    typed_getter!(data_as_string, String, String);
    typed_getter!(
        /// Byte-array points of channel `index`.
        data_as_byte_array, ByteArray, Vec<u8>
    );

    /// Raw payload of channel `index` with fixed-width values in
    /// little-endian order.
    pub fn data_as_bytes(&self, index: usize) -> Result<Vec<u8>> {
        Ok(self
            .channel(index)?
            .result
            .as_ref()
            .and_then(DataArray::block)
            .map(|b| b.to_bytes())
            .unwrap_or_default())
    }

    /// Element type of the fetched data, `Unknown` when there is none.
    pub fn data_type(&self, index: usize) -> Result<DataType> {
        Ok(self
            .channel(index)?
            .result
            .as_ref()
            .and_then(DataArray::block)
            .map_or(DataType::Unknown, |b| b.data_type()))
    }

    /// MIME type of the fetched data, falling back to the one set locally.
    pub fn mime(&self, index: usize) -> Result<Option<String>> {
        let channel = self.channel(index)?;
        let fetched = channel
            .result
            .as_ref()
            .and_then(DataArray::block)
            .and_then(|b| b.mime().map(str::to_string));
        Ok(fetched.or_else(|| channel.mime.clone()))
    }

    /// User information attached to a channel.
    ///
    /// User data is returned as text. Registration metadata (`text/xml`
    /// strings) contributes the contents of its `<user>` elements. Anything
    /// else yields an empty string.
    pub fn user_info(&self, index: usize) -> Result<String> {
        match self.data(index)? {
            Some(ChannelData::User(points)) => Ok(points
                .iter()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .collect()),
            Some(ChannelData::String(docs))
                if self.mime(index)?.as_deref() == Some(REGISTRATION_MIME) =>
            {
                let mut info = String::new();
                for doc in &docs {
                    if let (Some(open), Some(close)) = (doc.find("<user>"), doc.rfind("</user>")) {
                        if open + 6 <= close {
                            info.push_str(&doc[open + 6..close]);
                        }
                    }
                }
                Ok(info)
            }
            _ => Ok(String::new()),
        }
    }

    /// Per-point times of channel `index`.
    pub fn times(&self, index: usize) -> Result<Vec<f64>> {
        Ok(self
            .channel(index)?
            .result
            .as_ref()
            .map(|r| r.times().to_vec())
            .unwrap_or_default())
    }

    /// Earliest time of channel `index`.
    pub fn time_start(&self, index: usize) -> Result<f64> {
        Ok(self.channel(index)?.result.as_ref().map_or(0.0, DataArray::start))
    }

    /// Span of the times of channel `index`.
    pub fn time_duration(&self, index: usize) -> Result<f64> {
        Ok(self
            .channel(index)?
            .result
            .as_ref()
            .map_or(0.0, DataArray::duration))
    }
}

fn trim_name(name: String, remove_leading_slash: bool) -> String {
    match name.strip_prefix('/') {
        Some(rest) if remove_leading_slash => rest.to_string(),
        _ => name,
    }
}
