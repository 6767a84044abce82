//! Channel maps: the client-side registry of named channels.
//!
//! A [`ChannelMap`] maps channel names to stable indices and stages data for
//! output. Sources fill it with `put_*` calls and flush it; sinks add the
//! names they want, send a request built from it and read results back
//! through the typed `data_as_*` accessors.
//!
//! # Example
//!
//! ```
//! use turbine_rs::ChannelMap;
//!
//! let mut map = ChannelMap::new();
//! let c0 = map.add("c0").unwrap();
//! map.put_time(0.0, 1.0);
//! map.put_data_as_i32(c0, &[1, 2, 3]).unwrap();
//! assert_eq!(map.len(), 1);
//! assert_eq!(map.index_of("c0"), Some(0));
//! ```
//!
//! # Modules
//!
//! - `time` - the time-mode state machine and frame time handling
//! - `put` - typed puts and the consistency merge that shapes output trees
//! - `output` - output trees and request construction
//! - `result` - decoding server results and the typed accessors
//! - [`plugin`] - the PlugIn flavour of a channel map

mod output;
pub mod plugin;
mod put;
mod result;
mod time;

pub use plugin::{PlugInChannelMap, RequestType};
pub use time::TimeMode;

use crate::error::{Result, TurbineError};
use crate::rmap::{DataArray, DataTree, NodeId, NodeKind};
use crate::types::DataType;
use std::collections::{HashMap, HashSet};
use time::TimeState;

/// Delimiters used to split channel text into search tokens.
const SEARCH_DELIMITERS: &str = " \t\n\r\x0c:;'\",.`()[]{}";

/// One registered channel.
#[derive(Debug, Clone)]
pub(crate) struct Channel {
    pub(crate) name: String,
    /// Node holding this channel's staged output
    pub(crate) node: Option<NodeId>,
    /// Data decoded from the last result
    pub(crate) result: Option<DataArray>,
    /// MIME type applied to data written after it was set
    pub(crate) mime: Option<String>,
    /// Child of `node` that the next consistent write extends
    pub(crate) last_consistent_child: Option<usize>,
    /// Value of the time-set counter at this channel's last time check
    pub(crate) last_set_time_count: u64,
}

/// Ordered name to index registry with staged output and fetched results.
#[derive(Debug, Clone)]
pub struct ChannelMap {
    channels: Vec<Channel>,
    by_name: HashMap<String, usize>,
    folders: Vec<String>,
    folder_set: HashSet<String>,
    /// Base frame of the staged output
    output: DataTree,
    /// Result tree kept for forwarding and browsing
    response: Option<DataTree>,
    fetched_folders: Vec<String>,
    fetch_timed_out: bool,
    time: TimeState,
    channels_put: usize,
    time_per_channel: bool,
    set_time_counter: u64,
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelMap {
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
            by_name: HashMap::new(),
            folders: Vec::new(),
            folder_set: HashSet::new(),
            output: DataTree::new(),
            response: None,
            fetched_folders: Vec::new(),
            fetch_timed_out: false,
            time: TimeState::default(),
            channels_put: 0,
            time_per_channel: false,
            set_time_counter: 0,
        }
    }

    /// Register a channel, returning its index. Re-adding a name returns the
    /// existing index.
    pub fn add(&mut self, name: &str) -> Result<usize> {
        if name.is_empty() {
            return Err(TurbineError::InvalidArgument(
                "Channel name must not be empty".into(),
            ));
        }
        if name.ends_with('/') {
            return Err(TurbineError::InvalidArgument(format!(
                "Channel name \"{}\" ends with '/'; use add_folder for folders",
                name
            )));
        }
        Ok(self.add_unchecked(name))
    }

    fn add_unchecked(&mut self, name: &str) -> usize {
        if let Some(index) = self.by_name.get(name) {
            return *index;
        }
        let index = self.channels.len();
        self.channels.push(Channel {
            name: name.to_string(),
            node: None,
            result: None,
            mime: None,
            last_consistent_child: None,
            last_set_time_count: self.set_time_counter,
        });
        self.by_name.insert(name.to_string(), index);
        index
    }

    /// Register an empty folder. A trailing slash is ignored.
    pub fn add_folder(&mut self, name: &str) -> Result<()> {
        let trimmed = name.strip_suffix('/').unwrap_or(name);
        if trimmed.is_empty() {
            return Err(TurbineError::InvalidArgument(
                "Folder name must not be empty".into(),
            ));
        }
        if self.folder_set.insert(trimmed.to_string()) {
            let root = self.output.root();
            self.output.add_channel(root, trimmed);
            self.folders.push(trimmed.to_string());
        }
        Ok(())
    }

    /// Drop every channel, folder and staged datum. Indices become invalid.
    pub fn clear(&mut self) {
        self.channels.clear();
        self.by_name.clear();
        self.folders.clear();
        self.folder_set.clear();
        self.fetched_folders.clear();
        self.fetch_timed_out = false;
        self.clear_data();
    }

    /// Index of `name`, if registered.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, index: usize) -> Result<&str> {
        Ok(&self.channel(index)?.name)
    }

    /// Number of channels
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Channels written since the staged output was last cleared.
    pub(crate) fn channels_put(&self) -> usize {
        self.channels_put
    }

    /// True when the last fetch into this map returned nothing.
    pub fn fetch_timed_out(&self) -> bool {
        self.fetch_timed_out
    }

    /// Names of all channels, in index order.
    pub fn channel_list(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name.clone()).collect()
    }

    /// Folders reported by the last result.
    pub fn folder_list(&self) -> Vec<String> {
        self.fetched_folders.clone()
    }

    /// Folders registered with [`add_folder`](Self::add_folder).
    pub fn registered_folders(&self) -> &[String] {
        &self.folders
    }

    /// Full names of every named node in the result, or of the registered
    /// channel hierarchy when nothing was fetched.
    pub fn node_list(&self) -> Vec<String> {
        let tree = match &self.response {
            Some(tree) => tree.clone(),
            None => {
                let mut tree = DataTree::new();
                let root = tree.root();
                for ch in &self.channels {
                    tree.add_channel(root, &ch.name);
                }
                tree
            }
        };
        tree.walk(tree.root())
            .into_iter()
            .skip(1)
            .filter(|id| {
                let node = tree.node(*id);
                node.is_named() && !node.is_dot()
            })
            .map(|id| tree.full_name(id))
            .collect()
    }

    fn clients_of(&self, kind: NodeKind) -> Vec<String> {
        let Some(tree) = &self.response else {
            return Vec::new();
        };
        tree.walk(tree.root())
            .into_iter()
            .filter(|id| tree.node(*id).kind == kind)
            .map(|id| tree.full_name(id))
            .collect()
    }

    /// Servers present in the last registration result.
    pub fn server_list(&self) -> Vec<String> {
        self.clients_of(NodeKind::Server)
    }

    /// Sources (not sinks) present in the last registration result.
    pub fn source_list(&self) -> Vec<String> {
        self.clients_of(NodeKind::Source)
    }

    pub fn sink_list(&self) -> Vec<String> {
        self.clients_of(NodeKind::Sink)
    }

    pub fn plugin_list(&self) -> Vec<String> {
        self.clients_of(NodeKind::PlugIn)
    }

    /// Result tree kept by the last fetch, if any.
    pub fn response(&self) -> Option<&DataTree> {
        self.response.as_ref()
    }

    /// Channels whose MIME type equals `mime` and whose text contains every
    /// whitespace-separated keyword. Empty filters match everything.
    pub fn search(&self, mime: Option<&str>, keywords: Option<&str>) -> Vec<usize> {
        let mime = mime.filter(|m| !m.is_empty());
        let keywords = keywords.filter(|k| !k.is_empty());
        if mime.is_none() && keywords.is_none() {
            return (0..self.len()).collect();
        }

        let words: Vec<String> = keywords
            .map(|k| k.split_whitespace().map(str::to_lowercase).collect())
            .unwrap_or_default();

        let mut hits = Vec::new();
        for index in 0..self.len() {
            let channel_mime = self.mime(index).ok().flatten();
            let data_type = self.data_type(index).unwrap_or(DataType::Unknown);
            let mimes_equal = mime.map_or(true, |m| channel_mime.as_deref() == Some(m));

            if words.is_empty() && mimes_equal {
                hits.push(index);
                continue;
            }

            let text_mime =
                mime.is_none() && channel_mime.as_deref().is_some_and(|m| m.starts_with("text/"));
            let text = if mimes_equal || text_mime {
                match data_type {
                    DataType::String => self.first_string(index),
                    DataType::Int8 => self.data_as_i8(index).ok().map(|v| {
                        let bytes: Vec<u8> = v.iter().map(|b| *b as u8).collect();
                        String::from_utf8_lossy(&bytes).into_owned()
                    }),
                    _ => continue,
                }
            } else {
                continue;
            };

            let matched = match text {
                Some(text) => {
                    let lower = text.to_lowercase();
                    let tokens: HashSet<&str> = lower
                        .split(|c: char| SEARCH_DELIMITERS.contains(c))
                        .filter(|t| !t.is_empty())
                        .collect();
                    words.iter().all(|w| tokens.contains(w.as_str()))
                }
                None => words.is_empty(),
            };
            if matched {
                hits.push(index);
            }
        }
        hits
    }

    fn first_string(&self, index: usize) -> Option<String> {
        self.data_as_string(index).ok()?.into_iter().next()
    }

    pub(crate) fn channel(&self, index: usize) -> Result<&Channel> {
        self.channels.get(index).ok_or(TurbineError::IndexOutOfRange {
            index,
            len: self.channels.len(),
        })
    }

    pub(crate) fn channel_mut(&mut self, index: usize) -> Result<&mut Channel> {
        let len = self.channels.len();
        self.channels
            .get_mut(index)
            .ok_or(TurbineError::IndexOutOfRange { index, len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_add_is_idempotent() {
        let mut map = ChannelMap::new();
        assert_eq!(map.add("a").unwrap(), 0);
        assert_eq!(map.add("b").unwrap(), 1);
        assert_eq!(map.add("a").unwrap(), 0);
        assert_eq!(map.len(), 2);
        assert_eq!(map.name(1).unwrap(), "b");
    }

    #[test]
    fn test_add_rejects_trailing_slash() {
        let mut map = ChannelMap::new();
        assert!(matches!(
            map.add("folder/"),
            Err(TurbineError::InvalidArgument(_))
        ));
        map.add_folder("folder/").unwrap();
        map.add_folder("folder").unwrap();
        assert_eq!(map.registered_folders(), &["folder".to_string()]);
        assert!(map.is_empty());
    }

    #[test]
    fn test_clear_invalidates_indices() {
        let mut map = ChannelMap::new();
        map.add("a").unwrap();
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.index_of("a"), None);
        assert!(matches!(
            map.name(0),
            Err(TurbineError::IndexOutOfRange { index: 0, len: 0 })
        ));
    }

    #[test]
    fn test_node_list_without_response() {
        let mut map = ChannelMap::new();
        map.add("/S/src/c0").unwrap();
        map.add("/S/src/c1").unwrap();
        assert_eq!(
            map.node_list(),
            vec!["/S", "/S/src", "/S/src/c0", "/S/src/c1"]
        );
    }

    #[test]
    fn test_search_by_keyword_and_mime() {
        let mut map = ChannelMap::new();
        let a = map.add("notes").unwrap();
        let b = map.add("values").unwrap();
        map.put_data_as_string(a, "Pump, station (north)").unwrap();
        map.put_mime(a, "text/plain");
        map.put_data_as_f64(b, &[1.0]).unwrap();
        let mut echo = ChannelMap::new();
        echo.process_result(Some(map.produce_output()), false, false);

        let notes = echo.index_of("notes").unwrap();
        assert_eq!(echo.search(None, Some("pump north")), vec![notes]);
        assert!(echo.search(None, Some("south")).is_empty());
        assert_eq!(echo.search(Some("text/plain"), None), vec![notes]);
        assert_eq!(echo.search(None, None).len(), 2);
    }

    proptest! {
        #[test]
        fn prop_indices_follow_first_add_order(names in proptest::collection::vec("[a-d]{1,2}", 1..40)) {
            let mut map = ChannelMap::new();
            let mut first_seen: Vec<String> = Vec::new();
            for name in &names {
                let index = map.add(name).unwrap();
                match first_seen.iter().position(|n| n == name) {
                    Some(pos) => prop_assert_eq!(index, pos),
                    None => {
                        prop_assert_eq!(index, first_seen.len());
                        first_seen.push(name.clone());
                    }
                }
            }
            prop_assert_eq!(map.len(), first_seen.len());
            prop_assert_eq!(map.channel_list(), first_seen);
        }
    }
}
