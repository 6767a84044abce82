//! Output trees and request construction.

use super::ChannelMap;
use crate::error::{Result, TurbineError};
use crate::rmap::{DataBlock, DataRequest, DataTree, DOT};

impl ChannelMap {
    /// Tree holding everything staged for the next flush, followed by any
    /// kept response being forwarded.
    pub(crate) fn produce_output(&self) -> DataTree {
        let mut out = DataTree::new();
        let root = out.root();
        let base = self.output.root();
        let base_node = self.output.node(base);
        if base_node.is_named() || !self.output.children(base).is_empty() {
            out.graft(root, &self.output, base);
        }
        if let Some(response) = &self.response {
            out.graft(root, response, response.root());
        }
        out
    }

    /// Build a request naming every channel of the map.
    ///
    /// Channels without staged data are requested through empty markers;
    /// staged data (PlugIn options) travels with the request. Times are
    /// stripped. With `strict`, mixing channels that carry data with channels
    /// that carry none is rejected. Staged output is cleared once the request
    /// is built.
    pub fn produce_request(&mut self, strict: bool) -> Result<DataRequest> {
        if strict {
            self.check_mixed_channels()?;
        }

        let mut tree = self.output.subtree(self.output.root());
        let root = tree.root();
        for channel in &self.channels {
            if channel.node.is_none() {
                let node = tree.add_channel(root, &channel.name);
                tree.node_mut(node).block = Some(DataBlock::marker());
            }
        }
        if let Some(response) = &self.response {
            tree.graft(root, response, response.root());
        }
        tree.strip_times(root);
        tree.collapse(root);
        hoist_unnamed_heads(&mut tree);

        self.clear_data();
        if tree.is_empty() {
            return Err(TurbineError::EmptyRequest);
        }
        Ok(DataRequest::new(tree))
    }

    /// Request-shaped tree describing the channels and folders to register.
    ///
    /// Folders are kept as named leaves without data.
    pub(crate) fn produce_registration(&mut self) -> Result<DataTree> {
        let folders = self.folders.clone();
        let mut tree = match self.produce_request(false) {
            Ok(request) => request.tree,
            Err(TurbineError::EmptyRequest) if !folders.is_empty() => DataTree::new(),
            Err(e) => return Err(e),
        };
        let root = tree.root();
        for folder in &folders {
            tree.add_channel(root, folder);
        }
        tree.strip_times(root);
        Ok(tree)
    }

    /// Discard staged output and the kept response. Channel names, fetched
    /// results and the time mode survive; the next frame's first time set
    /// stamps data already written to it.
    pub fn clear_data(&mut self) {
        self.output = DataTree::new();
        self.response = None;
        for channel in &mut self.channels {
            channel.node = None;
            channel.last_consistent_child = None;
        }
        // folders live in the output tree
        let root = self.output.root();
        for folder in &self.folders {
            self.output.add_channel(root, folder);
        }
        self.channels_put = 0;
        self.time_per_channel = false;
        self.time.frame_stamped = false;
    }

    fn check_mixed_channels(&self) -> Result<()> {
        let mut with_data = false;
        let mut without_data = false;
        for channel in &self.channels {
            if channel.name.ends_with("/.") {
                continue;
            }
            if channel.node.is_some() {
                with_data = true;
            } else {
                without_data = true;
            }
        }
        if with_data && without_data {
            return Err(TurbineError::IllegalMixedChannels);
        }
        Ok(())
    }
}

/// Replace unnamed top-level nodes by their children, which inherit the
/// node's time when they carry none. An unnamed leaf becomes a `.` node.
fn hoist_unnamed_heads(tree: &mut DataTree) {
    let root = tree.root();
    let mut position = 0;
    while position < tree.children(root).len() {
        let top = tree.children(root)[position];
        let node = tree.node(top);
        if node.is_named() {
            position += 1;
            continue;
        }
        let kids = node.children().to_vec();
        if kids.is_empty() || node.block.is_some() {
            tree.node_mut(top).name = Some(DOT.to_string());
            position += 1;
            continue;
        }
        let time = node.time.clone();
        tree.detach(top);
        for (offset, kid) in kids.into_iter().enumerate() {
            if tree.node(kid).time.is_none() {
                tree.node_mut(kid).time = time.clone();
            }
            tree.reparent_at(kid, root, position + offset);
        }
    }
}
