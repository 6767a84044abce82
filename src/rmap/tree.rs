//! Arena-backed data tree.
//!
//! Nodes are stored in a flat `Vec` indexed by [`NodeId`]; parent and child
//! relations are handles into the same vector. Detaching a node unlinks it from
//! its parent but leaves its slot in place, so handles held by a channel map
//! stay valid until the tree is replaced.
//!
//! ## Naming
//!
//! Node names are single path segments. Absolute channel names
//! (`/server/source/chan`) hang directly below the base node, relative names
//! (`source/chan`) hang below a `.` node:
//!
//! ```text
//! (root)
//! +-- server
//! |   +-- source
//! |       +-- chan      full name "/server/source/chan"
//! +-- .
//!     +-- source
//!         +-- chan      full name "source/chan"
//! ```

use super::data_block::DataBlock;
use super::id::NodeId;
use super::time_range::TimeRange;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Name of the node that roots relative channel names.
pub const DOT: &str = ".";

/// Client-kind tag of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NodeKind {
    /// Folder, channel or unnamed data holder
    #[default]
    Generic,
    Server,
    Source,
    Sink,
    PlugIn,
    Controller,
    /// Terminates a response stream
    EndOfStream,
}

/// One node of a [`DataTree`].
#[derive(Debug, Clone)]
pub struct DataNode {
    pub name: Option<String>,
    pub kind: NodeKind,
    /// Time range, inherited by descendants that carry none
    pub time: Option<TimeRange>,
    /// Frame-index range
    pub frame: Option<TimeRange>,
    pub block: Option<DataBlock>,
    parent: NodeId,
    children: Vec<NodeId>,
}

impl Default for DataNode {
    fn default() -> Self {
        Self {
            name: None,
            kind: NodeKind::Generic,
            time: None,
            frame: None,
            block: None,
            parent: NodeId::INVALID,
            children: Vec::new(),
        }
    }
}

impl DataNode {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn unnamed() -> Self {
        Self::default()
    }

    pub fn with_block(mut self, block: DataBlock) -> Self {
        self.block = Some(block);
        self
    }

    pub fn with_optional_block(mut self, block: Option<DataBlock>) -> Self {
        self.block = block;
        self
    }

    pub fn with_time(mut self, time: Option<TimeRange>) -> Self {
        self.time = time;
        self
    }

    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_named(&self) -> bool {
        self.name.is_some()
    }

    pub fn is_dot(&self) -> bool {
        self.name.as_deref() == Some(DOT)
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent.is_valid().then_some(self.parent)
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Move the block and time range out into a new unnamed node.
    pub fn take_payload(&mut self) -> DataNode {
        DataNode::unnamed()
            .with_time(self.time.take())
            .with_optional_block(self.block.take())
    }

    /// Copy of the node's own content without links.
    fn detached_copy(&self) -> DataNode {
        DataNode {
            name: self.name.clone(),
            kind: self.kind,
            time: self.time.clone(),
            frame: self.frame.clone(),
            block: self.block.clone(),
            parent: NodeId::INVALID,
            children: Vec::new(),
        }
    }
}

/// Data and timing gathered for one channel out of a tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataArray {
    block: Option<DataBlock>,
    times: Vec<f64>,
    point_duration: f64,
    start: Option<f64>,
    end: Option<f64>,
}

impl DataArray {
    /// Append one block with the time range in effect for it.
    pub fn push_segment(&mut self, block: &DataBlock, time: Option<&TimeRange>) {
        let points = block.points();
        if let Some(tr) = time.filter(|tr| !tr.is_server_tod()) {
            if points > 0 {
                self.times.extend(tr.copy_times(points));
                self.point_duration = tr.point_duration(points);
            }
            let start = tr.start();
            let end = tr.end();
            self.start = Some(self.start.map_or(start, |s| s.min(start)));
            self.end = Some(self.end.map_or(end, |e| e.max(end)));
        }

        let replace = self.block.as_ref().map_or(true, DataBlock::is_marker);
        if replace {
            self.block = Some(block.clone());
        } else if let Some(existing) = self.block.as_mut() {
            if existing.data_type() == block.data_type() {
                existing.append(block.clone());
            } else if !block.is_marker() {
                tracing::warn!(
                    "Dropping {} segment merged into {} channel",
                    block.data_type(),
                    existing.data_type()
                );
            }
        }
    }

    pub fn block(&self) -> Option<&DataBlock> {
        self.block.as_ref()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn points(&self) -> usize {
        self.block.as_ref().map_or(0, DataBlock::points)
    }

    /// Earliest time, or 0 when no time is known.
    pub fn start(&self) -> f64 {
        self.start.unwrap_or(0.0)
    }

    /// Span from the earliest to the latest covered time.
    pub fn duration(&self) -> f64 {
        match (self.start, self.end) {
            (Some(s), Some(e)) => e - s,
            _ => 0.0,
        }
    }

    /// Per-point time range usable as a time reference for another channel.
    pub fn time_reference(&self) -> Option<TimeRange> {
        if self.times.is_empty() {
            return None;
        }
        Some(TimeRange::shared(
            Arc::from(self.times.clone()),
            self.point_duration,
        ))
    }
}

/// Flat-storage hierarchical data tree.
#[derive(Debug, Clone)]
pub struct DataTree {
    nodes: Vec<DataNode>,
    root: NodeId,
}

impl Default for DataTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DataTree {
    /// Tree with a single unnamed root.
    pub fn new() -> Self {
        Self::with_root(DataNode::unnamed())
    }

    pub fn with_root(mut root: DataNode) -> Self {
        root.parent = NodeId::INVALID;
        root.children.clear();
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of allocated slots, including detached nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes[self.root.index()].children.is_empty()
            && self.nodes[self.root.index()].block.is_none()
    }

    /// Get a node by id (O(1) array index).
    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&DataNode> {
        if id.is_valid() {
            self.nodes.get(id.index())
        } else {
            None
        }
    }

    /// Node by id. Panics on a handle from another tree.
    #[inline]
    pub fn node(&self, id: NodeId) -> &DataNode {
        &self.nodes[id.index()]
    }

    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut DataNode {
        &mut self.nodes[id.index()]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent()
    }

    /// Add `node` as the last child of `parent`.
    pub fn add_child(&mut self, parent: NodeId, node: DataNode) -> NodeId {
        let len = self.nodes[parent.index()].children.len();
        self.insert_child(parent, len, node)
    }

    /// Insert `node` at `position` among the children of `parent`.
    pub fn insert_child(&mut self, parent: NodeId, position: usize, mut node: DataNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        node.parent = parent;
        node.children.clear();
        self.nodes.push(node);
        let children = &mut self.nodes[parent.index()].children;
        let position = position.min(children.len());
        children.insert(position, id);
        id
    }

    /// Unlink `id` from its parent. The slot stays allocated.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.index()].parent() {
            self.nodes[parent.index()].children.retain(|c| *c != id);
        }
        self.nodes[id.index()].parent = NodeId::INVALID;
    }

    /// Move `id` (with its subtree) under `new_parent`.
    pub fn reparent(&mut self, id: NodeId, new_parent: NodeId) {
        self.detach(id);
        self.nodes[id.index()].parent = new_parent;
        self.nodes[new_parent.index()].children.push(id);
    }

    /// Move `id` under `new_parent` at child `position`.
    pub fn reparent_at(&mut self, id: NodeId, new_parent: NodeId, position: usize) {
        self.detach(id);
        self.nodes[id.index()].parent = new_parent;
        let children = &mut self.nodes[new_parent.index()].children;
        let position = position.min(children.len());
        children.insert(position, id);
    }

    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[parent.index()]
            .children
            .iter()
            .copied()
            .find(|c| self.nodes[c.index()].name.as_deref() == Some(name))
    }

    fn child_or_insert(&mut self, parent: NodeId, name: &str) -> NodeId {
        match self.find_child(parent, name) {
            Some(id) => id,
            None => self.add_child(parent, DataNode::named(name)),
        }
    }

    /// Find or create the node path for a channel name below `base`.
    ///
    /// Absolute names start at `base`; relative names start at its `.` child.
    pub fn add_channel(&mut self, base: NodeId, name: &str) -> NodeId {
        let (mut cur, path) = match name.strip_prefix('/') {
            Some(rest) => (base, rest),
            None => (self.child_or_insert(base, DOT), name),
        };
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            cur = self.child_or_insert(cur, segment);
        }
        cur
    }

    /// Look up a channel name below `base` without creating anything.
    pub fn find_descendant(&self, base: NodeId, name: &str) -> Option<NodeId> {
        let (mut cur, path) = match name.strip_prefix('/') {
            Some(rest) => (base, rest),
            None => (self.find_child(base, DOT)?, name),
        };
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            cur = self.find_child(cur, segment)?;
        }
        Some(cur)
    }

    /// Slash-joined path of the named ancestors of `id`, itself included.
    ///
    /// Paths below a top-level `.` are relative, all others absolute. Inner
    /// `.` segments are dropped.
    pub fn full_name(&self, id: NodeId) -> String {
        let mut segments = Vec::new();
        let mut cur = Some(id);
        while let Some(node_id) = cur {
            let node = &self.nodes[node_id.index()];
            if let Some(name) = node.name.as_deref() {
                segments.push(name);
            }
            cur = node.parent();
        }
        segments.reverse();
        let relative = segments.first() == Some(&DOT);
        segments.retain(|s| *s != DOT);
        if relative {
            segments.join("/")
        } else if segments.is_empty() {
            String::new()
        } else {
            format!("/{}", segments.join("/"))
        }
    }

    /// Nearest ancestor-or-self that is named and not a `.` node.
    pub fn named_endpoint(&self, id: NodeId) -> Option<NodeId> {
        let mut cur = Some(id);
        while let Some(node_id) = cur {
            let node = &self.nodes[node_id.index()];
            if node.is_named() && !node.is_dot() {
                return Some(node_id);
            }
            cur = node.parent();
        }
        None
    }

    /// Pre-order walk of the subtree at `from`.
    pub fn walk(&self, from: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.nodes[id.index()].children.iter().rev().copied());
        }
        out
    }

    /// Nodes without children below `from`, in pre-order.
    pub fn leaves(&self, from: NodeId) -> Vec<NodeId> {
        self.walk(from)
            .into_iter()
            .filter(|id| self.nodes[id.index()].children.is_empty())
            .collect()
    }

    /// A node holds channel data when it has a block, or when its first
    /// child is unnamed and carries a time range or a block.
    pub fn is_channel(&self, id: NodeId) -> bool {
        let node = &self.nodes[id.index()];
        if node.block.is_some() {
            return true;
        }
        node.children.first().is_some_and(|c| {
            let child = &self.nodes[c.index()];
            !child.is_named() && (child.time.is_some() || child.block.is_some())
        })
    }

    /// Remove every time and frame range below `from`.
    pub fn strip_times(&mut self, from: NodeId) {
        for id in self.walk(from) {
            let node = &mut self.nodes[id.index()];
            node.time = None;
            node.frame = None;
        }
    }

    /// Fold away levels that carry no information of their own.
    ///
    /// Empty nodes are dropped (end-of-stream markers excepted), a node with a
    /// single child absorbs that child when they do not both carry the same
    /// field, and a time range shared by all named children moves up to the
    /// parent. Returns false when `id` itself should be removed.
    pub fn collapse(&mut self, id: NodeId) -> bool {
        let children = self.nodes[id.index()].children.clone();
        let mut kept = Vec::with_capacity(children.len());
        for child in children {
            if self.collapse(child) {
                kept.push(child);
            } else {
                self.nodes[child.index()].parent = NodeId::INVALID;
            }
        }
        self.nodes[id.index()].children = kept;

        let node = &self.nodes[id.index()];
        if node.children.is_empty() && node.block.is_none() {
            return node.kind == NodeKind::EndOfStream;
        }

        if node.children.len() == 1 {
            let child_id = node.children[0];
            let child = &self.nodes[child_id.index()];
            let fits = node.parent.is_valid()
                && node.kind == NodeKind::Generic
                && child.kind == NodeKind::Generic
                && (node.name.is_none() || child.name.is_none())
                && (node.time.is_none() || child.time.is_none())
                && (node.frame.is_none() || child.frame.is_none())
                && (node.block.is_none() || child.block.is_none());
            if fits {
                let child = std::mem::take(&mut self.nodes[child_id.index()]);
                let grandchildren = child.children;
                let node = &mut self.nodes[id.index()];
                node.children.clear();
                if child.name.is_some() {
                    node.name = child.name;
                }
                if child.time.is_some() {
                    node.time = child.time;
                }
                if child.frame.is_some() {
                    node.frame = child.frame;
                }
                if child.block.is_some() {
                    node.block = child.block;
                }
                for grandchild in grandchildren {
                    self.nodes[grandchild.index()].parent = id;
                    self.nodes[id.index()].children.push(grandchild);
                }
            }
        } else {
            self.hoist_common_time(id);
        }
        true
    }

    fn hoist_common_time(&mut self, id: NodeId) {
        let node = &self.nodes[id.index()];
        if node.time.is_some() {
            return;
        }
        let Some(first) = node.children.first() else {
            return;
        };
        let Some(common) = self.nodes[first.index()].time.clone() else {
            return;
        };
        let mut seen = HashSet::new();
        for child in &node.children {
            let child = &self.nodes[child.index()];
            let Some(name) = child.name.as_deref() else {
                return;
            };
            if !seen.insert(name) || child.time.as_ref() != Some(&common) {
                return;
            }
        }
        let children = node.children.clone();
        for child in children {
            self.nodes[child.index()].time = None;
        }
        self.nodes[id.index()].time = Some(common);
    }

    /// Deep-copy the subtree `src_id` of `src` below `parent`.
    pub fn graft(&mut self, parent: NodeId, src: &DataTree, src_id: NodeId) -> NodeId {
        let copy = self.add_child(parent, src.node(src_id).detached_copy());
        for child in src.children(src_id) {
            self.graft(copy, src, *child);
        }
        copy
    }

    /// Independent tree rooted at a copy of `id`.
    pub fn subtree(&self, id: NodeId) -> DataTree {
        let mut out = DataTree::with_root(self.node(id).detached_copy());
        let root = out.root();
        for child in self.children(id) {
            out.graft(root, self, *child);
        }
        out
    }

    /// Gather every data-bearing node below `from` by channel.
    ///
    /// Unnamed data nodes belong to their nearest named ancestor, skipping `.`
    /// nodes; channels keep first-seen order. Named leaves without data are
    /// reported separately as folders.
    pub fn extract(&self, from: NodeId) -> Extracted {
        let mut extracted = Extracted::default();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut stack: Vec<(NodeId, Option<TimeRange>)> = vec![(from, None)];

        while let Some((id, inherited)) = stack.pop() {
            let node = &self.nodes[id.index()];
            let time = node.time.clone().or(inherited);

            if let Some(block) = &node.block {
                let name = self
                    .named_endpoint(id)
                    .map(|e| self.full_name(e))
                    .unwrap_or_else(|| DOT.to_string());
                let slot = *index.entry(name.clone()).or_insert_with(|| {
                    extracted.channels.push((name, DataArray::default()));
                    extracted.channels.len() - 1
                });
                extracted.channels[slot].1.push_segment(block, time.as_ref());
            } else if node.children.is_empty()
                && node.is_named()
                && !node.is_dot()
                && node.kind == NodeKind::Generic
            {
                extracted.folders.push(self.full_name(id));
            }

            for child in node.children.iter().rev() {
                stack.push((*child, time.clone()));
            }
        }
        extracted
    }
}

/// Result of [`DataTree::extract`].
#[derive(Debug, Clone, Default)]
pub struct Extracted {
    pub channels: Vec<(String, DataArray)>,
    pub folders: Vec<String>,
}

impl fmt::Display for DataTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack = vec![(self.root, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let node = &self.nodes[id.index()];
            write!(f, "{:indent$}", "", indent = depth * 2)?;
            write!(f, "{}", node.name.as_deref().unwrap_or("<>"))?;
            if node.kind != NodeKind::Generic {
                write!(f, " [{:?}]", node.kind)?;
            }
            if let Some(tr) = &node.time {
                write!(f, " t={}+{}", tr.start(), tr.duration())?;
            }
            if let Some(block) = &node.block {
                write!(f, " {}x{}", block.points(), block.data_type())?;
            }
            writeln!(f)?;
            for child in node.children.iter().rev() {
                stack.push((*child, depth + 1));
            }
        }
        Ok(())
    }
}
