//! Read-only hierarchical view of a channel map.
//!
//! Built from the map's output tree (staged data plus any kept registration
//! response). Every named node other than `.` becomes a [`TreeNode`] typed as
//! a client kind, a channel or a folder. Siblings are kept sorted by full
//! name, so a pre-order walk is lexicographic:
//!
//! ```text
//! /S          (Server)
//! /S/a        (Source)
//! /S/a/c      (Channel, size=4, mime=application/octet-stream)
//! /S/b        (Folder)
//! ```
//!
//! Nodes live in a flat `Vec` indexed by [`NodeId`], like the data trees.

use crate::channel_map::ChannelMap;
use crate::rmap::{DataTree, NodeId, NodeKind};
use crate::types::DataType;
use std::collections::HashMap;
use std::fmt;

const REGISTRATION_MIME: &str = "text/xml";

/// Classification of a [`TreeNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Controller,
    Server,
    Source,
    PlugIn,
    Sink,
    Folder,
    Channel,
}

impl NodeType {
    pub fn name(self) -> &'static str {
        match self {
            NodeType::Controller => "Controller",
            NodeType::Server => "Server",
            NodeType::Source => "Source",
            NodeType::PlugIn => "PlugIn",
            NodeType::Sink => "Sink",
            NodeType::Folder => "Folder",
            NodeType::Channel => "Channel",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One node of a [`ChannelTree`].
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub name: String,
    pub full_name: String,
    pub node_type: NodeType,
    /// 0 for roots
    pub depth: usize,
    /// Registered element size, from the server's metadata
    pub size: Option<usize>,
    pub mime: Option<String>,
    pub start: f64,
    pub duration: f64,
    parent: NodeId,
    children: Vec<NodeId>,
}

impl TreeNode {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent.is_valid().then_some(self.parent)
    }

    /// Children, sorted by full name.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Read `<size>` and `<mime>` out of an `<rbnb>` metadata document.
    fn parse_xml(&mut self, doc: &str) {
        if !doc.contains("<rbnb>") {
            return;
        }
        if let Some(size) = xml_field(doc, "<size>") {
            self.size = size.parse().ok();
        }
        if let Some(mime) = xml_field(doc, "<mime>") {
            self.mime = Some(mime.to_string());
        }
    }
}

fn xml_field<'a>(doc: &'a str, tag: &str) -> Option<&'a str> {
    let start = doc.find(tag)? + tag.len();
    let end = doc[start..].find('<').map_or(doc.len(), |e| start + e);
    Some(doc[start..end].trim())
}

impl fmt::Display for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}", self.name, self.node_type)?;
        if self.node_type == NodeType::Channel {
            let start = chrono::DateTime::from_timestamp_millis((self.start * 1e3) as i64)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string())
                .unwrap_or_else(|| self.start.to_string());
            write!(f, ", size=")?;
            match self.size {
                Some(size) => write!(f, "{}", size)?,
                None => write!(f, "-1")?,
            }
            write!(
                f,
                ", start={}, duration={}, mime={}",
                start,
                self.duration,
                self.mime.as_deref().unwrap_or("null")
            )?;
        }
        write!(f, ")")
    }
}

/// Sorted, read-only channel hierarchy.
#[derive(Debug, Clone, Default)]
pub struct ChannelTree {
    nodes: Vec<TreeNode>,
    roots: Vec<NodeId>,
    by_name: HashMap<String, NodeId>,
}

impl ChannelTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// View of every named node of `map`'s output.
    pub fn from_channel_map(map: &ChannelMap) -> Self {
        let output = map.produce_output();
        let mut tree = Self::new();
        tree.visit(map, &output, output.root(), NodeId::INVALID, 0, "");
        tree
    }

    /// Same as [`from_channel_map`](Self::from_channel_map), with every node
    /// placed under a folder called `root_name`.
    pub fn from_channel_map_with_root(map: &ChannelMap, root_name: &str) -> Self {
        let output = map.produce_output();
        let mut tree = Self::new();
        let prefix = format!("/{}", root_name);
        let root = tree.insert(TreeNode {
            name: root_name.to_string(),
            full_name: prefix.clone(),
            node_type: NodeType::Folder,
            depth: 0,
            size: None,
            mime: None,
            start: 0.0,
            duration: 0.0,
            parent: NodeId::INVALID,
            children: Vec::new(),
        });
        tree.visit(map, &output, output.root(), root, 1, &prefix);
        tree
    }

    fn visit(
        &mut self,
        map: &ChannelMap,
        output: &DataTree,
        id: NodeId,
        parent: NodeId,
        depth: usize,
        prefix: &str,
    ) {
        let node = output.node(id);
        let mut parent = parent;
        let mut depth = depth;

        if let Some(name) = node.name().filter(|_| !node.is_dot()) {
            let path = output.full_name(id);
            let full_name = if path.starts_with('/') || prefix.is_empty() {
                format!("{}{}", prefix, path)
            } else {
                format!("{}/{}", prefix, path)
            };
            let node_type = classify(output, id);

            let existing = self.by_name.get(&full_name).copied();
            let tree_id = match existing {
                Some(existing) => {
                    let slot = &mut self.nodes[existing.index()];
                    if slot.node_type == NodeType::Folder {
                        slot.node_type = node_type;
                    }
                    existing
                }
                None => self.insert(TreeNode {
                    name: name.to_string(),
                    full_name,
                    node_type,
                    depth,
                    size: None,
                    mime: None,
                    start: 0.0,
                    duration: 0.0,
                    parent,
                    children: Vec::new(),
                }),
            };
            if self.nodes[tree_id.index()].node_type == NodeType::Channel {
                self.load_metadata(map, tree_id, &path);
            }
            parent = tree_id;
            depth += 1;
        }

        for child in output.children(id) {
            self.visit(map, output, *child, parent, depth, prefix);
        }
    }

    fn load_metadata(&mut self, map: &ChannelMap, id: NodeId, path: &str) {
        let index = map
            .index_of(path)
            .or_else(|| path.strip_prefix('/').and_then(|p| map.index_of(p)));
        let Some(index) = index else {
            return;
        };
        let node = &mut self.nodes[id.index()];
        node.start = map.time_start(index).unwrap_or(0.0);
        node.duration = map.time_duration(index).unwrap_or(0.0);
        let is_metadata = map.data_type(index).ok() == Some(DataType::String)
            && map.mime(index).ok().flatten().as_deref() == Some(REGISTRATION_MIME);
        if is_metadata {
            if let Some(doc) = map.data_as_string(index).ok().and_then(|d| d.into_iter().next()) {
                node.parse_xml(&doc);
            }
        }
    }

    fn insert(&mut self, mut node: TreeNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let parent = node.parent;
        node.children.clear();
        self.by_name.insert(node.full_name.clone(), id);

        let siblings = if parent.is_valid() {
            &self.nodes[parent.index()].children
        } else {
            &self.roots
        };
        let position = siblings
            .binary_search_by(|s| self.nodes[s.index()].full_name.cmp(&node.full_name))
            .unwrap_or_else(|p| p);
        self.nodes.push(node);

        if parent.is_valid() {
            self.nodes[parent.index()].children.insert(position, id);
        } else {
            self.roots.insert(position, id);
        }
        id
    }

    /// Tree with every node of `self` plus the nodes of `other` whose full
    /// name is not already present. On collisions `self` wins.
    pub fn merge(&self, other: &ChannelTree) -> ChannelTree {
        let mut merged = self.clone();
        for node in other.iter() {
            if merged.by_name.contains_key(&node.full_name) {
                continue;
            }
            let parent = node
                .parent()
                .and_then(|p| merged.by_name.get(&other.nodes[p.index()].full_name).copied())
                .unwrap_or(NodeId::INVALID);
            merged.insert(TreeNode {
                parent,
                children: Vec::new(),
                ..node.clone()
            });
        }
        merged
    }

    pub fn find_node(&self, full_name: &str) -> Option<&TreeNode> {
        self.by_name.get(full_name).map(|id| &self.nodes[id.index()])
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.index()]
    }

    /// Top-level nodes, sorted by full name.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Pre-order walk, lexicographic by full name.
    pub fn iter(&self) -> impl Iterator<Item = &TreeNode> + '_ {
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        std::iter::from_fn(move || {
            let id = stack.pop()?;
            let node = &self.nodes[id.index()];
            stack.extend(node.children.iter().rev().copied());
            Some(node)
        })
    }
}

/// Client kinds first, then data presence.
fn classify(tree: &DataTree, id: NodeId) -> NodeType {
    match tree.node(id).kind {
        NodeKind::Controller => NodeType::Controller,
        NodeKind::Sink => NodeType::Sink,
        NodeKind::Source => NodeType::Source,
        NodeKind::PlugIn => NodeType::PlugIn,
        NodeKind::Server => NodeType::Server,
        NodeKind::Generic | NodeKind::EndOfStream if tree.is_channel(id) => NodeType::Channel,
        NodeKind::Generic | NodeKind::EndOfStream => NodeType::Folder,
    }
}

impl fmt::Display for ChannelTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelTree with {} nodes.", self.nodes.len())?;
        for node in self.iter() {
            write!(f, "\n{:indent$}{}", "", node, indent = node.depth * 2)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rmap::{DataBlock, DataNode};
    use crate::types::{ByteOrder, ChannelData};

    fn names(tree: &ChannelTree) -> Vec<String> {
        tree.iter().map(|n| n.full_name.clone()).collect()
    }

    #[test]
    fn test_pre_order_is_lexicographic() {
        let mut map = ChannelMap::new();
        for name in ["/S/b", "/S/a/c", "/S/a/b"] {
            let index = map.add(name).unwrap();
            map.put_data_as_i8(index, &[1]).unwrap();
        }
        let tree = ChannelTree::from_channel_map(&map);
        assert_eq!(names(&tree), vec!["/S", "/S/a", "/S/a/b", "/S/a/c", "/S/b"]);
        assert_eq!(tree.find_node("/S/a").unwrap().node_type, NodeType::Folder);
        assert_eq!(tree.find_node("/S/a/c").unwrap().node_type, NodeType::Channel);
        assert_eq!(tree.find_node("/S/a/c").unwrap().depth, 2);
    }

    #[test]
    fn test_client_kinds_and_metadata() {
        let mut response = DataTree::new();
        let root = response.root();
        let server = response.add_child(root, DataNode::named("S").with_kind(NodeKind::Server));
        let src = response.add_child(server, DataNode::named("src").with_kind(NodeKind::Source));
        let doc = "<rbnb><size>4</size><mime>application/octet-stream</mime></rbnb>";
        let block = DataBlock::from_data(&ChannelData::String(vec![doc.into()]), ByteOrder::Msb)
            .with_mime(Some(REGISTRATION_MIME.into()));
        response.add_child(src, DataNode::named("c").with_block(block));

        let mut map = ChannelMap::new();
        map.process_result(Some(response), true, false);
        let tree = ChannelTree::from_channel_map(&map);

        assert_eq!(tree.find_node("/S").unwrap().node_type, NodeType::Server);
        assert_eq!(tree.find_node("/S/src").unwrap().node_type, NodeType::Source);
        let channel = tree.find_node("/S/src/c").unwrap();
        assert_eq!(channel.size, Some(4));
        assert_eq!(channel.mime.as_deref(), Some("application/octet-stream"));
        assert!(channel.to_string().starts_with("c (Channel, size=4"));
    }

    #[test]
    fn test_root_name_prefix() {
        let mut map = ChannelMap::new();
        let c = map.add("/S/c").unwrap();
        map.put_data_as_f32(c, &[1.0]).unwrap();
        let tree = ChannelTree::from_channel_map_with_root(&map, "top");
        assert_eq!(names(&tree), vec!["/top", "/top/S", "/top/S/c"]);
        assert_eq!(tree.roots().len(), 1);
    }

    #[test]
    fn test_merge_keeps_first_on_collision() {
        let mut first = ChannelMap::new();
        let a = first.add("/S/a").unwrap();
        first.put_data_as_i16(a, &[1]).unwrap();
        first.add_folder("/S/shared").unwrap();

        let mut second = ChannelMap::new();
        let b = second.add("/S/b").unwrap();
        second.put_data_as_i16(b, &[2]).unwrap();
        let shared = second.add("/S/shared").unwrap();
        second.put_data_as_i16(shared, &[3]).unwrap();

        let one = ChannelTree::from_channel_map(&first);
        let two = ChannelTree::from_channel_map(&second);
        let merged = one.merge(&two);
        assert_eq!(names(&merged), vec!["/S", "/S/a", "/S/b", "/S/shared"]);
        assert_eq!(merged.find_node("/S/shared").unwrap().node_type, NodeType::Folder);
        let s = merged.roots()[0];
        assert_eq!(merged.node(s).children().len(), 3);
    }

    #[test]
    fn test_display_lists_nodes() {
        let mut map = ChannelMap::new();
        map.add_folder("/S/docs").unwrap();
        let text = ChannelTree::from_channel_map(&map).to_string();
        assert!(text.starts_with("ChannelTree with 2 nodes."));
        assert!(text.contains("\n  docs (Folder)"));
    }
}
