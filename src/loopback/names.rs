//! Name resolution for trees received by the loopback server.

use crate::rmap::{DataBlock, DataTree, NodeId, TimeRange};

/// Matches any number of trailing segments, none included.
pub(crate) const RECURSIVE: &str = "...";

/// Matches exactly one segment.
pub(crate) const ANY: &str = "*";

/// A named endpoint found in a received tree.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub segments: Vec<String>,
    /// Name was written relative (below a top-level `.`)
    pub relative: bool,
    pub time: Option<TimeRange>,
    pub frame: Option<TimeRange>,
    pub block: Option<DataBlock>,
}

/// Everything [`walk`] found.
#[derive(Debug, Clone, Default)]
pub(crate) struct Walked {
    /// Endpoints carrying a block, markers included
    pub channels: Vec<Entry>,
    /// Named leaves without data
    pub folders: Vec<Entry>,
    /// `.` blocks below a named node: PlugIn options for that node
    pub options: Vec<(Vec<String>, DataBlock)>,
}

/// Collect the endpoints of `tree` with their inherited time and frame
/// ranges. Unnamed nodes add no segment; `.` nodes add none either and hold
/// options when they carry data.
pub(crate) fn walk(tree: &DataTree) -> Walked {
    let mut walked = Walked::default();
    visit(tree, tree.root(), &mut Vec::new(), false, None, None, 0, &mut walked);
    walked
}

#[allow(clippy::too_many_arguments)]
fn visit(
    tree: &DataTree,
    id: NodeId,
    path: &mut Vec<String>,
    relative: bool,
    time: Option<TimeRange>,
    frame: Option<TimeRange>,
    depth: usize,
    walked: &mut Walked,
) {
    let node = tree.node(id);
    let time = node.time.clone().or(time);
    let frame = node.frame.clone().or(frame);
    let mut relative = relative;
    let mut pushed = false;

    if node.is_dot() {
        if depth == 1 {
            relative = true;
        }
        if let Some(block) = &node.block {
            if !path.is_empty() {
                walked.options.push((path.clone(), block.clone()));
                return;
            }
        }
    } else if let Some(name) = node.name() {
        path.push(name.to_string());
        pushed = true;
    }

    let entry = || Entry {
        segments: path.clone(),
        relative,
        time: time.clone(),
        frame: frame.clone(),
        block: node.block.clone(),
    };
    if !path.is_empty() {
        if node.block.is_some() {
            walked.channels.push(entry());
        } else if node.children().is_empty() && pushed {
            walked.folders.push(entry());
        }
    }

    for child in node.children() {
        visit(tree, *child, path, relative, time.clone(), frame.clone(), depth + 1, walked);
    }
    if pushed {
        path.pop();
    }
}

/// Segments of `entry` relative to the server called `server`, or `None`
/// when an absolute name points at another server.
pub(crate) fn server_relative(server: &str, entry: &Entry) -> Option<Vec<String>> {
    if entry.relative {
        return Some(entry.segments.clone());
    }
    match entry.segments.split_first() {
        Some((first, rest)) if first == server => Some(rest.to_vec()),
        Some((first, _)) if first == RECURSIVE => Some(entry.segments.clone()),
        _ => None,
    }
}

/// True when `path` is matched by `pattern`.
pub(crate) fn matches<P: AsRef<str>, S: AsRef<str>>(pattern: &[P], path: &[S]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((head, _)) if head.as_ref() == RECURSIVE => true,
        Some((head, rest)) => match path.split_first() {
            None => false,
            Some((first, others)) => {
                (head.as_ref() == ANY || head.as_ref() == first.as_ref()) && matches(rest, others)
            }
        },
    }
}

/// True when some path below `prefix` could match `pattern`.
pub(crate) fn matches_below<P: AsRef<str>, S: AsRef<str>>(pattern: &[P], prefix: &[S]) -> bool {
    for (depth, segment) in prefix.iter().enumerate() {
        match pattern.get(depth).map(AsRef::as_ref) {
            None => return false,
            Some(RECURSIVE) => return true,
            Some(ANY) => continue,
            Some(p) if p == segment.as_ref() => continue,
            Some(_) => return false,
        }
    }
    true
}

pub(crate) fn split(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .map(str::to_string)
        .collect()
}
