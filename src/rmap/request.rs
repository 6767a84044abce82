//! Request trees sent to the server.

use super::tree::DataTree;
use super::NodeId;
use std::fmt;

/// What the request's time range is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Reference {
    #[default]
    Absolute,
    Newest,
    Oldest,
    After,
    Modified,
    Aligned,
}

/// How matching data relates to the requested time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Relationship {
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    #[default]
    Equal,
}

/// Whether repetitions come back merged or one frame at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RequestMode {
    #[default]
    Consolidated,
    Frames,
}

/// Which data a request may match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Domain {
    #[default]
    Existing,
    Future,
    All,
}

/// Number of times a request is repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Repetitions {
    Finite(u64),
    Infinite,
}

impl Default for Repetitions {
    fn default() -> Self {
        Repetitions::Finite(1)
    }
}

impl Repetitions {
    pub fn is_infinite(self) -> bool {
        matches!(self, Repetitions::Infinite)
    }

    pub fn count(self) -> u64 {
        match self {
            Repetitions::Finite(n) => n,
            Repetitions::Infinite => u64::MAX,
        }
    }
}

/// Caller options for time-based requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestOptions {
    /// Also match the newest point at or before the start time
    pub extend_start: bool,
}

impl RequestOptions {
    pub fn with_extend_start(mut self, extend_start: bool) -> Self {
        self.extend_start = extend_start;
        self
    }
}

/// A data tree root augmented with request semantics.
///
/// The tree's top-level children are the requested names; each carries the
/// time or frame range asked for.
#[derive(Debug, Clone, Default)]
pub struct DataRequest {
    pub tree: DataTree,
    /// Identifier used to match responses, set by the server for PlugIns
    pub name: Option<String>,
    pub reference: Reference,
    pub relationship: Relationship,
    pub repetitions: Repetitions,
    /// Multiple of the duration advanced between repetitions
    pub increment: f64,
    pub mode: RequestMode,
    pub domain: Domain,
    pub synchronized: bool,
    pub gap_control: bool,
    /// Options forwarded to a PlugIn answering the request
    pub options: RequestOptions,
}

impl DataRequest {
    pub fn new(tree: DataTree) -> Self {
        Self {
            tree,
            ..Default::default()
        }
    }

    /// Top-level requested nodes.
    pub fn requested(&self) -> Vec<NodeId> {
        self.tree.children(self.tree.root()).to_vec()
    }

    /// True for standing requests (subscriptions and monitors).
    pub fn is_standing(&self) -> bool {
        self.repetitions.is_infinite()
    }
}

impl fmt::Display for DataRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "DataRequest {:?}/{:?} {:?} x{:?} inc={} {:?} {:?} sync={}",
            self.reference,
            self.relationship,
            self.mode,
            self.repetitions,
            self.increment,
            self.domain,
            self.name,
            self.synchronized
        )?;
        write!(f, "{}", self.tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let req = DataRequest::default();
        assert_eq!(req.reference, Reference::Absolute);
        assert_eq!(req.relationship, Relationship::Equal);
        assert_eq!(req.repetitions, Repetitions::Finite(1));
        assert_eq!(req.increment, 0.0);
        assert_eq!(req.mode, RequestMode::Consolidated);
        assert_eq!(req.domain, Domain::Existing);
        assert!(!req.synchronized);
        assert!(!req.gap_control);
        assert!(!req.is_standing());
    }
}
