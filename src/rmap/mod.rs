//! Hierarchical data trees exchanged with the server.
//!
//! A tree node optionally carries a name, a [`TimeRange`] and a typed
//! [`DataBlock`]. Channel maps build trees for output and requests, and decode
//! the trees that come back.

pub mod data_block;
pub mod id;
pub mod request;
pub mod time_range;
pub mod tree;

pub use data_block::{DataBlock, Payload};
pub use id::NodeId;
pub use request::{
    DataRequest, Domain, Reference, Relationship, Repetitions, RequestMode,
    RequestOptions,
};
pub use time_range::TimeRange;
pub use tree::{DataArray, DataNode, DataTree, Extracted, NodeKind, DOT};
