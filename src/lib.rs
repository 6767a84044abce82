//! # turbine-rs: client side of a ring-buffered time-series server
//!
//! Clients exchange hierarchical data trees with a server that keeps recent
//! frames of every source in a ring buffer. This crate holds the client half:
//! the channel map that stages data and decodes results, the request builder
//! and the four client protocols.
//!
//! ## Architecture
//!
//! - **rmap**: arena-backed data trees, typed data blocks, time ranges and
//!   request trees
//! - **channel_map**: [`ChannelMap`] stages writes into a consistent output
//!   tree, builds requests and decodes results; [`PlugInChannelMap`] adds the
//!   request a PlugIn is answering
//! - **client**: [`Source`], [`Sink`], [`PlugIn`] and [`Control`] on top of
//!   the [`Server`]/[`Session`] collaborator traits
//! - **channel_tree**: a sorted, typed view of a registration result
//! - **loopback**: an in-process server implementing the collaborator traits
//!
//! ## Configuration
//!
//! Client settings (server address, name, credentials, ring buffer, logging)
//! load from TOML or JSON through [`config::ClientConfig`].
//!
//! ## Example
//!
//! ```
//! # #[cfg(feature = "loopback")]
//! # fn main() -> turbine_rs::Result<()> {
//! use turbine_rs::{loopback::LoopbackServer, ChannelMap, Client, Control};
//!
//! let server = LoopbackServer::start("localhost:5000");
//! let mut control = Control::new();
//! control.open_connection(server, "admin")?;
//! let tree = control.channel_tree("")?;
//! assert!(tree.find_node("/Server/admin").is_some());
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "loopback"))]
//! # fn main() {}
//! ```

pub mod channel_map;
pub mod channel_tree;
pub mod client;
pub mod config;
pub mod error;
#[cfg(feature = "loopback")]
pub mod loopback;
pub mod rmap;
pub mod types;

// Re-export commonly used types
pub use channel_map::{ChannelMap, PlugInChannelMap, RequestType, TimeMode};
pub use channel_tree::{ChannelTree, NodeType, TreeNode};
pub use client::{
    ArchiveMode, Client, ClientKind, Control, FetchTimeout, PlugIn, RingBuffer, Server, Session,
    Sink, Source,
};
pub use config::ClientConfig;
pub use error::{Result, ResultExt, TurbineError};
pub use rmap::RequestOptions;
pub use types::{ByteOrder, ChannelData, DataType};
