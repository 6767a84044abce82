//! Collaborator interface to the server.
//!
//! Clients never talk to a server directly: they create one [`Session`]
//! through a [`Server`] handle and drive it with data trees. The server's
//! storage, routing and wire format stay behind these traits. The crate ships
//! an in-process implementation in [`crate::loopback`].

use super::{ClientKind, FetchTimeout, RingBuffer};
use crate::channel_map::plugin::PlugInRequest;
use crate::error::Result;
use crate::rmap::{DataRequest, DataTree};
use std::sync::Arc;

/// User credentials presented when a session is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Something a session fetch produced.
#[derive(Debug, Clone)]
pub enum Fetched {
    /// Result of a sink request or subscription
    Data(DataTree),
    /// Work for a PlugIn
    PlugIn(PlugInRequest),
}

/// Trees a client sends to its session.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Sink request or subscription
    Request(DataRequest),
    /// Source frame
    Frame(DataTree),
    /// PlugIn answer wrapped in its response envelope
    Response(DataTree),
}

/// A reachable server.
pub trait Server: Send + Sync {
    /// Full name of the server, e.g. `/Server`.
    fn name(&self) -> String;

    fn address(&self) -> String;

    /// Create and start a client session.
    fn create_session(
        &self,
        kind: ClientKind,
        client_name: &str,
        ring: &RingBuffer,
        credentials: Option<Credentials>,
    ) -> Result<Arc<dyn Session>>;
}

/// One client's connection.
///
/// Methods take `&self` so that a PlugIn may wait in `fetch` on one thread
/// while answering through `add_child` on another.
#[cfg_attr(test, mockall::automock)]
pub trait Session: Send + Sync {
    /// Full name of the client, e.g. `/Server/src`.
    fn full_name(&self) -> String;

    fn server_name(&self) -> String;

    fn is_running(&self) -> bool;

    /// End the session. Sources may keep their cache and archive for a
    /// later reconnect under the same name.
    fn stop(&self, keep_cache: bool, keep_archive: bool) -> Result<()>;

    /// Declare channels and folders, with optional metadata payloads.
    fn register(&self, registration: DataTree) -> Result<()>;

    /// Registration metadata matching the names in `request`.
    fn get_registered(&self, request: DataRequest) -> Result<DataTree>;

    /// Send a request, frame or response.
    fn add_child(&self, outbound: Outbound) -> Result<()>;

    /// Next result or unit of work; `None` when the timeout expires.
    fn fetch(&self, timeout: FetchTimeout) -> Result<Option<Fetched>>;

    /// Wait until everything sent so far has been processed.
    fn synchronize(&self) -> Result<()>;

    /// Remove channels; returns the server's acknowledgement tree.
    fn delete_channels(&self, channels: DataTree) -> Result<DataTree>;

    fn clear_cache(&self) -> Result<()>;

    fn bytes_transferred(&self) -> u64;
}
