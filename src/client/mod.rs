//! Client protocols: Sink, Source, PlugIn and Control.
//!
//! Every client wraps one server [`Session`] in a [`ClientCore`] holding the
//! connection, the client name and the ring buffer settings. The operations
//! shared by all clients (connecting, closing, listing channels) are provided
//! methods of the [`Client`] trait; each client type adds its own protocol on
//! top.
//!
//! # Example
//!
//! ```
//! # #[cfg(feature = "loopback")]
//! # fn main() -> turbine_rs::Result<()> {
//! use turbine_rs::{loopback, ChannelMap, Client, Sink, Source};
//!
//! let server = loopback::LoopbackServer::start("localhost:4000");
//! let mut source = Source::new();
//! source.open_connection(server.clone(), "src")?;
//!
//! let mut map = ChannelMap::new();
//! let c0 = map.add("c0")?;
//! map.put_time(0.0, 1.0);
//! map.put_data_as_i32(c0, &[1, 2, 3])?;
//! source.flush(&mut map)?;
//!
//! let mut sink = Sink::new();
//! sink.open_connection(server, "sink")?;
//! let mut wanted = ChannelMap::new();
//! wanted.add("/Server/src/c0")?;
//! sink.request(&mut wanted, 0.0, 1.0, "absolute")?;
//! let result = sink.fetch_new(1000)?;
//! assert_eq!(result.data_as_i32(0)?, vec![1, 2, 3]);
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "loopback"))]
//! # fn main() {}
//! ```

pub mod control;
pub mod plugin;
pub mod session;
pub mod sink;
pub mod source;

pub use control::Control;
pub use plugin::PlugIn;
pub use session::{Credentials, Fetched, Outbound, Server, Session};
pub use sink::{ResolvedReference, Sink};
pub use source::Source;

use crate::channel_map::ChannelMap;
use crate::config::ClientConfig;
use crate::error::{Result, ResultExt, TurbineError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Name used when none is configured.
pub const DEFAULT_CLIENT_NAME: &str = "MyClient";

/// Address used when none is configured.
pub const DEFAULT_SERVER_ADDRESS: &str = "localhost:3333";

/// Pattern matching every channel below the server.
pub const ALL_CHANNELS: &str = "...";

/// Role a client plays on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    Source,
    Sink,
    PlugIn,
    Controller,
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientKind::Source => "Source",
            ClientKind::Sink => "Sink",
            ClientKind::PlugIn => "PlugIn",
            ClientKind::Controller => "Controller",
        };
        write!(f, "{}", name)
    }
}

/// What the server does with a source's archive on connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveMode {
    /// No archive
    #[default]
    None,
    /// Reopen an existing archive read-only
    Load,
    /// Start a fresh archive
    Create,
    /// Extend an existing archive
    Append,
}

impl ArchiveMode {
    pub fn name(self) -> &'static str {
        match self {
            ArchiveMode::None => "none",
            ArchiveMode::Load => "load",
            ArchiveMode::Create => "create",
            ArchiveMode::Append => "append",
        }
    }

    /// True for the modes that write archive frames.
    pub fn writes_archive(self) -> bool {
        matches!(self, ArchiveMode::Create | ArchiveMode::Append)
    }
}

impl FromStr for ArchiveMode {
    type Err = TurbineError;

    /// `delete` is accepted as a synonym of `none`.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "delete" => Ok(ArchiveMode::None),
            "load" => Ok(ArchiveMode::Load),
            "create" => Ok(ArchiveMode::Create),
            "append" => Ok(ArchiveMode::Append),
            other => Err(TurbineError::InvalidArgument(format!(
                "Archive mode \"{}\" must be one of none, load, create, append or delete.",
                other
            ))),
        }
    }
}

/// Server-side storage requested for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingBuffer {
    /// Frames kept in memory, at least one
    pub cache_frames: u64,
    pub archive_mode: ArchiveMode,
    /// Frames kept on disk
    pub archive_frames: u64,
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self {
            cache_frames: 100,
            archive_mode: ArchiveMode::None,
            archive_frames: 0,
        }
    }
}

impl RingBuffer {
    /// Validate and build ring buffer settings from user values.
    ///
    /// A negative archive size is only an error for the modes that write an
    /// archive; otherwise it is read as zero.
    pub fn new(cache_frames: i64, archive_mode: &str, archive_frames: i64) -> Result<Self> {
        if cache_frames < 1 {
            return Err(TurbineError::InvalidArgument(format!(
                "The cache size ({}) must be at least one frame.",
                cache_frames
            )));
        }
        let archive_mode: ArchiveMode = archive_mode.parse()?;
        if archive_mode.writes_archive() && archive_frames < 0 {
            return Err(TurbineError::InvalidArgument(format!(
                "The archive size ({}) must not be negative in {} mode.",
                archive_frames,
                archive_mode.name()
            )));
        }
        Ok(Self {
            cache_frames: cache_frames as u64,
            archive_mode,
            archive_frames: archive_frames.max(0) as u64,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_frames < 1 {
            return Err(TurbineError::InvalidArgument(
                "The cache size must be at least one frame.".into(),
            ));
        }
        Ok(())
    }
}

/// How long a fetch may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchTimeout {
    Forever,
    /// Return immediately
    Poll,
    Millis(u64),
}

impl FetchTimeout {
    /// Negative waits forever, zero polls.
    pub fn from_millis(millis: i64) -> Self {
        match millis {
            m if m < 0 => FetchTimeout::Forever,
            0 => FetchTimeout::Poll,
            m => FetchTimeout::Millis(m as u64),
        }
    }

    /// Bounded wait, or `None` for [`FetchTimeout::Forever`].
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            FetchTimeout::Forever => None,
            FetchTimeout::Poll => Some(Duration::ZERO),
            FetchTimeout::Millis(m) => Some(Duration::from_millis(m)),
        }
    }
}

/// Connection state shared by every client type.
pub struct ClientCore {
    kind: ClientKind,
    client_name: String,
    credentials: Option<Credentials>,
    ring: RingBuffer,
    server: Option<Arc<dyn Server>>,
    session: Option<Arc<dyn Session>>,
}

impl fmt::Debug for ClientCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCore")
            .field("kind", &self.kind)
            .field("client_name", &self.client_name)
            .field("ring", &self.ring)
            .field("server", &self.server.as_ref().map(|s| s.address()))
            .field("connected", &self.session.is_some())
            .finish()
    }
}

impl ClientCore {
    pub fn new(kind: ClientKind, ring: RingBuffer) -> Self {
        Self {
            kind,
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            credentials: None,
            ring,
            server: None,
            session: None,
        }
    }

    /// Core carrying the configured name, credentials and ring buffer.
    pub fn from_config(kind: ClientKind, config: &ClientConfig) -> Self {
        let mut core = Self::new(kind, config.ring_buffer);
        core.client_name = config.client_name.clone();
        core.credentials = config.credentials();
        core
    }

    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    /// The open session, or [`TurbineError::NotConnected`].
    pub fn session(&self) -> Result<&Arc<dyn Session>> {
        self.session.as_ref().ok_or(TurbineError::NotConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn open(
        &mut self,
        server: Arc<dyn Server>,
        client_name: &str,
        credentials: Option<Credentials>,
    ) -> Result<()> {
        if client_name.is_empty() || client_name.contains('/') {
            return Err(TurbineError::InvalidArgument(
                "The client name must be at least one character and may not contain slashes."
                    .into(),
            ));
        }
        if self.session.is_some() {
            self.close(false, true)?;
        }
        let session = server
            .create_session(self.kind, client_name, &self.ring, credentials.clone())
            .with_context(|| format!("Opening {} {} on {}", self.kind, client_name, server.address()))?;
        tracing::info!(
            "{} {} connected to {}",
            self.kind,
            session.full_name(),
            server.address()
        );
        self.client_name = client_name.to_string();
        self.credentials = credentials;
        self.server = Some(server);
        self.session = Some(session);
        Ok(())
    }

    fn close(&mut self, keep_cache: bool, keep_archive: bool) -> Result<()> {
        self.server = None;
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        tracing::info!(
            "Closing {} {} (keep cache: {}, keep archive: {})",
            self.kind,
            session.full_name(),
            keep_cache,
            keep_archive
        );
        session.stop(keep_cache, keep_archive)
    }
}

/// Operations shared by every client.
pub trait Client {
    fn core(&self) -> &ClientCore;

    fn core_mut(&mut self) -> &mut ClientCore;

    /// Called after the connection has been closed.
    fn on_close(&mut self) {}

    /// Connect to `server` as `client_name`. An open connection is closed
    /// first.
    fn open_connection(&mut self, server: Arc<dyn Server>, client_name: &str) -> Result<()> {
        self.open_connection_with(server, client_name, None)
    }

    fn open_connection_with(
        &mut self,
        server: Arc<dyn Server>,
        client_name: &str,
        credentials: Option<Credentials>,
    ) -> Result<()> {
        self.core_mut().open(server, client_name, credentials)
    }

    /// Connect with the configured client name and credentials.
    fn connect(&mut self, server: Arc<dyn Server>) -> Result<()> {
        let name = self.core().client_name.clone();
        let credentials = self.core().credentials.clone();
        self.open_connection_with(server, &name, credentials)
    }

    /// Close, discarding the cache and keeping the archive.
    fn close_connection(&mut self) -> Result<()> {
        self.close_connection_keep(false, true)
    }

    fn close_connection_keep(&mut self, keep_cache: bool, keep_archive: bool) -> Result<()> {
        let result = self.core_mut().close(keep_cache, keep_archive);
        self.on_close();
        result
    }

    /// True while the session is open and running on the server.
    fn verify_connection(&self) -> bool {
        self.core()
            .session
            .as_ref()
            .is_some_and(|session| session.is_running())
    }

    /// Name of this client, as accepted by the server once connected.
    fn client_name(&self) -> String {
        match &self.core().session {
            Some(session) => {
                let full = session.full_name();
                full.rsplit('/').next().unwrap_or_default().to_string()
            }
            None => self.core().client_name.clone(),
        }
    }

    /// Full name of the connected server.
    fn server_name(&self) -> Option<String> {
        self.core().session.as_ref().map(|s| s.server_name())
    }

    /// Registered channels matching `pattern`, [`ALL_CHANNELS`] when empty.
    ///
    /// The returned map keeps the registration result, so the client lists
    /// ([`ChannelMap::source_list`] and friends) are available on it.
    fn channel_list(&self, pattern: &str) -> Result<ChannelMap> {
        let session = self.core().session()?;
        let pattern = if pattern.is_empty() { ALL_CHANNELS } else { pattern };
        let mut map = ChannelMap::new();
        map.add(pattern)?;
        let request = map.produce_request(false)?;
        let registered = session
            .get_registered(request)
            .context("Listing channels")?;
        map.clear();
        map.process_result(Some(registered), true, false);
        Ok(map)
    }

    fn bytes_transferred(&self) -> u64 {
        self.core()
            .session
            .as_ref()
            .map_or(0, |session| session.bytes_transferred())
    }

    fn cache_size(&self) -> u64 {
        self.core().ring.cache_frames
    }

    fn archive_mode(&self) -> ArchiveMode {
        self.core().ring.archive_mode
    }

    fn archive_size(&self) -> u64 {
        self.core().ring.archive_frames
    }

    /// Change the ring buffer used by the next connection.
    fn set_ring_buffer(&mut self, cache_frames: i64, archive_mode: &str, archive_frames: i64) -> Result<()> {
        let core = self.core_mut();
        if core.kind == ClientKind::PlugIn {
            return Err(TurbineError::Unsupported(
                "PlugIns do not support archiving.".into(),
            ));
        }
        if core.session.is_some() {
            return Err(TurbineError::InvalidState(
                "The ring buffer cannot be altered while connected to a server.".into(),
            ));
        }
        core.ring = RingBuffer::new(cache_frames, archive_mode, archive_frames)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rmap::{DataNode, DataTree};
    use mockall::predicate::*;
    use session::MockSession;

    struct FixedServer {
        session: Arc<dyn Session>,
    }

    impl Server for FixedServer {
        fn name(&self) -> String {
            "/S".into()
        }

        fn address(&self) -> String {
            "test:1".into()
        }

        fn create_session(
            &self,
            _kind: ClientKind,
            _client_name: &str,
            _ring: &RingBuffer,
            _credentials: Option<Credentials>,
        ) -> Result<Arc<dyn Session>> {
            Ok(self.session.clone())
        }
    }

    fn connected_sink(mock: MockSession) -> Sink {
        let server = Arc::new(FixedServer {
            session: Arc::new(mock),
        });
        let mut sink = Sink::new();
        sink.open_connection(server, "sink").unwrap();
        sink
    }

    #[test]
    fn test_archive_mode_parsing() {
        assert_eq!("Create".parse::<ArchiveMode>().unwrap(), ArchiveMode::Create);
        assert_eq!("delete".parse::<ArchiveMode>().unwrap(), ArchiveMode::None);
        assert!("rewind".parse::<ArchiveMode>().is_err());
    }

    #[test]
    fn test_ring_buffer_validation() {
        assert!(matches!(
            RingBuffer::new(0, "none", 0),
            Err(TurbineError::InvalidArgument(_))
        ));
        assert!(RingBuffer::new(10, "create", -1).is_err());
        let load = RingBuffer::new(10, "load", -1).unwrap();
        assert_eq!(load.archive_frames, 0);
        let append = RingBuffer::new(5, "append", 50).unwrap();
        assert_eq!(append.archive_mode, ArchiveMode::Append);
        assert_eq!(append.archive_frames, 50);
    }

    #[test]
    fn test_fetch_timeout_from_millis() {
        assert_eq!(FetchTimeout::from_millis(-1), FetchTimeout::Forever);
        assert_eq!(FetchTimeout::from_millis(0), FetchTimeout::Poll);
        assert_eq!(
            FetchTimeout::from_millis(250).as_duration(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(FetchTimeout::Forever.as_duration(), None);
    }

    #[test]
    fn test_client_name_validation() {
        let server = Arc::new(FixedServer {
            session: Arc::new(MockSession::new()),
        });
        let mut sink = Sink::new();
        assert!(sink.open_connection(server.clone(), "").is_err());
        assert!(sink.open_connection(server, "a/b").is_err());
        assert!(!sink.core().is_connected());
        assert_eq!(sink.client_name(), DEFAULT_CLIENT_NAME);
    }

    #[test]
    fn test_ring_buffer_locked_while_connected() {
        let mut mock = MockSession::new();
        mock.expect_full_name().return_const("/S/sink".to_string());
        mock.expect_stop()
            .with(eq(false), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));
        let mut sink = connected_sink(mock);

        assert_eq!(sink.client_name(), "sink");
        assert!(matches!(
            sink.set_ring_buffer(10, "none", 0),
            Err(TurbineError::InvalidState(_))
        ));
        sink.close_connection().unwrap();
        sink.set_ring_buffer(10, "none", 0).unwrap();
        assert_eq!(sink.cache_size(), 10);
        assert!(matches!(sink.channel_list(""), Err(TurbineError::NotConnected)));
    }

    #[test]
    fn test_channel_list_uses_registration() {
        let mut mock = MockSession::new();
        mock.expect_full_name().return_const("/S/sink".to_string());
        mock.expect_get_registered()
            .withf(|request| {
                let tree = &request.tree;
                tree.find_descendant(tree.root(), ALL_CHANNELS).is_some()
            })
            .returning(|_| {
                let mut tree = DataTree::new();
                let root = tree.root();
                tree.add_channel(root, "/S/src/c0");
                let leaf = tree.find_descendant(root, "/S/src/c0").unwrap();
                tree.node_mut(leaf).block = Some(crate::rmap::DataBlock::marker());
                tree.add_child(root, DataNode::named("T"));
                Ok(tree)
            });
        let sink = connected_sink(mock);

        let map = sink.channel_list("").unwrap();
        assert_eq!(map.channel_list(), vec!["/S/src/c0"]);
        assert_eq!(map.folder_list(), vec!["/T"]);
    }
}
