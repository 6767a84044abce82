//! In-process server.
//!
//! [`LoopbackServer`] keeps every client inside the current process. Source
//! frames go to a ring per source, sink requests are answered from those
//! rings and PlugIn requests are routed between sessions over crossbeam
//! channels. Archives are not kept: the archive settings of a ring buffer are
//! accepted and ignored.
//!
//! Servers register under their address, so code holding only an address
//! can reach a running server with [`connect`].

mod names;
mod state;
mod store;

use crate::channel_map::plugin::PlugInRequest;
use crate::client::{ClientKind, Credentials, FetchTimeout, Fetched, Outbound, RingBuffer, Server, Session};
use crate::error::{Result, TurbineError};
use crate::rmap::{DataRequest, DataTree};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use parking_lot::Mutex;
use state::State;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Name of a server started with [`LoopbackServer::start`].
pub const DEFAULT_SERVER_NAME: &str = "Server";

static REGISTRY: OnceLock<Mutex<HashMap<String, Weak<LoopbackServer>>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<String, Weak<LoopbackServer>>> {
    REGISTRY.get_or_init(Default::default)
}

/// Look up the running server listening on `address`.
pub fn connect(address: &str) -> Result<Arc<dyn Server>> {
    let server = registry().lock().get(address).and_then(Weak::upgrade);
    match server {
        Some(server) => Ok(server as Arc<dyn Server>),
        None => Err(TurbineError::disconnected(format!(
            "No server is listening on {}",
            address
        ))),
    }
}

fn now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Bytes of data carried by a tree.
fn tree_bytes(tree: &DataTree) -> u64 {
    tree.walk(tree.root())
        .into_iter()
        .filter_map(|id| tree.node(id).block.as_ref())
        .map(|block| block.byte_len() as u64)
        .sum()
}

fn fetched_bytes(fetched: &Fetched) -> u64 {
    match fetched {
        Fetched::Data(tree) => tree_bytes(tree),
        Fetched::PlugIn(
            PlugInRequest::Data(request)
            | PlugInRequest::Registration(request)
            | PlugInRequest::EndOfStream(request),
        ) => tree_bytes(&request.tree),
    }
}

struct Shared {
    name: String,
    address: String,
    credentials: Option<Credentials>,
    state: Mutex<State>,
}

/// A server living in this process.
pub struct LoopbackServer {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for LoopbackServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackServer")
            .field("name", &self.shared.name)
            .field("address", &self.shared.address)
            .finish()
    }
}

impl LoopbackServer {
    /// Start a server called [`DEFAULT_SERVER_NAME`] on `address`.
    pub fn start(address: &str) -> Arc<Self> {
        Self::start_named(DEFAULT_SERVER_NAME, address)
    }

    pub fn start_named(name: &str, address: &str) -> Arc<Self> {
        Self::launch(name, address, None)
    }

    /// Start a server that only accepts clients presenting `credentials`.
    pub fn start_with_credentials(name: &str, address: &str, credentials: Credentials) -> Arc<Self> {
        Self::launch(name, address, Some(credentials))
    }

    fn launch(name: &str, address: &str, credentials: Option<Credentials>) -> Arc<Self> {
        let server = Arc::new(Self {
            shared: Arc::new(Shared {
                name: name.to_string(),
                address: address.to_string(),
                credentials,
                state: Mutex::new(State::new(name)),
            }),
        });
        let replaced = registry()
            .lock()
            .insert(address.to_string(), Arc::downgrade(&server))
            .and_then(|old| old.upgrade())
            .is_some();
        if replaced {
            tracing::warn!("Loopback server on {} replaced a running server", address);
        }
        tracing::info!("Loopback server /{} listening on {}", name, address);
        server
    }

    /// Names of the connected and detached clients.
    pub fn client_names(&self) -> Vec<String> {
        self.shared.state.lock().client_names()
    }
}

impl Server for LoopbackServer {
    fn name(&self) -> String {
        format!("/{}", self.shared.name)
    }

    fn address(&self) -> String {
        self.shared.address.clone()
    }

    fn create_session(
        &self,
        kind: ClientKind,
        client_name: &str,
        ring: &RingBuffer,
        credentials: Option<Credentials>,
    ) -> Result<Arc<dyn Session>> {
        if let Some(required) = &self.shared.credentials {
            if credentials.as_ref() != Some(required) {
                return Err(TurbineError::disconnected(format!(
                    "Authentication failed for {}",
                    client_name
                )));
            }
        }
        ring.validate()?;
        let (id, inbox) = self.shared.state.lock().attach(kind, client_name, ring)?;
        tracing::debug!("Session {} opened for {} {}", id, kind, client_name);
        let session: Arc<dyn Session> = Arc::new(LoopbackSession {
            shared: Arc::clone(&self.shared),
            id,
            kind,
            name: client_name.to_string(),
            inbox,
            running: AtomicBool::new(true),
            monitoring: AtomicBool::new(false),
            bytes: AtomicU64::new(0),
        });
        Ok(session)
    }
}

struct LoopbackSession {
    shared: Arc<Shared>,
    id: u64,
    kind: ClientKind,
    name: String,
    inbox: Receiver<Fetched>,
    running: AtomicBool,
    /// Only the newest queued result is of interest
    monitoring: AtomicBool,
    bytes: AtomicU64,
}

impl LoopbackSession {
    fn ensure_running(&self) -> Result<()> {
        if self.running.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TurbineError::disconnected(format!(
                "Session of {} has been stopped",
                self.name
            )))
        }
    }

    fn expect_kind(&self, kind: ClientKind, what: &str) -> Result<()> {
        if self.kind == kind {
            Ok(())
        } else {
            Err(TurbineError::InvalidState(format!(
                "A {} cannot send {}.",
                self.kind, what
            )))
        }
    }

    fn count(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn lost(&self) -> TurbineError {
        TurbineError::disconnected(format!("{} lost its server connection", self.name))
    }
}

impl Session for LoopbackSession {
    fn full_name(&self) -> String {
        format!("/{}/{}", self.shared.name, self.name)
    }

    fn server_name(&self) -> String {
        format!("/{}", self.shared.name)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn stop(&self, keep_cache: bool, _keep_archive: bool) -> Result<()> {
        if self.running.swap(false, Ordering::AcqRel) {
            let keep = keep_cache && self.kind == ClientKind::Source;
            self.shared.state.lock().detach(self.id, &self.name, keep);
            tracing::debug!("Session {} of {} stopped", self.id, self.name);
        }
        Ok(())
    }

    fn register(&self, registration: DataTree) -> Result<()> {
        self.ensure_running()?;
        self.count(tree_bytes(&registration));
        self.shared.state.lock().register(&self.name, &registration)
    }

    fn get_registered(&self, request: DataRequest) -> Result<DataTree> {
        self.ensure_running()?;
        let answer = self.shared.state.lock().registered(&request);
        self.count(tree_bytes(&answer));
        Ok(answer)
    }

    fn add_child(&self, outbound: Outbound) -> Result<()> {
        self.ensure_running()?;
        match outbound {
            Outbound::Request(request) => {
                self.expect_kind(ClientKind::Sink, "requests")?;
                self.count(tree_bytes(&request.tree));
                let monitoring = self.shared.state.lock().request(&self.name, request)?;
                self.monitoring.store(monitoring, Ordering::Release);
            }
            Outbound::Frame(frame) => {
                self.expect_kind(ClientKind::Source, "frames")?;
                self.count(tree_bytes(&frame));
                self.shared.state.lock().add_frame(&self.name, &frame, now());
            }
            Outbound::Response(envelope) => {
                self.expect_kind(ClientKind::PlugIn, "responses")?;
                self.count(tree_bytes(&envelope));
                self.shared.state.lock().response(&self.name, &envelope);
            }
        }
        Ok(())
    }

    fn fetch(&self, timeout: FetchTimeout) -> Result<Option<Fetched>> {
        self.ensure_running()?;
        let received = match timeout {
            FetchTimeout::Forever => Some(self.inbox.recv().map_err(|_| self.lost())?),
            FetchTimeout::Poll => match self.inbox.try_recv() {
                Ok(fetched) => Some(fetched),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => return Err(self.lost()),
            },
            FetchTimeout::Millis(ms) => {
                match self.inbox.recv_timeout(std::time::Duration::from_millis(ms)) {
                    Ok(fetched) => Some(fetched),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => return Err(self.lost()),
                }
            }
        };
        let received = if self.monitoring.load(Ordering::Acquire) {
            received.map(|first| self.inbox.try_iter().last().unwrap_or(first))
        } else {
            received
        };
        if let Some(fetched) = &received {
            self.count(fetched_bytes(fetched));
        }
        Ok(received)
    }

    fn synchronize(&self) -> Result<()> {
        // Every call is handled before it returns.
        self.ensure_running()
    }

    fn delete_channels(&self, channels: DataTree) -> Result<DataTree> {
        self.ensure_running()?;
        self.shared.state.lock().delete(&self.name, &channels)
    }

    fn clear_cache(&self) -> Result<()> {
        self.ensure_running()?;
        self.shared.state.lock().clear_cache(&self.name);
        Ok(())
    }

    fn bytes_transferred(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl Drop for LoopbackSession {
    fn drop(&mut self) {
        if self.running.swap(false, Ordering::AcqRel) {
            self.shared.state.lock().detach(self.id, &self.name, false);
        }
    }
}
