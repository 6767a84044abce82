//! PlugIn: answers requests for its namespace on demand.

use super::session::{Fetched, Outbound};
use super::{Client, ClientCore, ClientKind, FetchTimeout, RingBuffer};
use crate::channel_map::{ChannelMap, PlugInChannelMap};
use crate::config::ClientConfig;
use crate::error::{Result, ResultExt, TurbineError};

/// A client that computes data when a sink asks for it.
///
/// [`fetch`](PlugIn::fetch) and [`flush`](PlugIn::flush) take `&self`, so a
/// shared PlugIn may wait for the next request on one thread while another
/// sends an answer, as long as each cycle uses its own
/// [`PlugInChannelMap`].
#[derive(Debug)]
pub struct PlugIn {
    core: ClientCore,
}

impl Default for PlugIn {
    fn default() -> Self {
        Self::new()
    }
}

impl Client for PlugIn {
    fn core(&self) -> &ClientCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ClientCore {
        &mut self.core
    }
}

impl PlugIn {
    pub fn new() -> Self {
        Self {
            core: ClientCore::new(ClientKind::PlugIn, RingBuffer::default()),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            core: ClientCore::from_config(ClientKind::PlugIn, config),
        }
    }

    /// Wait for the next request and load it into `map`.
    ///
    /// On timeout the map reports [`RequestType::Timeout`](crate::RequestType::Timeout).
    pub fn fetch(&self, timeout_ms: i64, map: &mut PlugInChannelMap) -> Result<()> {
        map.clear();
        let fetched = self
            .core
            .session()?
            .fetch(FetchTimeout::from_millis(timeout_ms))
            .context("PlugIn fetch")?;
        let incoming = match fetched {
            Some(Fetched::PlugIn(request)) => Some(request),
            Some(Fetched::Data(_)) => {
                return Err(TurbineError::InvalidState(
                    "A PlugIn cannot receive data results.".into(),
                ))
            }
            None => None,
        };
        map.process_request(incoming)
    }

    pub fn fetch_new(&self, timeout_ms: i64) -> Result<PlugInChannelMap> {
        let mut map = PlugInChannelMap::new();
        self.fetch(timeout_ms, &mut map)?;
        Ok(map)
    }

    /// Send the answer staged in `map` back to the requester. Returns the
    /// number of channels answered.
    ///
    /// Streaming answers are not supported.
    pub fn flush(&self, map: &mut PlugInChannelMap, stream: bool) -> Result<usize> {
        if stream {
            return Err(TurbineError::Unsupported(
                "Streaming not supported for PlugIns.".into(),
            ));
        }
        let session = self.core.session()?;
        let count = map.channels_put();
        let response = map.produce_response(false)?;
        tracing::trace!("PlugIn response:\n{}", response);
        session
            .add_child(Outbound::Response(response))
            .context("Sending PlugIn response")?;
        map.clear_data();
        map.increment_next();
        Ok(count)
    }

    /// Register the channels this PlugIn answers for.
    pub fn register(&mut self, map: &mut ChannelMap) -> Result<()> {
        let registration = map.produce_registration().context("Building registration")?;
        tracing::debug!("PlugIn registration:\n{}", registration);
        self.core.session()?.register(registration)
    }
}
