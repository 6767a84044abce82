//! Control: a client that only inspects the server.

use super::{Client, ClientCore, ClientKind, RingBuffer};
use crate::channel_tree::ChannelTree;
use crate::config::ClientConfig;
use crate::error::Result;

/// Administrative connection. It neither stores nor requests data; it
/// browses what is registered.
#[derive(Debug)]
pub struct Control {
    core: ClientCore,
}

impl Default for Control {
    fn default() -> Self {
        Self::new()
    }
}

impl Client for Control {
    fn core(&self) -> &ClientCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ClientCore {
        &mut self.core
    }
}

impl Control {
    pub fn new() -> Self {
        Self {
            core: ClientCore::new(ClientKind::Controller, RingBuffer::default()),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            core: ClientCore::from_config(ClientKind::Controller, config),
        }
    }

    /// Sorted view of everything registered below `pattern`.
    pub fn channel_tree(&self, pattern: &str) -> Result<ChannelTree> {
        let map = self.channel_list(pattern)?;
        Ok(ChannelTree::from_channel_map(&map))
    }
}
