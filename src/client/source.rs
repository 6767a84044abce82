//! Source: writes frames into a server ring buffer.

use super::session::Outbound;
use super::{Client, ClientCore, ClientKind, RingBuffer};
use crate::channel_map::ChannelMap;
use crate::config::ClientConfig;
use crate::error::{Result, ResultExt, TurbineError};
use std::collections::HashMap;

/// Channel set bound to one ring buffer by its first flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FlushGroup {
    id: u64,
    size: usize,
}

/// A client that stores data on the server.
///
/// The server binds the channels of a source's first flush to one ring
/// buffer, so every later flush must carry exactly the same channel set.
#[derive(Debug)]
pub struct Source {
    core: ClientCore,
    groups: HashMap<String, FlushGroup>,
    next_group: u64,
}

impl Default for Source {
    fn default() -> Self {
        Self::new()
    }
}

impl Client for Source {
    fn core(&self) -> &ClientCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ClientCore {
        &mut self.core
    }

    fn on_close(&mut self) {
        self.groups.clear();
    }
}

impl Source {
    /// Source with a 100 frame cache and no archive.
    pub fn new() -> Self {
        Self::with_ring_buffer(RingBuffer::default())
    }

    pub fn with_ring_buffer(ring: RingBuffer) -> Self {
        Self {
            core: ClientCore::new(ClientKind::Source, ring),
            groups: HashMap::new(),
            next_group: 0,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            core: ClientCore::from_config(ClientKind::Source, config),
            groups: HashMap::new(),
            next_group: 0,
        }
    }

    /// Send the map's staged data as one frame. Returns the number of
    /// channels flushed.
    pub fn flush(&mut self, map: &mut ChannelMap) -> Result<usize> {
        self.flush_sync(map, false)
    }

    /// [`flush`](Source::flush), optionally waiting until the server has
    /// stored the frame.
    pub fn flush_sync(&mut self, map: &mut ChannelMap, synchronize: bool) -> Result<usize> {
        let session = self.core.session()?.clone();
        let names = map.channel_list();

        if names.is_empty() {
            // an empty map may still carry a fetched result to forward
            if map.response().is_some() {
                let mut output = map.produce_output();
                let root = output.root();
                output.collapse(root);
                session.add_child(Outbound::Frame(output))?;
                map.clear_data();
                if synchronize {
                    session.synchronize()?;
                }
            }
            return Ok(0);
        }

        self.check_group(&names)?;

        let mut output = map.produce_output();
        let root = output.root();
        output.collapse(root);
        tracing::trace!("Source flush:\n{}", output);
        session
            .add_child(Outbound::Frame(output))
            .context("Flushing source frame")?;
        map.clear_data();
        map.increment_next();
        if synchronize {
            session.synchronize()?;
        }
        tracing::debug!("Flushed {} channels from {}", names.len(), session.full_name());
        Ok(names.len())
    }

    fn check_group(&mut self, names: &[String]) -> Result<()> {
        let first = &names[0];
        match self.groups.get(first).copied() {
            None => {
                if let Some(taken) = names[1..].iter().find(|n| self.groups.contains_key(*n)) {
                    return Err(TurbineError::InconsistentFlush(format!(
                        "\"{}\" was already flushed with another channel set",
                        taken
                    )));
                }
                let group = FlushGroup {
                    id: self.next_group,
                    size: names.len(),
                };
                self.next_group += 1;
                for name in names {
                    self.groups.insert(name.clone(), group);
                }
                Ok(())
            }
            Some(group) => {
                if group.size != names.len() {
                    return Err(TurbineError::InconsistentFlush(format!(
                        "expected {} channels, found {}",
                        group.size,
                        names.len()
                    )));
                }
                match names.iter().find(|n| self.groups.get(*n) != Some(&group)) {
                    Some(stray) => Err(TurbineError::InconsistentFlush(format!(
                        "\"{}\" does not belong to the channel set of \"{}\"",
                        stray, first
                    ))),
                    None => Ok(()),
                }
            }
        }
    }

    /// Register the map's channels and folders. Data staged in the map
    /// travels as registration metadata.
    pub fn register(&mut self, map: &mut ChannelMap) -> Result<()> {
        let registration = map.produce_registration().context("Building registration")?;
        tracing::debug!("Source registration:\n{}", registration);
        self.core.session()?.register(registration)
    }

    /// Delete the channels of `to_delete` from the server; the
    /// acknowledgement is decoded into `result`.
    pub fn delete(&mut self, to_delete: &mut ChannelMap, result: &mut ChannelMap) -> Result<()> {
        let session = self.core.session()?;
        let channels = to_delete.produce_registration().context("Building delete request")?;
        let ack = session.delete_channels(channels)?;
        result.clear();
        result.process_result(Some(ack), true, false);
        Ok(())
    }

    /// Drop the frames cached on the server.
    pub fn clear_cache(&mut self) -> Result<()> {
        self.core.session()?.clear_cache()
    }

    /// Disconnect, leaving cache and archive on the server for sinks.
    pub fn detach(&mut self) -> Result<()> {
        self.close_connection_keep(true, true)
    }
}
