//! The PlugIn flavour of a channel map.
//!
//! A PlugIn receives requests instead of data. Each fetched request is loaded
//! into a [`PlugInChannelMap`], which remembers what was asked for (time,
//! reference, repetition) so the PlugIn can fill in the answer and flush it
//! back inside a response envelope carrying the request id.

use super::ChannelMap;
use crate::error::{Result, TurbineError};
use crate::rmap::{
    DataNode, DataRequest, DataTree, NodeKind, Reference, Relationship, RequestOptions, DOT,
};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// Reference reported for registration requests.
pub const REGISTRATION_REFERENCE: &str = "registration";

/// Kind of work a PlugIn fetch produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    /// The requester closed a standing request
    EndOfStream = 1,
    /// Standing request skipping to the newest data
    Monitor = 2,
    /// Single request
    Request = 3,
    /// Standing request for every frame
    Subscribe = 4,
    /// Nothing arrived before the fetch timeout
    Timeout = 5,
}

impl RequestType {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// A request routed to a PlugIn, as delivered by the server.
#[derive(Debug, Clone)]
pub enum PlugInRequest {
    Data(DataRequest),
    /// Registration query for the PlugIn's namespace
    Registration(DataRequest),
    /// Final request of a stream that the requester closed
    EndOfStream(DataRequest),
}

/// Channel map that also carries the request a PlugIn is answering.
#[derive(Debug, Clone)]
pub struct PlugInChannelMap {
    map: ChannelMap,
    request_id: Option<String>,
    start: f64,
    duration: f64,
    time_based: bool,
    reference: Option<String>,
    request_type: Option<RequestType>,
    repeat_interval: f64,
    repeat_count: u64,
    options: RequestOptions,
}

impl Default for PlugInChannelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for PlugInChannelMap {
    type Target = ChannelMap;

    fn deref(&self) -> &ChannelMap {
        &self.map
    }
}

impl DerefMut for PlugInChannelMap {
    fn deref_mut(&mut self) -> &mut ChannelMap {
        &mut self.map
    }
}

impl PlugInChannelMap {
    pub fn new() -> Self {
        Self {
            map: ChannelMap::new(),
            request_id: None,
            start: 0.0,
            duration: 0.0,
            time_based: false,
            reference: None,
            request_type: None,
            repeat_interval: 1.0,
            repeat_count: 1,
            options: RequestOptions::default(),
        }
    }

    /// Start of the requested time or frame range.
    pub fn request_start(&self) -> f64 {
        self.start
    }

    pub fn request_duration(&self) -> f64 {
        self.duration
    }

    /// One of `absolute`, `next`, `previous`, `oldest`, `newest`, `after`,
    /// `modified`, `aligned` or `registration`.
    pub fn request_reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn request_type(&self) -> Option<RequestType> {
        self.request_type
    }

    /// True when the request is by frame index rather than by time.
    pub fn is_request_frames(&self) -> bool {
        !self.time_based && self.reference.as_deref() != Some(REGISTRATION_REFERENCE)
    }

    /// Identifier the response must carry.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn request_options(&self) -> RequestOptions {
        self.options
    }

    /// Repetitions asked for, saturating for standing requests.
    pub fn repeat_count(&self) -> u64 {
        self.repeat_count
    }

    pub fn repeat_interval(&self) -> f64 {
        self.repeat_interval
    }

    /// `key=value` options attached to the request with
    /// [`ChannelMap::add_plugin_option`].
    pub fn plugin_options(&self) -> BTreeMap<String, String> {
        let Some(index) = self.map.index_of(DOT) else {
            return BTreeMap::new();
        };
        self.map
            .data_as_string(index)
            .unwrap_or_default()
            .iter()
            .filter_map(|entry| entry.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Load the next unit of work. `None` records a fetch timeout.
    pub(crate) fn process_request(&mut self, incoming: Option<PlugInRequest>) -> Result<()> {
        let Some(incoming) = incoming else {
            self.map.process_result(None, true, false);
            self.request_type = Some(RequestType::Timeout);
            return Ok(());
        };

        let (request, registration, end_of_stream) = match incoming {
            PlugInRequest::Data(r) => (r, false, false),
            PlugInRequest::Registration(r) => (r, true, false),
            PlugInRequest::EndOfStream(r) => (r, false, true),
        };

        self.request_id = request.name.clone();
        let first = request.requested().first().copied();
        let range = first.and_then(|id| {
            let node = request.tree.node(id);
            match (&node.time, &node.frame) {
                (Some(tr), _) => Some((tr.clone(), true)),
                (None, Some(fr)) => Some((fr.clone(), false)),
                (None, None) => None,
            }
        });
        self.map.process_result(Some(request.tree.clone()), false, true);

        match range {
            Some((tr, time_based)) => {
                self.time_based = time_based;
                self.start = tr.start();
                self.duration = tr.duration();
            }
            None => {
                self.time_based = false;
                self.start = 0.0;
                self.duration = 0.0;
            }
        }
        self.map.put_time(self.start, self.duration);

        self.request_type = Some(if end_of_stream {
            RequestType::EndOfStream
        } else if request.repetitions.is_infinite() {
            if request.increment == 1.0 {
                RequestType::Subscribe
            } else {
                RequestType::Monitor
            }
        } else {
            RequestType::Request
        });

        self.reference = Some(if registration {
            REGISTRATION_REFERENCE.to_string()
        } else {
            reference_name(request.reference, request.relationship).to_string()
        });
        self.options = request.options;
        self.repeat_interval = request.increment;
        self.repeat_count = request.repetitions.count();

        tracing::debug!(
            "PlugIn request {:?}: {:?} {:?} start={} duration={}",
            self.request_id,
            self.request_type,
            self.reference,
            self.start,
            self.duration
        );
        Ok(())
    }

    /// Wrap the staged answer in the response envelope: a node named by the
    /// request id holding an end-of-stream marker that holds the data.
    ///
    /// Streaming responses are not supported.
    pub(crate) fn produce_response(&self, stream: bool) -> Result<DataTree> {
        if stream {
            return Err(TurbineError::Unsupported(
                "Streaming not supported for PlugIns".into(),
            ));
        }
        let output = self.map.produce_output();
        let mut envelope = DataTree::new();
        let root = envelope.root();
        let header = match &self.request_id {
            Some(id) => DataNode::named(id.clone()),
            None => DataNode::unnamed(),
        };
        let header = envelope.add_child(root, header);
        let eos = envelope.add_child(header, DataNode::unnamed().with_kind(NodeKind::EndOfStream));
        for child in output.children(output.root()) {
            envelope.graft(eos, &output, *child);
        }
        Ok(envelope)
    }

    /// Drop every channel and the request state.
    pub fn clear(&mut self) {
        self.map.clear();
        self.clear_data();
        self.request_type = None;
    }

    /// Discard the staged answer and forget the request id and reference.
    pub fn clear_data(&mut self) {
        self.map.clear_data();
        self.request_id = None;
        self.reference = None;
    }
}

/// Name of the reference a request was made with.
fn reference_name(reference: Reference, relationship: Relationship) -> &'static str {
    match reference {
        Reference::Absolute => match relationship {
            Relationship::Greater | Relationship::GreaterEqual => "next",
            Relationship::Less => "previous",
            _ => "absolute",
        },
        Reference::Oldest => "oldest",
        Reference::Newest => "newest",
        Reference::After => "after",
        Reference::Modified => "modified",
        Reference::Aligned => "aligned",
    }
}

impl fmt::Display for PlugInChannelMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:?}", self.map.channel_list())?;
        write!(
            f,
            "[id={}, start={}, duration={}, reference={}]",
            self.request_id.as_deref().unwrap_or("null"),
            self.start,
            self.duration,
            self.reference.as_deref().unwrap_or("null")
        )
    }
}
