//! Routing state shared by every session of a loopback server.

use super::names::{self, Entry, ANY, RECURSIVE};
use super::store::{self, FrameRing, Series, StoredFrame, Window};
use crate::channel_map::plugin::PlugInRequest;
use crate::client::{ClientKind, Fetched, RingBuffer};
use crate::error::{Result, TurbineError};
use crate::rmap::{
    DataBlock, DataNode, DataRequest, DataTree, Domain, NodeKind, Reference, Repetitions,
    TimeRange, DOT,
};
use crate::types::{ChannelData, DataType};
use crossbeam_channel::{Receiver, Sender};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Range;

/// MIME type of registration metadata.
const METADATA_MIME: &str = "text/xml";

const DEFAULT_MIME: &str = "application/octet-stream";

type Clients = BTreeMap<String, ClientEntry>;

/// One named client known to the server.
#[derive(Debug)]
pub(crate) struct ClientEntry {
    kind: ClientKind,
    session: u64,
    /// `None` while a source is detached
    inbox: Option<Sender<Fetched>>,
    ring: FrameRing,
    registered: BTreeMap<String, Option<DataBlock>>,
    folders: BTreeSet<String>,
}

impl ClientEntry {
    fn new(kind: ClientKind, session: u64, inbox: Sender<Fetched>, ring: &RingBuffer) -> Self {
        Self {
            kind,
            session,
            inbox: Some(inbox),
            ring: FrameRing::new(ring.cache_frames),
            registered: BTreeMap::new(),
            folders: BTreeSet::new(),
        }
    }

    fn channel_names(&self) -> BTreeSet<String> {
        let mut names = self.ring.channel_names();
        names.extend(self.registered.keys().cloned());
        names
    }

    /// Registration metadata of `channel`: an XML document describing its
    /// latest data, or a marker when nothing is known about it.
    fn metadata(&self, channel: &str) -> (DataBlock, Option<TimeRange>) {
        let time = self.ring.series(channel).and_then(|series| {
            let first = series.first_time()?;
            let last = series.last_time()?;
            Some(TimeRange::new(first, last - first))
        });
        let registered = self.registered.get(channel).cloned().flatten();
        let latest = self.ring.latest(channel);

        if let Some(block) = &registered {
            if block.data_type() == DataType::String && block.mime() == Some(METADATA_MIME) {
                return (block.clone(), time);
            }
        }
        if latest.is_none() && registered.is_none() {
            return (DataBlock::marker(), time);
        }

        let size = latest.map_or(0, |c| c.block.byte_len());
        let mime = latest
            .and_then(|c| c.block.mime())
            .or_else(|| registered.as_ref().and_then(|b| b.mime()))
            .unwrap_or(DEFAULT_MIME);
        let user = registered.as_ref().map(user_text).unwrap_or_default();

        let mut xml = format!("<rbnb><size>{}</size><mime>{}</mime>", size, mime);
        if !user.is_empty() {
            xml.push_str("<user>");
            xml.push_str(&user);
            xml.push_str("</user>");
        }
        xml.push_str("</rbnb>");
        let block = DataBlock::from_points(vec![xml.into_bytes()], DataType::String)
            .with_mime(Some(METADATA_MIME.into()));
        (block, time)
    }
}

fn user_text(block: &DataBlock) -> String {
    match block.to_channel_data() {
        Some(ChannelData::User(points)) => points
            .iter()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .collect(),
        Some(ChannelData::String(values)) => values.concat(),
        _ => String::new(),
    }
}

/// Channels of one source a request is interested in.
#[derive(Debug, Clone, PartialEq)]
struct SourceTarget {
    client: String,
    pattern: Vec<String>,
}

#[derive(Debug)]
enum Delivery {
    /// Every new frame as it arrives
    Frames,
    /// Consecutive time slices once they are complete
    Slices {
        cursor: Option<f64>,
        duration: f64,
        /// Exclude data at the cursor itself
        open_start: bool,
    },
}

/// A standing sink request.
#[derive(Debug)]
struct Subscription {
    session: u64,
    outbox: Sender<Fetched>,
    targets: Vec<SourceTarget>,
    delivery: Delivery,
    remaining: Option<u64>,
}

impl Subscription {
    fn is_done(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Send a result; false once the sink is gone.
    fn send(&mut self, tree: DataTree) -> bool {
        if self.outbox.send(Fetched::Data(tree)).is_err() {
            self.remaining = Some(0);
            return false;
        }
        if let Some(n) = self.remaining.as_mut() {
            *n = n.saturating_sub(1);
        }
        true
    }
}

/// A request forwarded to a PlugIn and not yet fully answered.
#[derive(Debug)]
struct Pending {
    session: u64,
    outbox: Sender<Fetched>,
    /// Full name of the PlugIn, under which answers are returned
    prefix: String,
    standing: bool,
    request: DataRequest,
    plugin: String,
}

/// Clients, subscriptions and pending PlugIn requests of one server.
#[derive(Debug)]
pub(crate) struct State {
    server: String,
    clients: Clients,
    subscriptions: Vec<Subscription>,
    pending: HashMap<String, Pending>,
    next_session: u64,
    next_request: u64,
}

impl State {
    pub fn new(server: &str) -> Self {
        Self {
            server: server.to_string(),
            clients: BTreeMap::new(),
            subscriptions: Vec::new(),
            pending: HashMap::new(),
            next_session: 0,
            next_request: 0,
        }
    }

    pub fn client_names(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    /// Add a client. A detached source reconnecting under its name gets its
    /// cached frames back.
    pub fn attach(
        &mut self,
        kind: ClientKind,
        name: &str,
        ring: &RingBuffer,
    ) -> Result<(u64, Receiver<Fetched>)> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.next_session += 1;
        let session = self.next_session;
        match self.clients.get_mut(name) {
            Some(entry) if entry.inbox.is_some() => {
                return Err(TurbineError::InvalidArgument(format!(
                    "A client named {} is already connected to /{}.",
                    name, self.server
                )));
            }
            Some(entry) if entry.kind == kind => {
                tracing::info!(
                    "Reattaching {} {} with {} cached frames",
                    kind,
                    name,
                    entry.ring.frames().count()
                );
                entry.session = session;
                entry.inbox = Some(tx);
                entry.ring.set_capacity(ring.cache_frames);
            }
            _ => {
                self.clients
                    .insert(name.to_string(), ClientEntry::new(kind, session, tx, ring));
            }
        }
        Ok((session, rx))
    }

    /// Remove a session. With `keep_cache` a source stays listed, detached,
    /// with its frames.
    pub fn detach(&mut self, session: u64, name: &str, keep_cache: bool) {
        self.subscriptions.retain(|s| s.session != session);

        let ended: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.session == session)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ended {
            let Some(pending) = self.pending.remove(&id) else {
                continue;
            };
            if !pending.standing {
                continue;
            }
            if let Some(inbox) = inbox_of(&self.clients, &pending.plugin) {
                let end = Fetched::PlugIn(PlugInRequest::EndOfStream(pending.request));
                if inbox.send(end).is_err() {
                    tracing::debug!("PlugIn {} left before end of stream {}", pending.plugin, id);
                }
            }
        }

        let Some(entry) = self.clients.get(name) else {
            return;
        };
        if entry.session != session {
            return;
        }
        if entry.kind == ClientKind::PlugIn {
            self.pending.retain(|_, p| p.plugin != name);
        }
        if entry.kind == ClientKind::Source && keep_cache {
            if let Some(entry) = self.clients.get_mut(name) {
                entry.inbox = None;
            }
        } else {
            self.clients.remove(name);
        }
    }

    /// Store a source frame and feed it to the subscriptions watching it.
    pub fn add_frame(&mut self, source: &str, tree: &DataTree, now: f64) {
        let Some(entry) = self.clients.get_mut(source) else {
            return;
        };
        let Some(frame) = entry.ring.push(tree, now).cloned() else {
            tracing::trace!("Ignoring empty frame from {}", source);
            return;
        };

        let server = self.server.as_str();
        let clients = &self.clients;
        self.subscriptions.retain_mut(|sub| {
            if !sub.targets.iter().any(|t| t.client == source) {
                return true;
            }
            match sub.delivery {
                Delivery::Frames => {
                    let tree = frame_result(server, source, &frame, &sub.targets);
                    if has_data(&tree) {
                        sub.send(tree);
                    }
                }
                Delivery::Slices { .. } => advance_slices(server, clients, sub),
            }
            !sub.is_done()
        });
    }

    /// Answer or start a sink request. Returns true when the sink should
    /// only see the newest result of its queue.
    pub fn request(&mut self, sink: &str, request: DataRequest) -> Result<bool> {
        let entry = self
            .clients
            .get(sink)
            .ok_or_else(|| TurbineError::disconnected(format!("Unknown sink {}", sink)))?;
        let outbox = entry
            .inbox
            .clone()
            .ok_or_else(|| TurbineError::disconnected(format!("Sink {} is detached", sink)))?;
        let session = entry.session;

        let walked = names::walk(&request.tree);
        let first = walked.channels.first();
        let (range, by_frame) = match (
            first.and_then(|e| e.time.clone()),
            first.and_then(|e| e.frame.clone()),
        ) {
            (Some(time), _) => (time, false),
            (None, Some(frame)) => (frame, true),
            (None, None) => (TimeRange::new(0.0, 0.0), true),
        };

        let (sources, plugins) = self.resolve(&walked.channels);
        let options = self.plugin_options(walked.options);
        let routed = !plugins.is_empty();
        for (plugin, channels) in plugins {
            let option = options.get(&plugin).cloned();
            self.forward(&plugin, &channels, option, &request, &range, by_frame, session, &outbox);
        }

        let monitoring = request.gap_control
            || (request.repetitions.is_infinite() && request.increment == 0.0);
        let standing = request.repetitions.is_infinite() || request.domain == Domain::Future;
        if !standing {
            if !sources.is_empty() || !routed {
                let window = Window {
                    reference: request.reference,
                    relationship: request.relationship,
                    start: range.start(),
                    duration: range.duration(),
                };
                let tree = self.evaluate(
                    &sources,
                    &window,
                    by_frame,
                    request.repetitions.count(),
                    request.increment,
                );
                if outbox.send(Fetched::Data(tree)).is_err() {
                    tracing::debug!("Sink {} left before its result", sink);
                }
            }
            return Ok(false);
        }
        if sources.is_empty() {
            return Ok(monitoring);
        }

        let remaining = match request.repetitions {
            Repetitions::Finite(n) => Some(n),
            Repetitions::Infinite => None,
        };
        let mut sub = Subscription {
            session,
            outbox,
            targets: sources,
            delivery: Delivery::Frames,
            remaining,
        };

        if by_frame || range.duration() <= 0.0 {
            if request.reference == Reference::Oldest {
                self.replay_frames(&mut sub);
            }
        } else if request.increment < 0.0 {
            walk_backwards(&self.server, &self.clients, &mut sub, range.start(), range.duration());
            return Ok(monitoring);
        } else {
            let times = target_times(&self.clients, &sub.targets);
            let cursor = match request.reference {
                Reference::Newest => times.last().copied(),
                Reference::Oldest => times.first().map(|t| t + range.start()),
                _ if range.start().is_finite() => Some(range.start()),
                _ => times.first().copied(),
            };
            sub.delivery = Delivery::Slices {
                open_start: request.reference == Reference::Newest && cursor.is_some(),
                cursor,
                duration: range.duration(),
            };
            advance_slices(&self.server, &self.clients, &mut sub);
        }

        if !sub.is_done() {
            tracing::debug!("Sink {} subscribed to {} sources", sink, sub.targets.len());
            self.subscriptions.push(sub);
        }
        Ok(monitoring)
    }

    /// Split requested names into source targets and per-PlugIn channels.
    fn resolve(&self, entries: &[Entry]) -> (Vec<SourceTarget>, BTreeMap<String, Vec<String>>) {
        let mut sources = Vec::new();
        let mut plugins: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entry in entries {
            let Some(segments) = names::server_relative(&self.server, entry) else {
                tracing::debug!("Ignoring request for another server: {:?}", entry.segments);
                continue;
            };
            let Some((client, rest)) = segments.split_first() else {
                continue;
            };
            let pattern = if rest.is_empty() || client == RECURSIVE {
                vec![RECURSIVE.to_string()]
            } else {
                rest.to_vec()
            };
            for (name, target) in &self.clients {
                if client != RECURSIVE && client != ANY && client != name {
                    continue;
                }
                match target.kind {
                    ClientKind::Source => {
                        let target = SourceTarget {
                            client: name.clone(),
                            pattern: pattern.clone(),
                        };
                        if !sources.contains(&target) {
                            sources.push(target);
                        }
                    }
                    ClientKind::PlugIn if client != RECURSIVE => {
                        plugins.entry(name.clone()).or_default().push(pattern.join("/"));
                    }
                    _ => {}
                }
            }
        }
        (sources, plugins)
    }

    /// Option blocks keyed by the PlugIn they are addressed to.
    fn plugin_options(&self, options: Vec<(Vec<String>, DataBlock)>) -> HashMap<String, DataBlock> {
        options
            .into_iter()
            .filter_map(|(path, block)| {
                let path = match path.split_first() {
                    Some((first, rest)) if *first == self.server && !rest.is_empty() => rest,
                    _ => &path[..],
                };
                match path {
                    [plugin] => Some((plugin.clone(), block)),
                    _ => None,
                }
            })
            .collect()
    }

    /// Hand a request to a PlugIn under a fresh request id.
    #[allow(clippy::too_many_arguments)]
    fn forward(
        &mut self,
        plugin: &str,
        channels: &[String],
        option: Option<DataBlock>,
        request: &DataRequest,
        range: &TimeRange,
        by_frame: bool,
        session: u64,
        outbox: &Sender<Fetched>,
    ) {
        let Some(inbox) = inbox_of(&self.clients, plugin) else {
            return;
        };
        self.next_request += 1;
        let id = format!("req-{}", self.next_request);

        let mut tree = DataTree::new();
        let root = tree.root();
        for channel in channels {
            let node = tree.add_channel(root, &format!("/{}", channel));
            tree.node_mut(node).block = Some(DataBlock::marker());
        }
        for top in tree.children(root).to_vec() {
            let node = tree.node_mut(top);
            if by_frame {
                node.frame = Some(range.clone());
            } else {
                node.time = Some(range.clone());
            }
        }
        if let Some(block) = option {
            tree.add_child(root, DataNode::named(DOT).with_block(block));
        }

        let forwarded = DataRequest {
            tree,
            name: Some(id.clone()),
            ..request.clone()
        };
        tracing::debug!("Routing {} to PlugIn {}", id, plugin);
        self.pending.insert(
            id,
            Pending {
                session,
                outbox: outbox.clone(),
                prefix: format!("/{}/{}", self.server, plugin),
                standing: forwarded.is_standing(),
                request: forwarded.clone(),
                plugin: plugin.to_string(),
            },
        );
        if inbox.send(Fetched::PlugIn(PlugInRequest::Data(forwarded))).is_err() {
            tracing::warn!("PlugIn {} is not reading requests", plugin);
        }
    }

    /// Pass a PlugIn answer on to the sink that asked for it.
    pub fn response(&mut self, plugin: &str, envelope: &DataTree) {
        let root = envelope.root();
        for header in envelope.children(root) {
            let Some(id) = envelope.node(*header).name() else {
                tracing::warn!("PlugIn {} answered without a request id", plugin);
                continue;
            };
            let Some(pending) = self.pending.get(id).filter(|p| p.plugin == plugin) else {
                tracing::warn!("PlugIn {} answered unknown request {}", plugin, id);
                continue;
            };
            let body = envelope
                .children(*header)
                .iter()
                .copied()
                .find(|c| envelope.node(*c).kind == NodeKind::EndOfStream)
                .unwrap_or(*header);

            let mut tree = DataTree::new();
            let top = tree.root();
            let base = tree.add_channel(top, &pending.prefix);
            for child in envelope.children(body) {
                tree.graft(base, envelope, *child);
            }
            let delivered = pending.outbox.send(Fetched::Data(tree)).is_ok();
            if !pending.standing || !delivered {
                self.pending.remove(id);
            }
        }
    }

    /// Record the channels, folders and metadata of a registration.
    pub fn register(&mut self, name: &str, registration: &DataTree) -> Result<()> {
        let entry = self
            .clients
            .get_mut(name)
            .ok_or_else(|| TurbineError::disconnected(format!("Unknown client {}", name)))?;
        let walked = names::walk(registration);
        for channel in &walked.channels {
            let path = own_path(&self.server, name, channel);
            match channel.block.clone().filter(|b| !b.is_marker()) {
                Some(block) => {
                    entry.registered.insert(path, Some(block));
                }
                None => {
                    entry.registered.entry(path).or_insert(None);
                }
            }
        }
        for folder in &walked.folders {
            entry.folders.insert(own_path(&self.server, name, folder));
        }
        tracing::debug!(
            "{} registered {} channels and {} folders",
            name,
            walked.channels.len(),
            walked.folders.len()
        );
        Ok(())
    }

    /// Registration answer for the names in `request`.
    pub fn registered(&self, request: &DataRequest) -> DataTree {
        let walked = names::walk(&request.tree);
        let patterns: Vec<Vec<String>> = walked
            .channels
            .iter()
            .chain(walked.folders.iter())
            .filter_map(|e| names::server_relative(&self.server, e))
            .map(|p| if p.is_empty() { vec![RECURSIVE.to_string()] } else { p })
            .collect();

        let mut tree = DataTree::new();
        let root = tree.root();
        let server = tree.add_child(
            root,
            DataNode::named(self.server.clone()).with_kind(NodeKind::Server),
        );
        for (name, entry) in &self.clients {
            let client_path = [name.as_str()];
            if !patterns.iter().any(|p| names::matches_below(p, &client_path)) {
                continue;
            }
            let client = tree.add_child(server, DataNode::named(name.clone()).with_kind(kind_of(entry.kind)));

            for channel in entry.channel_names() {
                if !matches_any(&patterns, name, &channel) {
                    continue;
                }
                let (block, time) = entry.metadata(&channel);
                let node = tree.add_channel(client, &format!("/{}", channel));
                let node = tree.node_mut(node);
                node.block = Some(block);
                node.time = time;
            }
            for folder in &entry.folders {
                if matches_any(&patterns, name, folder) {
                    tree.add_channel(client, &format!("/{}", folder));
                }
            }
        }
        tree
    }

    /// Remove channels of `name`; returns the server, the client and the
    /// names that were removed.
    pub fn delete(&mut self, name: &str, channels: &DataTree) -> Result<DataTree> {
        let entry = self
            .clients
            .get_mut(name)
            .ok_or_else(|| TurbineError::disconnected(format!("Unknown client {}", name)))?;
        let walked = names::walk(channels);
        let mut removed = Vec::new();
        for requested in walked.channels.iter().chain(walked.folders.iter()) {
            let path = own_path(&self.server, name, requested);
            let stored = entry.ring.channel_names().contains(&path);
            let registered = entry.registered.remove(&path).is_some();
            let folder = entry.folders.remove(&path);
            entry.ring.remove_channel(&path);
            if stored || registered || folder {
                removed.push(path);
            }
        }

        let mut ack = DataTree::new();
        let root = ack.root();
        let server = ack.add_child(
            root,
            DataNode::named(self.server.clone()).with_kind(NodeKind::Server),
        );
        let client = ack.add_child(server, DataNode::named(name).with_kind(kind_of(entry.kind)));
        for path in &removed {
            let node = ack.add_channel(client, &format!("/{}", path));
            ack.node_mut(node).block = Some(DataBlock::marker());
        }
        tracing::info!("{} deleted {:?}", name, removed);
        Ok(ack)
    }

    pub fn clear_cache(&mut self, name: &str) {
        if let Some(entry) = self.clients.get_mut(name) {
            entry.ring.clear();
        }
    }

    fn evaluate(
        &self,
        targets: &[SourceTarget],
        window: &Window,
        by_frame: bool,
        count: u64,
        increment: f64,
    ) -> DataTree {
        collect(&self.server, &self.clients, targets, |series| {
            let values = if by_frame { &series.frames } else { &series.times };
            let mut span: Option<Range<usize>> = None;
            for k in 0..count.max(1) {
                let mut repeated = *window;
                repeated.start += k as f64 * increment * window.duration;
                if let Some(r) = store::select(values, &repeated) {
                    span = Some(match span {
                        Some(s) => s.start.min(r.start)..s.end.max(r.end),
                        None => r,
                    });
                }
            }
            span
        })
    }

    /// Send every cached frame of the subscription's sources.
    fn replay_frames(&self, sub: &mut Subscription) {
        let clients: BTreeSet<String> = sub.targets.iter().map(|t| t.client.clone()).collect();
        for client in &clients {
            let Some(entry) = self.clients.get(client) else {
                continue;
            };
            for frame in entry.ring.frames() {
                if sub.is_done() {
                    return;
                }
                let tree = frame_result(&self.server, client, frame, &sub.targets);
                if has_data(&tree) {
                    sub.send(tree);
                }
            }
        }
    }
}

fn kind_of(kind: ClientKind) -> NodeKind {
    match kind {
        ClientKind::Source => NodeKind::Source,
        ClientKind::Sink => NodeKind::Sink,
        ClientKind::PlugIn => NodeKind::PlugIn,
        ClientKind::Controller => NodeKind::Controller,
    }
}

fn inbox_of(clients: &Clients, name: &str) -> Option<Sender<Fetched>> {
    clients.get(name).and_then(|e| e.inbox.clone())
}

/// Path of a registered name relative to its client.
fn own_path(server: &str, client: &str, entry: &Entry) -> String {
    let segments = &entry.segments;
    let own = match segments.as_slice() {
        [s, c, rest @ ..] if !entry.relative && s == server && c == client && !rest.is_empty() => rest,
        _ => segments.as_slice(),
    };
    own.join("/")
}

fn matches_any(patterns: &[Vec<String>], client: &str, channel: &str) -> bool {
    let mut path = vec![client.to_string()];
    path.extend(names::split(channel));
    patterns.iter().any(|p| names::matches(p, &path))
}

fn leaf_name(server: &str, client: &str, channel: &str) -> String {
    format!("/{}/{}/{}", server, client, channel)
}

fn has_data(tree: &DataTree) -> bool {
    !tree.children(tree.root()).is_empty()
}

fn put_leaf(tree: &mut DataTree, name: &str, block: DataBlock, time: TimeRange) {
    let root = tree.root();
    let node = tree.add_channel(root, name);
    if tree.node(node).block.is_none() {
        let leaf = tree.node_mut(node);
        leaf.block = Some(block);
        leaf.time = Some(time);
    } else {
        tree.add_child(node, DataNode::unnamed().with_block(block).with_time(Some(time)));
    }
}

/// The channels of `frame` the targets ask for.
fn frame_result(server: &str, source: &str, frame: &StoredFrame, targets: &[SourceTarget]) -> DataTree {
    let mut tree = DataTree::new();
    for (name, channel) in &frame.channels {
        let path = names::split(name);
        let wanted = targets
            .iter()
            .any(|t| t.client == source && names::matches(&t.pattern, &path));
        if !wanted {
            continue;
        }
        put_leaf(
            &mut tree,
            &leaf_name(server, source, name),
            channel.block.clone(),
            TimeRange::from_points(channel.times.clone(), channel.point_duration),
        );
    }
    tree
}

/// Every (source, channel) pair the targets match, once each.
fn matched_channels<'a>(
    clients: &'a Clients,
    targets: &'a [SourceTarget],
) -> Vec<(&'a str, &'a ClientEntry, String)> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for target in targets {
        let Some(entry) = clients.get(&target.client) else {
            continue;
        };
        for name in entry.ring.channel_names() {
            if !names::matches(&target.pattern, &names::split(&name)) {
                continue;
            }
            if seen.insert((target.client.as_str(), name.clone())) {
                out.push((target.client.as_str(), entry, name));
            }
        }
    }
    out
}

/// Result tree of the points `pick` selects from each matched channel.
fn collect<F>(server: &str, clients: &Clients, targets: &[SourceTarget], mut pick: F) -> DataTree
where
    F: FnMut(&Series) -> Option<Range<usize>>,
{
    let mut tree = DataTree::new();
    for (client, entry, name) in matched_channels(clients, targets) {
        let Some(series) = entry.ring.series(&name) else {
            continue;
        };
        let Some(range) = pick(&series) else {
            continue;
        };
        if let Some((block, time)) = series.slice(range) {
            put_leaf(&mut tree, &leaf_name(server, client, &name), block, time);
        }
    }
    tree
}

/// Sorted times of every matched channel.
fn target_times(clients: &Clients, targets: &[SourceTarget]) -> Vec<f64> {
    let mut times: Vec<f64> = matched_channels(clients, targets)
        .into_iter()
        .filter_map(|(_, entry, name)| entry.ring.series(&name))
        .flat_map(|series| series.times)
        .collect();
    times.sort_by(f64::total_cmp);
    times
}

/// Deliver every complete slice after the subscription's cursor. Empty
/// stretches are skipped.
fn advance_slices(server: &str, clients: &Clients, sub: &mut Subscription) {
    let Delivery::Slices {
        cursor,
        duration,
        open_start,
    } = &mut sub.delivery
    else {
        return;
    };
    let duration = *duration;

    while sub.remaining != Some(0) {
        let times = target_times(clients, &sub.targets);
        let (Some(&oldest), Some(&newest)) = (times.first(), times.last()) else {
            return;
        };
        let mut lo = *cursor.get_or_insert(oldest);
        let next = if *open_start {
            times.partition_point(|t| *t <= lo)
        } else {
            times.partition_point(|t| *t < lo)
        };
        let Some(&t0) = times.get(next) else {
            return;
        };
        let skip = ((t0 - lo) / duration).floor();
        if skip >= 1.0 {
            lo += skip * duration;
            *open_start = false;
            *cursor = Some(lo);
        }
        let hi = lo + duration;
        if newest < hi {
            return;
        }

        let inclusive = !*open_start;
        let tree = collect(server, clients, &sub.targets, |series| {
            store::between(&series.times, lo, hi, inclusive, false)
        });
        *cursor = Some(hi);
        *open_start = false;
        if has_data(&tree) {
            if sub.outbox.send(Fetched::Data(tree)).is_err() {
                sub.remaining = Some(0);
                return;
            }
            if let Some(n) = sub.remaining.as_mut() {
                *n = n.saturating_sub(1);
            }
        }
    }
}

/// Deliver slices of existing data going back from `start`.
fn walk_backwards(server: &str, clients: &Clients, sub: &mut Subscription, start: f64, duration: f64) {
    let times = target_times(clients, &sub.targets);
    let mut hi = start;
    while !sub.is_done() {
        let below = times.partition_point(|t| *t < hi);
        if below == 0 {
            return;
        }
        let t1 = times[below - 1];
        let skip = ((hi - t1) / duration).ceil() - 1.0;
        if skip >= 1.0 {
            hi -= skip * duration;
        }
        let lo = hi - duration;
        let tree = collect(server, clients, &sub.targets, |series| {
            store::between(&series.times, lo, hi, true, false)
        });
        hi = lo;
        if has_data(&tree) && !sub.send(tree) {
            return;
        }
    }
}
