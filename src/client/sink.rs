//! Sink: requests data and reads it back.

use super::session::{Fetched, Outbound};
use super::{Client, ClientCore, ClientKind, FetchTimeout, RingBuffer, ALL_CHANNELS};
use crate::channel_map::ChannelMap;
use crate::config::ClientConfig;
use crate::error::{Result, ResultExt, TurbineError};
use crate::rmap::{
    DataRequest, DataTree, Domain, Reference, Relationship, Repetitions, RequestMode,
    RequestOptions, TimeRange,
};

const TIME_REFERENCES: &str =
    "absolute, newest, oldest, aligned, after, modified, next, previous or registration";

/// How a reference string is sent to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedReference {
    Time {
        reference: Reference,
        relationship: Relationship,
    },
    /// Answered from registration metadata instead of data
    Registration,
}

/// Map a caller's reference name onto the server's reference and
/// relationship.
///
/// `next` and `previous` are absolute requests relative to the given start.
/// A zero-duration absolute request matches the newest point at or before
/// the start; `extend_start` asks the same of any other request.
pub fn resolve_reference(
    reference: &str,
    start: f64,
    duration: f64,
    options: RequestOptions,
) -> Result<ResolvedReference> {
    let reference = reference.to_ascii_lowercase();
    let (server_reference, mut relationship) = match reference.as_str() {
        "absolute" => (
            Reference::Absolute,
            if duration == 0.0 {
                Relationship::LessEqual
            } else {
                Relationship::Equal
            },
        ),
        "newest" | "oldest" => (
            if reference == "newest" {
                Reference::Newest
            } else {
                Reference::Oldest
            },
            if duration == 0.0 && start != 0.0 {
                Relationship::LessEqual
            } else {
                Relationship::Equal
            },
        ),
        "after" => (Reference::After, Relationship::Equal),
        "modified" => (Reference::Modified, Relationship::Equal),
        "aligned" => (Reference::Aligned, Relationship::Equal),
        "next" => (
            Reference::Absolute,
            if duration == 0.0 {
                Relationship::Greater
            } else {
                Relationship::GreaterEqual
            },
        ),
        "previous" => (Reference::Absolute, Relationship::Less),
        "registration" => return Ok(ResolvedReference::Registration),
        other => {
            return Err(TurbineError::InvalidArgument(format!(
                "TimeRef \"{}\" must be one of {}.",
                other, TIME_REFERENCES
            )))
        }
    };
    if options.extend_start && reference != "next" && reference != "previous" {
        relationship = Relationship::LessEqual;
    }
    Ok(ResolvedReference::Time {
        reference: server_reference,
        relationship,
    })
}

/// A client that requests and subscribes to data.
///
/// Requests are sent immediately; results are read with
/// [`fetch`](Sink::fetch), one result per call.
#[derive(Debug)]
pub struct Sink {
    core: ClientCore,
    /// Registration answered synchronously, returned by the next fetch
    registration_result: Option<DataTree>,
}

impl Default for Sink {
    fn default() -> Self {
        Self::new()
    }
}

impl Client for Sink {
    fn core(&self) -> &ClientCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ClientCore {
        &mut self.core
    }

    fn on_close(&mut self) {
        self.registration_result = None;
    }
}

impl Sink {
    pub fn new() -> Self {
        Self {
            core: ClientCore::new(ClientKind::Sink, RingBuffer::default()),
            registration_result: None,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            core: ClientCore::from_config(ClientKind::Sink, config),
            registration_result: None,
        }
    }

    /// Request `duration` seconds of the map's channels starting at `start`,
    /// measured against `reference`.
    pub fn request(
        &mut self,
        map: &mut ChannelMap,
        start: f64,
        duration: f64,
        reference: &str,
    ) -> Result<()> {
        self.request_with_options(map, start, duration, reference, RequestOptions::default())
    }

    pub fn request_with_options(
        &mut self,
        map: &mut ChannelMap,
        start: f64,
        duration: f64,
        reference: &str,
        options: RequestOptions,
    ) -> Result<()> {
        let (reference, relationship) = match resolve_reference(reference, start, duration, options)? {
            ResolvedReference::Registration => return self.request_registration(map),
            ResolvedReference::Time {
                reference,
                relationship,
            } => (reference, relationship),
        };

        let mut request = map.produce_request(true).context("Building sink request")?;
        set_time_range(&mut request, TimeRange::new(start, duration));
        request.reference = reference;
        request.relationship = relationship;
        request.repetitions = Repetitions::Finite(1);
        request.increment = 1.0;
        request.mode = RequestMode::Consolidated;
        request.synchronized = true;
        request.domain = Domain::Existing;
        request.options = options;
        self.send(request)
    }

    /// Request `count` consecutive ranges, each advancing by `interval`
    /// durations, returned as one consolidated result. With `by_frame` the
    /// range is in frame indices.
    #[allow(clippy::too_many_arguments)]
    pub fn request_repeated(
        &mut self,
        map: &mut ChannelMap,
        start: f64,
        duration: f64,
        reference: &str,
        count: u64,
        interval: f64,
        by_frame: bool,
    ) -> Result<()> {
        if count < 1 {
            return Err(TurbineError::InvalidArgument(
                "The repeat count must be at least one.".into(),
            ));
        }
        if interval < 0.0 {
            return Err(TurbineError::InvalidArgument(
                "The repeat interval must not be negative.".into(),
            ));
        }
        let reference = match reference.to_ascii_lowercase().as_str() {
            "newest" => Reference::Newest,
            "oldest" => Reference::Oldest,
            "absolute" => Reference::Absolute,
            other => {
                return Err(TurbineError::InvalidArgument(format!(
                    "TimeRef \"{}\" must be one of newest, oldest or absolute.",
                    other
                )))
            }
        };

        let mut request = map.produce_request(true).context("Building repeated request")?;
        let range = TimeRange::new(start, duration);
        if by_frame {
            set_frame_range(&mut request, range);
        } else {
            set_time_range(&mut request, range);
        }
        request.reference = reference;
        request.repetitions = Repetitions::Finite(count);
        request.increment = interval;
        request.mode = RequestMode::Consolidated;
        request.domain = Domain::Existing;
        self.send(request)
    }

    /// Ask for the registration metadata of the map's channels, or of every
    /// channel when the map is empty. The answer is returned by the next
    /// [`fetch`](Sink::fetch).
    pub fn request_registration(&mut self, map: &mut ChannelMap) -> Result<()> {
        if map.is_empty() {
            map.add(ALL_CHANNELS)?;
        }
        let request = map.produce_request(false).context("Building registration request")?;
        tracing::debug!("Sink registration request:\n{}", request);
        let registered = self.core.session()?.get_registered(request)?;
        self.registration_result = Some(registered);
        Ok(())
    }

    /// Registration of every channel on the server.
    pub fn request_registration_all(&mut self) -> Result<()> {
        self.request_registration(&mut ChannelMap::new())
    }

    /// Subscribe to every new frame of the map's channels.
    pub fn subscribe(&mut self, map: &mut ChannelMap) -> Result<()> {
        self.subscribe_from(map, "newest")
    }

    /// Subscribe starting from the `newest` or `oldest` frame.
    pub fn subscribe_from(&mut self, map: &mut ChannelMap, reference: &str) -> Result<()> {
        let reference = match reference.to_ascii_lowercase().as_str() {
            "newest" => Reference::Newest,
            "oldest" => Reference::Oldest,
            other => {
                return Err(TurbineError::InvalidArgument(format!(
                    "Subscription reference \"{}\" must be newest or oldest.",
                    other
                )))
            }
        };
        let mut request = map.produce_request(true).context("Building subscription")?;
        request.repetitions = Repetitions::Infinite;
        request.increment = 1.0;
        request.reference = reference;
        self.start_frame_subscription(request)
    }

    /// Subscribe to successive `duration` second slices, starting at the
    /// newest data or at the oldest.
    pub fn subscribe_for(&mut self, map: &mut ChannelMap, reference: &str, duration: f64) -> Result<()> {
        let (reference, domain, start) = match reference.to_ascii_lowercase().as_str() {
            "newest" => (Reference::Newest, Domain::Future, 0.0),
            "oldest" => (Reference::Absolute, Domain::All, f64::NEG_INFINITY),
            other => {
                return Err(TurbineError::InvalidArgument(format!(
                    "Subscription reference \"{}\" must be newest or oldest.",
                    other
                )))
            }
        };
        let request = map.produce_request(true).context("Building time subscription")?;
        self.start_time_subscription(request, reference, domain, start, duration, 1.0)
    }

    /// Subscribe to successive `duration` second slices from `start`.
    /// `previous` walks backwards through existing data.
    pub fn subscribe_at(
        &mut self,
        map: &mut ChannelMap,
        start: f64,
        duration: f64,
        reference: &str,
    ) -> Result<()> {
        let (reference, domain, increment) = match reference.to_ascii_lowercase().as_str() {
            "newest" => (Reference::Newest, Domain::Future, 1.0),
            "oldest" => (Reference::Oldest, Domain::All, 1.0),
            "absolute" | "next" => (Reference::Absolute, Domain::All, 1.0),
            "previous" => (Reference::Absolute, Domain::Existing, -1.0),
            other => {
                return Err(TurbineError::InvalidArgument(format!(
                    "Subscription reference \"{}\" must be one of newest, oldest, absolute, next or previous.",
                    other
                )))
            }
        };
        let request = map.produce_request(true).context("Building time subscription")?;
        self.start_time_subscription(request, reference, domain, start, duration, increment)
    }

    /// Follow the newest frame, skipping frames the sink is too slow to read.
    /// `gap_control` must not be negative.
    pub fn monitor(&mut self, map: &mut ChannelMap, gap_control: i32) -> Result<()> {
        if gap_control < 0 {
            return Err(TurbineError::InvalidArgument(format!(
                "Gap control ({}) must not be negative.",
                gap_control
            )));
        }
        let mut request = map.produce_request(true).context("Building monitor")?;
        request.repetitions = Repetitions::Infinite;
        request.increment = 0.0;
        request.gap_control = true;
        request.reference = Reference::Newest;
        self.start_frame_subscription(request)
    }

    /// Request the next frame to arrive.
    pub fn request_frame(&mut self, map: &mut ChannelMap) -> Result<()> {
        let mut request = map.produce_request(true).context("Building frame request")?;
        request.repetitions = Repetitions::Finite(1);
        request.increment = 1.0;
        request.reference = Reference::Newest;
        self.start_frame_subscription(request)
    }

    /// Read the next result into `map`, replacing its contents.
    ///
    /// A negative timeout waits forever and zero polls. When nothing arrives
    /// in time the map is left empty with
    /// [`ChannelMap::fetch_timed_out`] set.
    pub fn fetch(&mut self, timeout_ms: i64, map: &mut ChannelMap) -> Result<()> {
        map.clear();
        let result = match self.registration_result.take() {
            Some(registered) => Some(registered),
            None => {
                let fetched = self
                    .core
                    .session()?
                    .fetch(FetchTimeout::from_millis(timeout_ms))
                    .context("Sink fetch")?;
                match fetched {
                    Some(Fetched::Data(tree)) => Some(tree),
                    Some(Fetched::PlugIn(_)) => {
                        return Err(TurbineError::InvalidState(
                            "A sink cannot receive PlugIn requests.".into(),
                        ))
                    }
                    None => None,
                }
            }
        };
        if result.is_none() {
            tracing::debug!("Sink fetch timed out after {} ms", timeout_ms);
        }
        map.process_result(result, true, false);
        Ok(())
    }

    /// Fetch into a new map.
    pub fn fetch_new(&mut self, timeout_ms: i64) -> Result<ChannelMap> {
        let mut map = ChannelMap::new();
        self.fetch(timeout_ms, &mut map)?;
        Ok(map)
    }

    fn start_frame_subscription(&mut self, mut request: DataRequest) -> Result<()> {
        request.mode = RequestMode::Frames;
        request.synchronized = true;
        request.domain = Domain::Future;
        set_frame_range(&mut request, TimeRange::new(0.0, 0.0));
        self.send(request)
    }

    fn start_time_subscription(
        &mut self,
        mut request: DataRequest,
        reference: Reference,
        domain: Domain,
        start: f64,
        duration: f64,
        increment: f64,
    ) -> Result<()> {
        request.repetitions = Repetitions::Infinite;
        request.increment = increment;
        request.reference = reference;
        request.mode = RequestMode::Consolidated;
        request.synchronized = true;
        request.domain = domain;
        request.relationship = if domain == Domain::Existing {
            Relationship::Less
        } else {
            Relationship::Greater
        };
        set_time_range(&mut request, TimeRange::new(start, duration));
        self.send(request)
    }

    fn send(&mut self, request: DataRequest) -> Result<()> {
        let session = self.core.session()?;
        self.registration_result = None;
        tracing::debug!("Sink request:\n{}", request);
        session.add_child(Outbound::Request(request))
    }
}

fn set_time_range(request: &mut DataRequest, range: TimeRange) {
    for top in request.requested() {
        request.tree.node_mut(top).time = Some(range.clone());
    }
}

fn set_frame_range(request: &mut DataRequest, range: TimeRange) {
    for top in request.requested() {
        request.tree.node_mut(top).frame = Some(range.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::session::{Credentials, MockSession, Server, Session};
    use crate::rmap::DataBlock;
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};

    struct OneSession(Arc<dyn Session>);

    impl Server for OneSession {
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
            Ok(self.0.clone())
        }
    }

    /// Sink whose session records every request sent.
    fn recording_sink() -> (Sink, Arc<Mutex<Vec<DataRequest>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let log = sent.clone();
        let mut mock = MockSession::new();
        mock.expect_full_name().return_const("/S/sink".to_string());
        mock.expect_add_child().returning(move |outbound| {
            if let Outbound::Request(request) = outbound {
                log.lock().unwrap().push(request);
            }
            Ok(())
        });
        let mut sink = Sink::new();
        sink.open_connection(Arc::new(OneSession(Arc::new(mock))), "sink")
            .unwrap();
        (sink, sent)
    }

    fn two_channels() -> ChannelMap {
        let mut map = ChannelMap::new();
        map.add("/S/src/c0").unwrap();
        map.add("/S/src/c1").unwrap();
        map
    }

    fn top_ranges(request: &DataRequest) -> Vec<(Option<TimeRange>, Option<TimeRange>)> {
        request
            .requested()
            .into_iter()
            .map(|id| {
                let node = request.tree.node(id);
                (node.time.clone(), node.frame.clone())
            })
            .collect()
    }

    fn time(reference: Reference, relationship: Relationship) -> ResolvedReference {
        ResolvedReference::Time {
            reference,
            relationship,
        }
    }

    #[test]
    fn test_reference_table() {
        let none = RequestOptions::default();
        let r = |name, start, duration| resolve_reference(name, start, duration, none).unwrap();

        assert_eq!(r("absolute", 5.0, 0.0), time(Reference::Absolute, Relationship::LessEqual));
        assert_eq!(r("absolute", 5.0, 1.0), time(Reference::Absolute, Relationship::Equal));
        assert_eq!(r("newest", 0.0, 0.0), time(Reference::Newest, Relationship::Equal));
        assert_eq!(r("newest", 2.0, 0.0), time(Reference::Newest, Relationship::LessEqual));
        assert_eq!(r("Oldest", 2.0, 0.0), time(Reference::Oldest, Relationship::LessEqual));
        assert_eq!(r("oldest", 2.0, 1.0), time(Reference::Oldest, Relationship::Equal));
        assert_eq!(r("after", 0.0, 0.0), time(Reference::After, Relationship::Equal));
        assert_eq!(r("modified", 0.0, 0.0), time(Reference::Modified, Relationship::Equal));
        assert_eq!(r("aligned", 0.0, 1.0), time(Reference::Aligned, Relationship::Equal));
        assert_eq!(r("next", 3.0, 0.0), time(Reference::Absolute, Relationship::Greater));
        assert_eq!(r("next", 3.0, 1.0), time(Reference::Absolute, Relationship::GreaterEqual));
        assert_eq!(r("previous", 3.0, 1.0), time(Reference::Absolute, Relationship::Less));
        assert_eq!(r("REGISTRATION", 0.0, 0.0), ResolvedReference::Registration);

        let err = resolve_reference("sideways", 0.0, 0.0, none).unwrap_err();
        assert!(err.to_string().contains("TimeRef"));
    }

    #[test]
    fn test_extend_start_forces_less_equal() {
        let extend = RequestOptions::default().with_extend_start(true);
        assert_eq!(
            resolve_reference("after", 1.0, 1.0, extend).unwrap(),
            time(Reference::After, Relationship::LessEqual)
        );
        assert_eq!(
            resolve_reference("next", 1.0, 1.0, extend).unwrap(),
            time(Reference::Absolute, Relationship::GreaterEqual)
        );
        assert_eq!(
            resolve_reference("previous", 1.0, 0.0, extend).unwrap(),
            time(Reference::Absolute, Relationship::Less)
        );
    }

    proptest! {
        #[test]
        fn prop_reference_table_is_total(
            index in 0usize..8,
            start in prop_oneof![Just(0.0), -1e6f64..1e6],
            duration in prop_oneof![Just(0.0), 0.0f64..1e3],
        ) {
            let names = ["absolute", "newest", "oldest", "after", "modified", "aligned", "next", "previous"];
            let name = names[index];
            let resolved = resolve_reference(name, start, duration, RequestOptions::default()).unwrap();
            let ResolvedReference::Time { reference, relationship } = resolved else {
                return Err(TestCaseError::fail("time reference resolved to registration"));
            };
            let expected_reference = match name {
                "newest" => Reference::Newest,
                "oldest" => Reference::Oldest,
                "after" => Reference::After,
                "modified" => Reference::Modified,
                "aligned" => Reference::Aligned,
                _ => Reference::Absolute,
            };
            let expected_relationship = match name {
                "absolute" if duration == 0.0 => Relationship::LessEqual,
                "newest" | "oldest" if duration == 0.0 && start != 0.0 => Relationship::LessEqual,
                "next" if duration == 0.0 => Relationship::Greater,
                "next" => Relationship::GreaterEqual,
                "previous" => Relationship::Less,
                _ => Relationship::Equal,
            };
            prop_assert_eq!(reference, expected_reference);
            prop_assert_eq!(relationship, expected_relationship);
        }
    }

    #[test]
    fn test_request_sets_time_range_on_every_channel() {
        let (mut sink, sent) = recording_sink();
        let mut map = two_channels();
        sink.request(&mut map, 10.0, 2.0, "absolute").unwrap();

        let sent = sent.lock().unwrap();
        let request = &sent[0];
        assert_eq!(request.reference, Reference::Absolute);
        assert_eq!(request.relationship, Relationship::Equal);
        assert_eq!(request.repetitions, Repetitions::Finite(1));
        assert_eq!(request.mode, RequestMode::Consolidated);
        assert_eq!(request.domain, Domain::Existing);
        assert!(request.synchronized);
        for (time, frame) in top_ranges(request) {
            assert_eq!(time, Some(TimeRange::new(10.0, 2.0)));
            assert!(frame.is_none());
        }
        let leaves = request.tree.leaves(request.tree.root());
        assert_eq!(leaves.len(), 2);
        assert!(leaves
            .iter()
            .all(|id| request.tree.node(*id).block.as_ref().is_some_and(DataBlock::is_marker)));
    }

    #[test]
    fn test_request_forwards_options() {
        let (mut sink, sent) = recording_sink();
        let mut map = two_channels();
        let options = RequestOptions::default().with_extend_start(true);
        sink.request_with_options(&mut map, 1.0, 1.0, "newest", options)
            .unwrap();
        let sent = sent.lock().unwrap();
        assert_eq!(sent[0].relationship, Relationship::LessEqual);
        assert!(sent[0].options.extend_start);
    }

    #[test]
    fn test_subscribe_and_monitor_shapes() {
        let (mut sink, sent) = recording_sink();
        sink.subscribe(&mut two_channels()).unwrap();
        sink.monitor(&mut two_channels(), 2).unwrap();
        sink.request_frame(&mut two_channels()).unwrap();
        assert!(sink.monitor(&mut two_channels(), -1).is_err());

        let sent = sent.lock().unwrap();
        let (subscribe, monitor, frame) = (&sent[0], &sent[1], &sent[2]);
        assert_eq!(subscribe.repetitions, Repetitions::Infinite);
        assert_eq!(subscribe.increment, 1.0);
        assert_eq!(subscribe.reference, Reference::Newest);
        assert_eq!(monitor.increment, 0.0);
        assert!(monitor.gap_control);
        assert_eq!(frame.repetitions, Repetitions::Finite(1));
        for request in [subscribe, monitor, frame] {
            assert_eq!(request.mode, RequestMode::Frames);
            assert_eq!(request.domain, Domain::Future);
            for (time, frame) in top_ranges(request) {
                assert!(time.is_none());
                assert_eq!(frame, Some(TimeRange::new(0.0, 0.0)));
            }
        }
    }

    #[test]
    fn test_time_subscriptions() {
        let (mut sink, sent) = recording_sink();
        sink.subscribe_for(&mut two_channels(), "oldest", 5.0).unwrap();
        sink.subscribe_at(&mut two_channels(), 20.0, 2.0, "previous")
            .unwrap();
        sink.subscribe_at(&mut two_channels(), 0.0, 1.0, "newest")
            .unwrap();
        assert!(sink.subscribe_at(&mut two_channels(), 0.0, 1.0, "after").is_err());

        let sent = sent.lock().unwrap();
        let oldest = &sent[0];
        assert_eq!(oldest.reference, Reference::Absolute);
        assert_eq!(oldest.domain, Domain::All);
        assert_eq!(oldest.relationship, Relationship::Greater);
        let (time, _) = &top_ranges(oldest)[0];
        assert_eq!(time.as_ref().unwrap().start(), f64::NEG_INFINITY);

        let previous = &sent[1];
        assert_eq!(previous.domain, Domain::Existing);
        assert_eq!(previous.relationship, Relationship::Less);
        assert_eq!(previous.increment, -1.0);

        let newest = &sent[2];
        assert_eq!(newest.reference, Reference::Newest);
        assert_eq!(newest.domain, Domain::Future);
        assert_eq!(newest.mode, RequestMode::Consolidated);
    }

    #[test]
    fn test_request_repeated_validation() {
        let (mut sink, sent) = recording_sink();
        assert!(sink
            .request_repeated(&mut two_channels(), 0.0, 1.0, "newest", 0, 1.0, false)
            .is_err());
        assert!(sink
            .request_repeated(&mut two_channels(), 0.0, 1.0, "newest", 2, -1.0, false)
            .is_err());
        assert!(sink
            .request_repeated(&mut two_channels(), 0.0, 1.0, "next", 2, 1.0, false)
            .is_err());
        sink.request_repeated(&mut two_channels(), 3.0, 1.0, "oldest", 4, 2.0, true)
            .unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].repetitions, Repetitions::Finite(4));
        assert_eq!(sent[0].increment, 2.0);
        for (time, frame) in top_ranges(&sent[0]) {
            assert!(time.is_none());
            assert_eq!(frame, Some(TimeRange::new(3.0, 1.0)));
        }
    }

    #[test]
    fn test_strict_request_rejects_mixed_map() {
        let (mut sink, sent) = recording_sink();
        let mut map = two_channels();
        map.put_data_as_f64(0, &[1.0]).unwrap();
        let err = sink.request(&mut map, 0.0, 1.0, "absolute").unwrap_err();
        assert!(matches!(
            err,
            TurbineError::WithContext { ref source, .. } if matches!(**source, TurbineError::IllegalMixedChannels)
        ));
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_registration_is_cached_for_next_fetch() {
        let mut mock = MockSession::new();
        mock.expect_full_name().return_const("/S/sink".to_string());
        mock.expect_get_registered().times(1).returning(|request| {
            let tree = &request.tree;
            assert!(tree.find_descendant(tree.root(), ALL_CHANNELS).is_some());
            let mut answer = DataTree::new();
            let root = answer.root();
            let leaf = answer.add_channel(root, "/S/src/c0");
            answer.node_mut(leaf).block = Some(DataBlock::marker());
            Ok(answer)
        });
        mock.expect_fetch()
            .times(1)
            .returning(|timeout| {
                assert_eq!(timeout, FetchTimeout::Poll);
                Ok(None)
            });
        let mut sink = Sink::new();
        sink.open_connection(Arc::new(OneSession(Arc::new(mock))), "sink")
            .unwrap();

        let mut map = ChannelMap::new();
        sink.request(&mut map, 0.0, 0.0, "registration").unwrap();
        let mut result = ChannelMap::new();
        sink.fetch(0, &mut result).unwrap();
        assert_eq!(result.channel_list(), vec!["/S/src/c0"]);
        assert!(!result.fetch_timed_out());

        // the cached answer is consumed; the next fetch reaches the session
        sink.fetch(0, &mut result).unwrap();
        assert!(result.fetch_timed_out());
        assert!(result.is_empty());
    }

    #[test]
    fn test_request_requires_connection() {
        let mut sink = Sink::new();
        let mut map = two_channels();
        assert!(matches!(
            sink.request(&mut map, 0.0, 1.0, "absolute"),
            Err(TurbineError::NotConnected)
        ));
    }
}
