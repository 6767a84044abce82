//! Frame rings and point selection.
//!
//! Each source owns a [`FrameRing`] of the frames it flushed, capped at its
//! cache size. Requests are answered by concatenating one channel across the
//! ring into a [`Series`] and selecting a contiguous run of points with
//! [`select`].

use crate::rmap::{DataBlock, DataTree, Reference, Relationship, TimeRange};
use std::collections::{BTreeSet, VecDeque};
use std::ops::Range;

/// One channel of a stored frame.
#[derive(Debug, Clone)]
pub(crate) struct StoredChannel {
    pub block: DataBlock,
    /// One time per point
    pub times: Vec<f64>,
    pub point_duration: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct StoredFrame {
    pub index: u64,
    pub channels: Vec<(String, StoredChannel)>,
}

impl StoredFrame {
    /// Decode a source frame. Server time-of-day placeholders are stamped
    /// with `now`; markers and empty channels are dropped.
    pub fn from_tree(index: u64, tree: &DataTree, now: f64) -> Option<Self> {
        let mut tree = tree.clone();
        for id in tree.walk(tree.root()) {
            let node = tree.node_mut(id);
            if node.time.as_ref().is_some_and(TimeRange::is_server_tod) {
                node.time = Some(TimeRange::new(now, 0.0));
            }
        }

        let extracted = tree.extract(tree.root());
        let mut channels = Vec::new();
        for (name, array) in extracted.channels {
            let Some(block) = array.block().filter(|b| b.points() > 0) else {
                continue;
            };
            let points = block.points();
            let times = if array.times().len() == points {
                array.times().to_vec()
            } else {
                vec![now; points]
            };
            let point_duration = array.time_reference().map_or(0.0, |tr| tr.duration());
            let name = name.trim_start_matches('/').to_string();
            channels.push((
                name,
                StoredChannel {
                    block: block.clone(),
                    times,
                    point_duration,
                },
            ));
        }
        if channels.is_empty() {
            return None;
        }
        Some(Self { index, channels })
    }

    pub fn channel(&self, name: &str) -> Option<&StoredChannel> {
        self.channels.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }
}

/// Frames of one source, oldest first.
#[derive(Debug, Clone)]
pub(crate) struct FrameRing {
    frames: VecDeque<StoredFrame>,
    capacity: usize,
    next_index: u64,
}

impl FrameRing {
    pub fn new(capacity: u64) -> Self {
        Self {
            frames: VecDeque::new(),
            capacity: capacity.max(1) as usize,
            next_index: 0,
        }
    }

    pub fn set_capacity(&mut self, capacity: u64) {
        self.capacity = capacity.max(1) as usize;
        self.trim();
    }

    /// Store a flushed frame; returns it unless it held no data.
    pub fn push(&mut self, tree: &DataTree, now: f64) -> Option<&StoredFrame> {
        let frame = StoredFrame::from_tree(self.next_index, tree, now)?;
        self.next_index += 1;
        self.frames.push_back(frame);
        self.trim();
        self.frames.back()
    }

    fn trim(&mut self) {
        while self.frames.len() > self.capacity {
            self.frames.pop_front();
        }
    }

    pub fn frames(&self) -> impl Iterator<Item = &StoredFrame> + '_ {
        self.frames.iter()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn channel_names(&self) -> BTreeSet<String> {
        self.frames
            .iter()
            .flat_map(|f| f.channels.iter().map(|(n, _)| n.clone()))
            .collect()
    }

    pub fn remove_channel(&mut self, name: &str) {
        for frame in &mut self.frames {
            frame.channels.retain(|(n, _)| n != name);
        }
        self.frames.retain(|f| !f.channels.is_empty());
    }

    /// Most recent data of a channel.
    pub fn latest(&self, name: &str) -> Option<&StoredChannel> {
        self.frames.iter().rev().find_map(|f| f.channel(name))
    }

    /// The channel's points across the ring.
    pub fn series(&self, name: &str) -> Option<Series> {
        let mut series = Series::default();
        for frame in &self.frames {
            if let Some(channel) = frame.channel(name) {
                series.push(frame.index, channel);
            }
        }
        (!series.is_empty()).then_some(series)
    }
}

/// One channel's points concatenated across frames.
#[derive(Debug, Clone, Default)]
pub(crate) struct Series {
    block: Option<DataBlock>,
    pub times: Vec<f64>,
    /// Frame index of every point
    pub frames: Vec<f64>,
    point_duration: f64,
}

impl Series {
    fn push(&mut self, frame: u64, channel: &StoredChannel) {
        match self.block.as_mut() {
            None => self.block = Some(channel.block.clone()),
            Some(block) if block.data_type() == channel.block.data_type() => {
                block.append(channel.block.clone());
            }
            Some(block) => {
                tracing::warn!(
                    "Skipping {} frame {} in a {} series",
                    channel.block.data_type(),
                    frame,
                    block.data_type()
                );
                return;
            }
        }
        self.times.extend_from_slice(&channel.times);
        self.frames
            .extend(std::iter::repeat(frame as f64).take(channel.times.len()));
        self.point_duration = channel.point_duration;
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn first_time(&self) -> Option<f64> {
        self.times.first().copied()
    }

    pub fn last_time(&self) -> Option<f64> {
        self.times.last().copied()
    }

    /// Points in `range` with their times.
    pub fn slice(&self, range: Range<usize>) -> Option<(DataBlock, TimeRange)> {
        let block = self.block.as_ref()?.select(range.clone());
        let times = self.times.get(range)?.to_vec();
        Some((block, TimeRange::from_points(times, self.point_duration)))
    }
}

/// What a request asks of one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Window {
    pub reference: Reference,
    pub relationship: Relationship,
    pub start: f64,
    pub duration: f64,
}

/// Select the run of `values` (sorted ascending) matching `window`.
///
/// Windows measured back from the newest value are open at the low end,
/// all others at the high end. Zero-duration windows pick every point
/// sharing the single value chosen by the relationship.
pub(crate) fn select(values: &[f64], window: &Window) -> Option<Range<usize>> {
    let first = *values.first()?;
    let last = *values.last()?;
    let Window {
        reference,
        relationship,
        start,
        duration,
    } = *window;

    let (lo, hi, from_newest) = match reference {
        Reference::Absolute => (start, start + duration, false),
        Reference::Newest => (last - start - duration, last - start, true),
        Reference::Oldest => (first + start, first + start + duration, false),
        Reference::After | Reference::Modified => {
            if last <= start {
                return None;
            }
            ((last - duration).max(start), last, true)
        }
        Reference::Aligned => {
            if duration > 0.0 {
                let hi = (last / duration).floor() * duration;
                (hi - duration, hi, false)
            } else {
                (last, last, true)
            }
        }
    };

    if duration == 0.0 {
        let target = if from_newest { hi } else { lo };
        let value = match relationship {
            Relationship::Equal => values.iter().copied().find(|v| *v == target)?,
            Relationship::LessEqual => values.iter().copied().rev().find(|v| *v <= target)?,
            Relationship::Less => values.iter().copied().rev().find(|v| *v < target)?,
            Relationship::Greater => values.iter().copied().find(|v| *v > target)?,
            Relationship::GreaterEqual => values.iter().copied().find(|v| *v >= target)?,
        };
        return run_of(values, value);
    }

    match relationship {
        Relationship::Equal if from_newest => between(values, lo, hi, false, true),
        Relationship::Equal => between(values, lo, hi, true, false),
        Relationship::LessEqual => {
            let extended = values.iter().copied().rev().find(|v| *v <= lo);
            let low = extended.unwrap_or(lo);
            between(values, low, hi, true, from_newest)
        }
        Relationship::Greater => between(values, lo, hi, false, true),
        Relationship::GreaterEqual => {
            let t0 = values.iter().copied().find(|v| *v > lo)?;
            between(values, t0, t0 + duration, true, false)
        }
        Relationship::Less => {
            let t1 = values.iter().copied().rev().find(|v| *v < lo)?;
            between(values, t1 - duration, t1, false, true)
        }
    }
}

/// Indices of the points whose value lies between `lo` and `hi`.
pub(crate) fn between(
    values: &[f64],
    lo: f64,
    hi: f64,
    lo_inclusive: bool,
    hi_inclusive: bool,
) -> Option<Range<usize>> {
    let begin = values.partition_point(|v| if lo_inclusive { *v < lo } else { *v <= lo });
    let end = values.partition_point(|v| if hi_inclusive { *v <= hi } else { *v < hi });
    (begin < end).then_some(begin..end)
}

fn run_of(values: &[f64], value: f64) -> Option<Range<usize>> {
    between(values, value, value, true, true)
}
