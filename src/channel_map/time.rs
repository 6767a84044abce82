//! Time-mode state machine of a channel map.
//!
//! The current mode decides the time range attached to the next write. While
//! only one range has been set for the frame it lives on the base frame and
//! applies to every channel; setting time again after data was written moves
//! the map into time-per-channel mode for the rest of the frame.

use super::ChannelMap;
use crate::error::{Result, TurbineError};
use crate::rmap::TimeRange;
use std::sync::Arc;

const TIME_AUTO_ERROR: &str = "Time mode must be one of \"next\", \"timeofday\" or \"server\"";

/// Source of the time stamp for the next write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeMode {
    /// Explicit start and duration
    Manual,
    /// Explicit per-point times
    Array,
    /// Integer counter advanced once per flush
    Next,
    /// Client wall clock at write time
    TimeOfDay,
    /// Server assigns the time on arrival
    #[default]
    ServerTod,
    /// Times borrowed from a channel of another map
    Reference,
}

#[derive(Debug, Clone)]
pub(crate) struct TimeState {
    pub(crate) mode: TimeMode,
    pub(crate) start: f64,
    pub(crate) duration: f64,
    pub(crate) point_times: Option<Arc<[f64]>>,
    pub(crate) reference: Option<TimeRange>,
    /// True once a time was set since the staged frame was last cleared
    pub(crate) frame_stamped: bool,
}

impl Default for TimeState {
    fn default() -> Self {
        Self {
            mode: TimeMode::ServerTod,
            start: 0.0,
            duration: 1.0,
            point_times: None,
            reference: None,
            frame_stamped: false,
        }
    }
}

/// Seconds since the Unix epoch.
pub(crate) fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

impl ChannelMap {
    /// Current time mode
    pub fn time_mode(&self) -> TimeMode {
        self.time.mode
    }

    /// Stamp subsequent data with `start` and `duration`.
    pub fn put_time(&mut self, start: f64, duration: f64) {
        self.time.mode = TimeMode::Manual;
        self.time.start = start;
        self.time.duration = duration;
        self.on_time_mode_set();
    }

    /// Stamp subsequent data with one time per point.
    pub fn put_times(&mut self, times: &[f64]) -> Result<()> {
        if times.is_empty() {
            return Err(TurbineError::InvalidArgument(
                "put_times requires at least one time".into(),
            ));
        }
        self.time.mode = TimeMode::Array;
        self.time.point_times = Some(Arc::from(times.to_vec()));
        self.on_time_mode_set();
        Ok(())
    }

    /// Borrow the times of channel `index` of `source` for subsequent data.
    pub fn put_time_ref(&mut self, source: &ChannelMap, index: usize) -> Result<()> {
        let reference = source
            .channel(index)?
            .result
            .as_ref()
            .and_then(|r| r.time_reference())
            .ok_or_else(|| {
                TurbineError::InvalidArgument(format!(
                    "Channel {} of the source map carries no times",
                    index
                ))
            })?;
        self.time.mode = TimeMode::Reference;
        self.time.reference = Some(reference);
        self.on_time_mode_set();
        Ok(())
    }

    /// Select automatic stamping: `next`, `timeofday` or `server`.
    pub fn put_time_auto(&mut self, mode: &str) -> Result<()> {
        self.time.mode = match mode.to_ascii_lowercase().as_str() {
            "next" => TimeMode::Next,
            "timeofday" => TimeMode::TimeOfDay,
            "server" => TimeMode::ServerTod,
            _ => return Err(TurbineError::InvalidArgument(TIME_AUTO_ERROR.into())),
        };
        self.on_time_mode_set();
        Ok(())
    }

    fn on_time_mode_set(&mut self) {
        let first_in_frame = !self.time.frame_stamped;
        self.time.frame_stamped = true;

        if !self.time_per_channel && self.channels_put > 0 {
            let root = self.output.root();
            let restamp = first_in_frame && self.time.mode != TimeMode::Reference;
            if restamp {
                // Data written before the frame's first time set takes that
                // time instead of the range left over from the last frame.
                self.output.node_mut(root).time = self.current_range();
            } else {
                self.inherit_times();
            }
        }
        self.set_time_counter += 1;
    }

    /// Push the frame-level range down to every data leaf lacking its own.
    pub(crate) fn inherit_times(&mut self) {
        self.time_per_channel = true;
        let root = self.output.root();
        let Some(tr) = self.output.node_mut(root).time.take() else {
            return;
        };
        for leaf in self.output.leaves(root) {
            let node = self.output.node_mut(leaf);
            if node.block.is_some() && node.time.is_none() {
                node.time = Some(tr.clone());
            }
        }
    }

    /// Range implied by the current mode, without side effects.
    pub(crate) fn current_range(&self) -> Option<TimeRange> {
        match self.time.mode {
            TimeMode::Manual => Some(TimeRange::new(self.time.start, self.time.duration)),
            TimeMode::Array => self
                .time
                .point_times
                .as_ref()
                .map(|t| TimeRange::shared(Arc::clone(t), 0.0)),
            TimeMode::Next => Some(TimeRange::new(self.time.start + 1.0, 0.0)),
            TimeMode::TimeOfDay => Some(TimeRange::new(now_seconds(), 0.0)),
            TimeMode::ServerTod => Some(TimeRange::server_tod()),
            TimeMode::Reference => self.time.reference.clone(),
        }
    }

    /// Range for the next write. In frame-level mode the range is stored on
    /// the base frame and `None` is returned.
    pub(crate) fn frame_time_range(&mut self) -> Result<Option<TimeRange>> {
        if self.time.mode == TimeMode::Reference {
            return Err(TurbineError::InvalidState(
                "Cannot get a reference time range".into(),
            ));
        }
        self.channels_put += 1;
        let tr = self.current_range();
        if self.time_per_channel {
            Ok(tr)
        } else {
            let root = self.output.root();
            self.output.node_mut(root).time = tr;
            Ok(None)
        }
    }

    /// Advance the `next` counter after a flush.
    pub(crate) fn increment_next(&mut self) {
        if self.time.mode == TimeMode::Next {
            self.time.start += 1.0;
        }
    }
}
