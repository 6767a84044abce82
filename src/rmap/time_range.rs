//! Time ranges attached to data tree nodes.
//!
//! A range is either a single start time with a duration that spans all points
//! of the block it describes, or one time per point with a common per-point
//! duration. The time array is shared so that reference-mode writes can borrow
//! another channel's timing without copying it.

use std::sync::Arc;

/// Relative tolerance used when comparing times for contiguity.
pub const TOLERANCE: f64 = 15.0 / 4_503_599_627_370_496.0;

/// Duration sentinel of the server-assigned time-of-day range.
pub const SERVER_TOD_DURATION: f64 = -f64::MAX / 10.0;

/// Start/duration pair or per-point time array.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeRange {
    times: Arc<[f64]>,
    duration: f64,
}

impl TimeRange {
    /// Single start time covering every point.
    pub fn new(start: f64, duration: f64) -> Self {
        Self {
            times: Arc::from(vec![start]),
            duration,
        }
    }

    /// One time per point, each lasting `duration`.
    pub fn from_points(times: Vec<f64>, duration: f64) -> Self {
        Self {
            times: Arc::from(times),
            duration,
        }
    }

    /// Borrow an existing time array.
    pub fn shared(times: Arc<[f64]>, duration: f64) -> Self {
        Self { times, duration }
    }

    /// Placeholder asking the server to stamp the data on arrival.
    pub fn server_tod() -> Self {
        Self::new(0.0, SERVER_TOD_DURATION)
    }

    pub fn is_server_tod(&self) -> bool {
        self.duration == SERVER_TOD_DURATION
    }

    pub fn start(&self) -> f64 {
        self.times.first().copied().unwrap_or(0.0)
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn shared_times(&self) -> Arc<[f64]> {
        Arc::clone(&self.times)
    }

    /// True when the range carries one time per point of a `points` long block.
    pub fn is_per_point(&self, points: usize) -> bool {
        self.times.len() == points && (self.times.len() > 1 || self.duration == 0.0)
    }

    /// Time of point `index` in a block of `points` points.
    pub fn point_time(&self, index: usize, points: usize) -> f64 {
        if self.times.len() == 1 {
            if points == 0 {
                return self.start();
            }
            self.start() + self.duration * index as f64 / points as f64
        } else {
            self.times
                .get(index)
                .copied()
                .unwrap_or_else(|| self.times.last().copied().unwrap_or(0.0))
        }
    }

    /// Times of every point of a `points` long block.
    pub fn copy_times(&self, points: usize) -> Vec<f64> {
        (0..points).map(|i| self.point_time(i, points)).collect()
    }

    /// Duration attributed to each point of a `points` long block.
    pub fn point_duration(&self, points: usize) -> f64 {
        if self.times.len() == 1 && points > 0 {
            self.duration / points as f64
        } else {
            self.duration
        }
    }

    /// End of the covered interval.
    pub fn end(&self) -> f64 {
        if self.times.len() == 1 {
            self.start() + self.duration
        } else {
            self.times.last().copied().unwrap_or(0.0) + self.duration
        }
    }

    /// Try to extend this range, which describes `points` points, with `other`
    /// describing `other_points` further points.
    ///
    /// Succeeds when both are per-point arrays with equal durations, or when
    /// `other` starts where this range ends with the same per-point interval.
    pub fn extend(&mut self, points: usize, other: &TimeRange, other_points: usize) -> bool {
        if self.is_server_tod() || other.is_server_tod() {
            return self.is_server_tod() && other.is_server_tod();
        }

        if self.is_per_point(points) && other.is_per_point(other_points) {
            if !close(self.duration, other.duration) {
                return false;
            }
            let joined: Vec<f64> = self
                .times
                .iter()
                .chain(other.times.iter())
                .copied()
                .collect();
            self.times = Arc::from(joined);
            return true;
        }

        if self.times.len() == 1 && other.times.len() == 1 && points > 0 && other_points > 0 {
            let contiguous = close(other.start(), self.start() + self.duration);
            let same_interval = close(
                self.duration / points as f64,
                other.duration / other_points as f64,
            );
            if contiguous && same_interval {
                self.duration += other.duration;
                return true;
            }
        }

        false
    }
}

fn close(a: f64, b: f64) -> bool {
    a == b || (a - b).abs() <= TOLERANCE * a.abs().max(b.abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_time_spreads_duration() {
        let tr = TimeRange::new(10.0, 1.0);
        assert_eq!(tr.copy_times(4), vec![10.0, 10.25, 10.5, 10.75]);
        assert_eq!(tr.end(), 11.0);
        assert_eq!(tr.point_duration(4), 0.25);
    }

    #[test]
    fn test_extend_contiguous_ranges() {
        let mut tr = TimeRange::new(0.0, 1.0);
        assert!(tr.extend(3, &TimeRange::new(1.0, 1.0), 3));
        assert_eq!(tr.duration(), 2.0);
        assert_eq!(tr.start(), 0.0);
    }

    #[test]
    fn test_extend_rejects_gap_and_rate_change() {
        let mut tr = TimeRange::new(0.0, 1.0);
        assert!(!tr.extend(3, &TimeRange::new(5.0, 1.0), 3));
        assert!(!tr.extend(3, &TimeRange::new(1.0, 1.0), 6));
        assert_eq!(tr.duration(), 1.0);
    }

    #[test]
    fn test_extend_per_point_arrays() {
        let mut tr = TimeRange::new(5.0, 0.0);
        assert!(tr.extend(1, &TimeRange::new(6.0, 0.0), 1));
        assert_eq!(tr.times(), &[5.0, 6.0]);

        let mut arr = TimeRange::from_points(vec![1.0, 2.0], 0.0);
        assert!(!arr.extend(2, &TimeRange::from_points(vec![3.0, 4.0], 0.5), 2));
    }

    #[test]
    fn test_server_tod_only_extends_itself() {
        let mut tod = TimeRange::server_tod();
        assert!(tod.is_server_tod());
        assert!(tod.extend(2, &TimeRange::server_tod(), 2));
        assert!(!tod.extend(2, &TimeRange::new(0.0, 1.0), 2));
    }
}
