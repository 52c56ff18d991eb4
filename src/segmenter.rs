//! Trace segmentation for the map-matcher.
//!
//! A matcher request is bounded by the path length the service accepts, and GPS dropouts or
//! device pauses confuse the matcher when bridged in one request. The segmenter cuts the trace
//! at both:
//!
//! 1. wherever the time gap between consecutive points exceeds the pause threshold, and
//! 2. within each time-delimited run, at the point where the accumulated distance first
//!    exceeds the maximum segment distance; the accumulator restarts at that point.
//!
//! Segments cover every input point exactly once, in order.

use log::debug;

use crate::geo_utils::{is_pause, point_distance, seconds_between};
use crate::{PipelineConfig, TrackPoint};

/// Slack on the distance limit so a run of exactly the limit is not split by rounding noise.
const DISTANCE_TOLERANCE_M: f64 = 1e-3;

/// A contiguous slice of the trace sent to the matcher as one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment<'a> {
    pub segment_id: usize,
    /// Index of the first point in the full trace
    pub start: usize,
    pub points: &'a [TrackPoint],
}

impl<'a> Segment<'a> {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Index one past the last point in the full trace.
    pub fn end(&self) -> usize {
        self.start + self.points.len()
    }

    /// A single point is not a shape, the matcher needs at least two.
    pub fn is_matchable(&self) -> bool {
        self.points.len() > 1
    }

    /// Whole seconds elapsed since the segment's first point, one per point.
    pub fn elapsed_seconds(&self) -> Vec<u64> {
        let Some(first) = self.points.first() else {
            return Vec::new();
        };
        self.points
            .iter()
            .map(|p| seconds_between(&first.timestamp, &p.timestamp).max(0.0).floor() as u64)
            .collect()
    }
}

/// Split a trace into segments the matcher can process.
///
/// Uses `config.pause_threshold_secs` and `config.max_segment_distance`.
pub fn segment_trace<'a>(trace: &'a [TrackPoint], config: &PipelineConfig) -> Vec<Segment<'a>> {
    let mut bounds: Vec<(usize, usize)> = Vec::new();
    let mut segment_start = 0;
    let mut accumulated = 0.0;
    let mut time_splits = 0;
    let mut distance_splits = 0;

    for i in 1..trace.len() {
        let prev = &trace[i - 1];
        let cur = &trace[i];

        if is_pause(prev, cur, config.pause_threshold_secs) {
            bounds.push((segment_start, i));
            segment_start = i;
            accumulated = 0.0;
            time_splits += 1;
            continue;
        }

        accumulated += point_distance(prev, cur);
        if accumulated > config.max_segment_distance + DISTANCE_TOLERANCE_M {
            bounds.push((segment_start, i));
            segment_start = i;
            accumulated = 0.0;
            distance_splits += 1;
        }
    }
    if segment_start < trace.len() {
        bounds.push((segment_start, trace.len()));
    }

    debug!(
        "[Segmenter] {} points -> {} segments ({} time splits, {} distance splits)",
        trace.len(),
        bounds.len(),
        time_splits,
        distance_splits
    );

    bounds
        .into_iter()
        .enumerate()
        .map(|(segment_id, (start, end))| Segment {
            segment_id,
            start,
            points: &trace[start..end],
        })
        .collect()
}
