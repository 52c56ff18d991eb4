//! Per-segment matching and global stitching.
//!
//! Each segment is matched on its own, so its edge indices start at 0. Stitching shifts them
//! into one global index space by carrying an offset, the number of edges emitted by all
//! earlier segments, through an ordered fold. With the `parallel` feature segments are matched
//! concurrently first and folded in trace order afterwards; both paths produce identical
//! tables.

use log::{debug, info};
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::client::{MapMatcher, MatchRequest, MatchResponse};
use crate::error::{MatchError, Result};
use crate::normalize::{normalize_response, NormalizeStats, NormalizedSegment};
use crate::segmenter::{segment_trace, Segment};
use crate::{validate_trace, MatchedPoint, PipelineConfig, RoadEdge, TrackPoint};

/// Global matched-point and edge tables for a whole trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StitchedMatch {
    /// One entry per trace point, in trace order
    pub matched_points: Vec<MatchedPoint>,
    /// All edges of all segments; `edge_index` values point into this table
    pub edges: Vec<RoadEdge>,
    pub segment_count: usize,
    /// Segments that contributed at least one edge
    pub matched_segments: usize,
    pub stats: NormalizeStats,
}

impl StitchedMatch {
    fn with_capacity(points: usize, segment_count: usize) -> Self {
        Self {
            matched_points: Vec::with_capacity(points),
            edges: Vec::new(),
            segment_count,
            matched_segments: 0,
            stats: NormalizeStats::default(),
        }
    }
}

/// Segment, match, normalize and stitch a whole trace.
///
/// Fails with [`MatchError::InvalidPoint`] before any matcher call when a point has bad
/// coordinates, with [`MatchError::NoMatchAvailable`] when no segment produced an edge and with
/// [`MatchError::AlignmentFault`] when a segment's tables do not line up with its points.
pub fn match_trace<M>(trace: &[TrackPoint], matcher: &M, config: &PipelineConfig) -> Result<StitchedMatch>
where
    M: MapMatcher + ?Sized,
{
    if trace.is_empty() {
        return Err(MatchError::EmptyTrace);
    }
    validate_trace(trace)?;

    let start = std::time::Instant::now();
    let segments = segment_trace(trace, config);
    let mut stitched = StitchedMatch::with_capacity(trace.len(), segments.len());

    #[cfg(feature = "parallel")]
    {
        let normalized: Vec<NormalizedSegment> = segments
            .par_iter()
            .map(|segment| match_one(segment, matcher, config))
            .collect::<Result<Vec<_>>>()?;

        segments
            .iter()
            .zip(normalized)
            .try_fold(0usize, |offset, (segment, local)| {
                stitch_segment(offset, segment, local, &mut stitched)
            })?;
    }

    #[cfg(not(feature = "parallel"))]
    {
        segments.iter().try_fold(0usize, |offset, segment| {
            let local = match_one(segment, matcher, config)?;
            stitch_segment(offset, segment, local, &mut stitched)
        })?;
    }

    if stitched.edges.is_empty() {
        info!(
            "[Stitch] No edges in any of {} segments ({} points)",
            segments.len(),
            trace.len()
        );
        return Err(MatchError::NoMatchAvailable {
            segment_count: segments.len(),
        });
    }

    info!(
        "[Stitch] {} points, {}/{} segments matched, {} edges in {:?} \
         ({} out-of-range indices, {} endpoint fills, {} synthesized points)",
        trace.len(),
        stitched.matched_segments,
        stitched.segment_count,
        stitched.edges.len(),
        start.elapsed(),
        stitched.stats.out_of_range_indices,
        stitched.stats.endpoint_fills,
        stitched.stats.synthesized_points
    );

    Ok(stitched)
}

/// Match one segment, or take the no-match path when it is too short to be a shape.
fn match_one<M>(segment: &Segment<'_>, matcher: &M, config: &PipelineConfig) -> Result<NormalizedSegment>
where
    M: MapMatcher + ?Sized,
{
    if !segment.is_matchable() {
        debug!(
            "[Stitch] Segment {} has {} point(s), not matchable",
            segment.segment_id,
            segment.len()
        );
        return Ok(normalize_response(
            MatchResponse::NoMatch,
            segment.len(),
            segment.segment_id,
        ));
    }

    let request = MatchRequest::from_segment(segment, &config.profile, config.send_timestamps);
    request.validate()?;
    let response = matcher.match_segment(&request);
    debug!(
        "[Stitch] Segment {} ({} points from index {}): {} edges",
        segment.segment_id,
        segment.len(),
        segment.start,
        response.edge_count()
    );
    Ok(normalize_response(response, segment.len(), segment.segment_id))
}

/// Append a segment's local tables at `offset`, returning the offset for the next segment.
fn stitch_segment(
    offset: usize,
    segment: &Segment<'_>,
    local: NormalizedSegment,
    out: &mut StitchedMatch,
) -> Result<usize> {
    if local.matched_points.len() != segment.len() {
        return Err(MatchError::alignment(
            segment.segment_id,
            format!(
                "{} matched points for {} trace points",
                local.matched_points.len(),
                segment.len()
            ),
        ));
    }

    let edge_count = local.edges.len();
    for mut point in local.matched_points {
        if let Some(idx) = point.edge_index {
            if idx >= edge_count {
                return Err(MatchError::alignment(
                    segment.segment_id,
                    format!("edge index {} with {} local edges", idx, edge_count),
                ));
            }
            point.edge_index = Some(idx + offset);
        }
        out.matched_points.push(point);
    }

    if edge_count > 0 {
        out.matched_segments += 1;
    }
    out.edges.extend(local.edges);
    out.stats.merge(&local.stats);

    Ok(offset + edge_count)
}
