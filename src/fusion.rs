//! Fuse matched road attributes back onto the original trace points.

use log::debug;

use crate::error::{MatchError, OptionExt, Result};
use crate::geo_utils::{distances_to_next, is_pause};
use crate::{FusedPoint, MatchedPoint, PipelineConfig, RoadEdge, TrackPoint};

/// Resolve every trace point's edge and assign surface runs and pause sections.
///
/// `matched` must have one entry per trace point and every `edge_index` must point into
/// `edges`; anything else is a [`MatchError::FusionFault`]. Points without an edge get the
/// attributes of [`RoadEdge::default()`], i.e. all null.
pub fn fuse(
    trace: &[TrackPoint],
    matched: &[MatchedPoint],
    edges: &[RoadEdge],
    config: &PipelineConfig,
) -> Result<Vec<FusedPoint>> {
    if trace.len() != matched.len() {
        return Err(MatchError::FusionFault {
            point_index: trace.len().min(matched.len()),
            message: format!(
                "{} matched points for {} trace points",
                matched.len(),
                trace.len()
            ),
        });
    }

    let no_edge = RoadEdge::default();
    let distances = distances_to_next(trace);
    let mut fused: Vec<FusedPoint> = Vec::with_capacity(trace.len());

    for (i, (point, matched_point)) in trace.iter().zip(matched).enumerate() {
        let edge = match matched_point.edge_index {
            Some(idx) => edges
                .get(idx)
                .ok_or_fusion_fault(i, "edge index past the end of the edge table")?,
            None => &no_edge,
        };

        let (surface_run_id, pause_section_id) = match (fused.last(), i.checked_sub(1)) {
            (Some(prev_fused), Some(prev_idx)) => (
                if prev_fused.surface == edge.surface {
                    prev_fused.surface_run_id
                } else {
                    prev_fused.surface_run_id + 1
                },
                if is_pause(&trace[prev_idx], point, config.pause_threshold_secs) {
                    prev_fused.pause_section_id + 1
                } else {
                    prev_fused.pause_section_id
                },
            ),
            _ => (0, 0),
        };

        fused.push(FusedPoint {
            timestamp: point.timestamp,
            latitude: point.latitude,
            longitude: point.longitude,
            altitude: point.altitude,
            position: point.position,
            surface: edge.surface.clone(),
            road_use: edge.road_use.clone(),
            osm_way_id: edge.osm_way_id,
            surface_run_id,
            pause_section_id,
            distance_to_next: distances[i],
        });
    }

    debug!(
        "[Fusion] {} points: {} surface runs, {} pause sections",
        fused.len(),
        fused.last().map_or(0, |p| p.surface_run_id + 1),
        fused.last().map_or(0, |p| p.pause_section_id + 1)
    );

    Ok(fused)
}
