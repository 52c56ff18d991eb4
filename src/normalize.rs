//! Normalize one matcher response into segment-local tables.
//!
//! Produces one [`MatchedPoint`] per reported point and one [`RoadEdge`] per edge descriptor.
//! Edge geometry is cut out of the response's polyline6 shape; edge indices the matcher got
//! wrong are repaired:
//!
//! - an index at or past the edge count takes the previous point's index (0 for the first point)
//! - a missing index on the first/last point becomes the first/last edge
//! - without edges every index is null
//!
//! A response without matched points becomes one unmatched point per input location, so the
//! segment keeps its length.

use geo::{Coord, LineString, Point};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::client::{MatchResponse, RawEdge, RawMatchedPoint};
use crate::geo_utils::to_web_mercator;
use crate::{EdgeGeometry, MatchKind, MatchedPoint, RoadEdge};

/// Precision of the matcher's encoded shape.
const SHAPE_PRECISION: u32 = 6;

/// Data-quality counters for one normalized response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeStats {
    /// Edge indices at or past the edge count that were replaced
    pub out_of_range_indices: usize,
    /// Missing first/last edge indices filled in
    pub endpoint_fills: usize,
    /// Unmatched points synthesized for a response without matched points
    pub synthesized_points: usize,
    /// Edges whose shape slice could not be resolved
    pub missing_geometries: usize,
}

impl NormalizeStats {
    pub fn merge(&mut self, other: &NormalizeStats) {
        self.out_of_range_indices += other.out_of_range_indices;
        self.endpoint_fills += other.endpoint_fills;
        self.synthesized_points += other.synthesized_points;
        self.missing_geometries += other.missing_geometries;
    }

    pub fn has_repairs(&self) -> bool {
        self.out_of_range_indices > 0 || self.endpoint_fills > 0
    }
}

/// Segment-local matched points and edges.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSegment {
    pub matched_points: Vec<MatchedPoint>,
    pub edges: Vec<RoadEdge>,
    pub stats: NormalizeStats,
}

/// Convert a decoded response for a segment of `point_count` locations.
pub fn normalize_response(
    response: MatchResponse,
    point_count: usize,
    segment_id: usize,
) -> NormalizedSegment {
    match response {
        MatchResponse::NoMatch => {
            debug!(
                "[Normalize {}] No match, synthesizing {} unmatched points",
                segment_id, point_count
            );
            NormalizedSegment {
                matched_points: vec![MatchedPoint::unmatched(); point_count],
                edges: Vec::new(),
                stats: NormalizeStats {
                    synthesized_points: point_count,
                    ..NormalizeStats::default()
                },
            }
        }
        MatchResponse::Partial { points } => {
            let mut stats = NormalizeStats::default();
            let matched_points = load_points(&points, 0, &mut stats);
            NormalizedSegment {
                matched_points,
                edges: Vec::new(),
                stats,
            }
        }
        MatchResponse::Full {
            points,
            edges,
            shape,
        } => {
            let mut stats = NormalizeStats::default();
            let shape = decode_shape(shape.as_deref(), segment_id);
            let edges = load_edges(&edges, &shape, &mut stats);
            let matched_points = load_points(&points, edges.len(), &mut stats);

            if stats.has_repairs() {
                warn!(
                    "[Normalize {}] Repaired edge indices: {} out of range, {} endpoints filled",
                    segment_id, stats.out_of_range_indices, stats.endpoint_fills
                );
            }
            NormalizedSegment {
                matched_points,
                edges,
                stats,
            }
        }
    }
}

/// Decode the polyline6 shape into (lon, lat) coordinates.
fn decode_shape(shape: Option<&str>, segment_id: usize) -> Vec<Coord<f64>> {
    let Some(encoded) = shape else {
        warn!("[Normalize {}] Response has edges but no shape", segment_id);
        return Vec::new();
    };
    match polyline::decode_polyline(encoded, SHAPE_PRECISION) {
        Ok(line) => line.0,
        Err(e) => {
            warn!("[Normalize {}] Failed to decode shape: {}", segment_id, e);
            Vec::new()
        }
    }
}

/// Repair and convert matched points. `edge_count` is the number of local edges.
fn load_points(
    points: &[RawMatchedPoint],
    edge_count: usize,
    stats: &mut NormalizeStats,
) -> Vec<MatchedPoint> {
    let last = points.len().saturating_sub(1);
    let mut previous: Option<usize> = None;

    points
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let edge_index = if edge_count == 0 {
                None
            } else {
                match raw.edge_index {
                    Some(reported) => match usize::try_from(reported) {
                        Ok(idx) if idx < edge_count => Some(idx),
                        _ => {
                            stats.out_of_range_indices += 1;
                            if i > 0 {
                                previous
                            } else {
                                Some(0)
                            }
                        }
                    },
                    None if i == last => {
                        stats.endpoint_fills += 1;
                        Some(edge_count - 1)
                    }
                    None if i == 0 => {
                        stats.endpoint_fills += 1;
                        Some(0)
                    }
                    None => None,
                }
            };
            previous = edge_index;

            MatchedPoint {
                position: match (raw.lat, raw.lon) {
                    (Some(lat), Some(lon)) => Some(to_web_mercator(lat, lon)),
                    _ => None,
                },
                edge_index,
                kind: match raw.kind.as_deref() {
                    Some("matched") => MatchKind::Matched,
                    Some("interpolated") => MatchKind::Interpolated,
                    _ => MatchKind::Unmatched,
                },
                distance_along_edge: raw.distance_along_edge,
                distance_from_trace_point: raw.distance_from_trace_point,
            }
        })
        .collect()
}

fn load_edges(edges: &[RawEdge], shape: &[Coord<f64>], stats: &mut NormalizeStats) -> Vec<RoadEdge> {
    edges
        .iter()
        .map(|raw| {
            let geometry = edge_geometry(raw, shape);
            if geometry.is_none() {
                stats.missing_geometries += 1;
            }
            RoadEdge {
                geometry,
                length: raw.length,
                surface: raw.surface.clone(),
                road_use: raw.road_use.clone(),
                travel_mode: raw.travel_mode.clone(),
                osm_way_id: raw.way_id,
                speed: raw.speed,
                road_class: raw.road_class.clone(),
                traversability: raw.traversability.clone(),
                unpaved: raw.unpaved,
                tunnel: raw.tunnel,
                bridge: raw.bridge,
                roundabout: raw.roundabout,
                internal_intersection: raw.internal_intersection,
                max_upward_grade: raw.max_upward_grade,
                max_downward_grade: raw.max_downward_grade,
                mean_elevation: raw.mean_elevation,
                sac_scale: raw.sac_scale,
                speed_limit: raw.speed_limit,
                indoor: raw.indoor,
            }
        })
        .collect()
}

/// Projected shape slice `[begin ..= end]`, a point when it collapses to one coordinate.
fn edge_geometry(raw: &RawEdge, shape: &[Coord<f64>]) -> Option<EdgeGeometry> {
    let begin = raw.begin_shape_index?;
    let end = raw.end_shape_index?.min(shape.len().checked_sub(1)?);
    if begin > end {
        return None;
    }

    let mut coords: Vec<Coord<f64>> = shape[begin..=end]
        .iter()
        .map(|c| to_web_mercator(c.y, c.x))
        .collect();

    if coords.len() == 1 {
        return coords.pop().map(|c| EdgeGeometry::Point(Point::from(c)));
    }
    Some(EdgeGeometry::Line(LineString::new(coords)))
}
