//! # Trace Matcher
//!
//! GPS trace map-matching, road attribute fusion and movement analytics.
//!
//! This library provides:
//! - Splitting a raw trace into segments an external map-matcher can process
//! - A Valhalla `trace_attributes` client (feature `http`)
//! - Normalizing and stitching per-segment match results into one global edge index space
//! - Fusing road surface attributes back onto the original GPS samples
//! - Pause-section and surface-run analytics
//!
//! ## Features
//!
//! - **`parallel`** - Match segments concurrently with rayon
//! - **`http`** - Enable the Valhalla HTTP matcher client
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trace_matcher::{match_and_analyze, PipelineConfig, TrackPoint, ValhallaClient, ValhallaConfig};
//!
//! let client = ValhallaClient::new(ValhallaConfig::default())?;
//! let analyzed = match_and_analyze(&trace, &client, &PipelineConfig::default())?;
//!
//! for section in &analyzed.sections {
//!     println!("section {}: {:.0}m at {:.1}km/h", section.pause_section_id,
//!         section.total_distance, section.avg_speed_kph);
//! }
//! ```

use chrono::{DateTime, Utc};
use geo::{Coord, LineString, Point};
use log::info;
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{MatchError, OptionExt, Result};

// Geographic utilities (geodesic distance, projection, time gaps)
pub mod geo_utils;

// Activity stream merging
pub mod streams;
pub use streams::merge_streams;

// Trace segmentation
pub mod segmenter;
pub use segmenter::{segment_trace, Segment};

// Map-matcher boundary: request/response types and the matcher trait
pub mod client;
pub use client::{CostingProfile, MapMatcher, MatchRequest, MatchResponse, ShapeMatch, ShapePoint};

// Valhalla HTTP transport
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::{ValhallaClient, ValhallaConfig};

// Raw response -> strict tables
pub mod normalize;
pub use normalize::{normalize_response, NormalizeStats, NormalizedSegment};

// Per-segment matching and global stitching
pub mod stitch;
pub use stitch::{match_trace, StitchedMatch};

// Edge attribute fusion
pub mod fusion;
pub use fusion::fuse;

// Section and surface analytics
pub mod analytics;
pub use analytics::{analyze, Analytics, SectionSummary, SurfaceSummary, TrackSummary};

// ============================================================================
// Core Types
// ============================================================================

/// One GPS sample of the raw trace.
///
/// `position` is the EPSG:3857 projection of latitude/longitude and is computed on
/// construction; points are never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude in meters, if the device recorded one
    pub altitude: Option<f64>,
    /// Web-mercator position in meters
    pub position: Coord<f64>,
}

impl TrackPoint {
    /// Create a new track point.
    pub fn new(timestamp: DateTime<Utc>, latitude: f64, longitude: f64, altitude: Option<f64>) -> Self {
        Self {
            timestamp,
            latitude,
            longitude,
            altitude,
            position: geo_utils::to_web_mercator(latitude, longitude),
        }
    }

    /// Check if the point has valid coordinates and, when present, a finite altitude.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
            && self.altitude.map_or(true, f64::is_finite)
    }
}

/// Reject a trace containing any invalid point.
///
/// Points are never dropped: matched and fused tables stay aligned 1:1 with the input, so a
/// single bad sample fails the whole trace.
pub fn validate_trace(trace: &[TrackPoint]) -> Result<()> {
    match trace.iter().position(|p| !p.is_valid()) {
        Some(index) => {
            let p = &trace[index];
            Err(MatchError::InvalidPoint {
                index,
                latitude: p.latitude,
                longitude: p.longitude,
                altitude: p.altitude,
            })
        }
        None => Ok(()),
    }
}

/// How the matcher related a trace point to the road network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Matched,
    Interpolated,
    Unmatched,
}

/// Matcher correspondence for one trace point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedPoint {
    /// Snapped web-mercator position, absent when the point was not matched
    pub position: Option<Coord<f64>>,
    /// Index into the edge table (segment-local before stitching, global after)
    pub edge_index: Option<usize>,
    pub kind: MatchKind,
    pub distance_along_edge: Option<f64>,
    pub distance_from_trace_point: Option<f64>,
}

impl MatchedPoint {
    /// A placeholder for a trace point the matcher did not return.
    pub fn unmatched() -> Self {
        Self {
            position: None,
            edge_index: None,
            kind: MatchKind::Unmatched,
            distance_along_edge: None,
            distance_from_trace_point: None,
        }
    }
}

/// Geometry of a road edge, a point when the matched shape collapsed to one coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EdgeGeometry {
    Line(LineString<f64>),
    Point(Point<f64>),
}

/// One road-network edge used by the matcher.
///
/// Every attribute is optional: the matcher only reports what its tiles carry, and
/// `RoadEdge::default()` doubles as the "no attributes" edge for unmatched points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoadEdge {
    pub geometry: Option<EdgeGeometry>,
    /// Edge length in kilometers, as reported by the matcher
    pub length: Option<f64>,
    pub surface: Option<String>,
    #[serde(rename = "use")]
    pub road_use: Option<String>,
    pub travel_mode: Option<String>,
    pub osm_way_id: Option<u64>,
    pub speed: Option<f64>,
    pub road_class: Option<String>,
    pub traversability: Option<String>,
    pub unpaved: Option<bool>,
    pub tunnel: Option<bool>,
    pub bridge: Option<bool>,
    pub roundabout: Option<bool>,
    pub internal_intersection: Option<bool>,
    pub max_upward_grade: Option<f64>,
    pub max_downward_grade: Option<f64>,
    pub mean_elevation: Option<f64>,
    pub sac_scale: Option<i64>,
    pub speed_limit: Option<f64>,
    pub indoor: Option<bool>,
}

/// A trace point enriched with the attributes of the edge it was matched to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedPoint {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub position: Coord<f64>,
    pub surface: Option<String>,
    #[serde(rename = "use")]
    pub road_use: Option<String>,
    pub osm_way_id: Option<u64>,
    pub surface_run_id: usize,
    pub pause_section_id: usize,
    /// Geodesic distance to the next point in meters, 0 for the last point
    pub distance_to_next: f64,
}

// ============================================================================
// Configuration
// ============================================================================

/// Upstream cap on the path length of a single matcher request.
pub const MAX_MATCHER_PATH_DISTANCE: f64 = 20_000.0;

/// Configuration for the matching and analytics pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Time gap in seconds above which a pause (and segment boundary) starts.
    /// 1s splits continuous motion on phone recordings, 10s and more confuses the matcher.
    /// Default: 5.0
    pub pause_threshold_secs: f64,

    /// Maximum accumulated path distance per matcher request in meters.
    /// Default: 10_000.0, must not exceed 20_000.0
    pub max_segment_distance: f64,

    /// Distance under which consecutive points count as stationary in meters.
    /// Default: 0.5
    pub stationary_tolerance: f64,

    /// Send elapsed seconds since segment start with every shape point.
    /// Default: true
    pub send_timestamps: bool,

    /// Costing model and options passed through to the matcher.
    pub profile: CostingProfile,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pause_threshold_secs: 5.0,
            max_segment_distance: 10_000.0,
            stationary_tolerance: 0.5,
            send_timestamps: true,
            profile: CostingProfile::default(),
        }
    }
}

impl PipelineConfig {
    /// Reject settings the pipeline cannot honour.
    pub fn validate(&self) -> Result<()> {
        if !(self.pause_threshold_secs.is_finite() && self.pause_threshold_secs > 0.0) {
            return Err(MatchError::Config {
                message: format!(
                    "pause_threshold_secs must be positive, got {}",
                    self.pause_threshold_secs
                ),
            });
        }
        if !(self.max_segment_distance > 0.0
            && self.max_segment_distance <= MAX_MATCHER_PATH_DISTANCE)
        {
            return Err(MatchError::Config {
                message: format!(
                    "max_segment_distance must be in (0, {}], got {}",
                    MAX_MATCHER_PATH_DISTANCE, self.max_segment_distance
                ),
            });
        }
        if !(self.stationary_tolerance >= 0.0) {
            return Err(MatchError::Config {
                message: format!(
                    "stationary_tolerance must not be negative, got {}",
                    self.stationary_tolerance
                ),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Fused points plus every summary derived from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedTrack {
    pub points: Vec<FusedPoint>,
    pub sections: Vec<SectionSummary>,
    pub surfaces: Vec<SurfaceSummary>,
    pub totals: TrackSummary,
}

impl AnalyzedTrack {
    fn from_points(points: Vec<FusedPoint>, config: &PipelineConfig) -> Self {
        let Analytics {
            sections,
            surfaces,
            totals,
        } = analyze(&points, config);
        Self {
            points,
            sections,
            surfaces,
            totals,
        }
    }
}

/// Match a trace, fuse edge attributes onto its points and compute analytics.
///
/// Returns [`MatchError::NoMatchAvailable`] when no segment matched any edge, so an
/// unmatched track is never reported as all-zero statistics, and with
/// [`MatchError::InvalidPoint`] when any point has non-finite or out-of-range values.
/// Alignment faults abort without a partial result.
pub fn match_and_analyze<M>(
    trace: &[TrackPoint],
    matcher: &M,
    config: &PipelineConfig,
) -> Result<AnalyzedTrack>
where
    M: MapMatcher + ?Sized,
{
    config.validate()?;
    let start = std::time::Instant::now();

    let stitched = match_trace(trace, matcher, config)?;
    let points = fuse(trace, &stitched.matched_points, &stitched.edges, config)?;
    let analyzed = AnalyzedTrack::from_points(points, config);

    info!(
        "[TraceMatcher] Analyzed {} points: {} edges, {} sections, {} surface runs in {:?}",
        analyzed.points.len(),
        stitched.edges.len(),
        analyzed.sections.len(),
        analyzed.surfaces.len(),
        start.elapsed()
    );

    Ok(analyzed)
}

/// Fuse and analyze a trace without calling a matcher.
///
/// Every point resolves to the empty edge; pause sections and distances are still computed.
pub fn analyze_unmatched(trace: &[TrackPoint], config: &PipelineConfig) -> Result<AnalyzedTrack> {
    config.validate()?;
    validate_trace(trace)?;
    let matched = vec![MatchedPoint::unmatched(); trace.len()];
    let points = fuse(trace, &matched, &[], config)?;
    Ok(AnalyzedTrack::from_points(points, config))
}
