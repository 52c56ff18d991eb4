//! Map-matcher boundary: request building, the matcher trait and response decoding.
//!
//! The external matcher speaks Valhalla's `trace_attributes` JSON. Requests are built from a
//! [`Segment`] and a [`CostingProfile`]; responses are decoded exactly once, here, into the
//! tagged [`MatchResponse`]. Everything downstream works on that type, never on raw JSON.
//!
//! A [`MapMatcher`] never fails: transport errors, error statuses and undecodable bodies all
//! come back as [`MatchResponse::NoMatch`].

use log::debug;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{MatchError, Result};
use crate::segmenter::Segment;

// ============================================================================
// Request
// ============================================================================

/// How the matcher should relate the shape to the road network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeMatch {
    /// Hidden-markov map matching, tolerant of noisy input
    MapSnap,
    /// Try edge walking first, fall back to map snapping
    WalkOrSnap,
    /// Shape is assumed to follow edges exactly
    EdgeWalk,
}

/// Costing model and options sent with every request.
///
/// Options are passed through to the matcher untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostingProfile {
    /// Costing model name, e.g. "bicycle" or "pedestrian"
    pub costing: String,
    pub shape_match: ShapeMatch,
    pub costing_options: Map<String, Value>,
}

impl Default for CostingProfile {
    /// Cyclocross bicycle costing that may use oneways against traffic and does not avoid
    /// bad surfaces.
    fn default() -> Self {
        let options = json!({
            "ignore_access": true,
            "maneuver_penalty": 5,
            "bicycle_type": "Cross",
            "cycling_speed": 20,
            "use_hills": 0.5,
            "use_living_streets": 0.5,
            "avoid_bad_surfaces": 0,
            "shortest": false
        });
        Self {
            costing: "bicycle".to_string(),
            shape_match: ShapeMatch::MapSnap,
            costing_options: match options {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        }
    }
}

/// One location of the request shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShapePoint {
    pub lon: f64,
    pub lat: f64,
    /// Seconds elapsed since the first shape point
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
}

/// A single `trace_attributes` request.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRequest {
    pub segment_id: usize,
    pub shape: Vec<ShapePoint>,
    pub encoded_polyline: Option<String>,
    pub profile: CostingProfile,
}

impl MatchRequest {
    /// Build the request for one segment.
    pub fn from_segment(segment: &Segment<'_>, profile: &CostingProfile, send_timestamps: bool) -> Self {
        let times: Vec<Option<u64>> = if send_timestamps {
            segment.elapsed_seconds().into_iter().map(Some).collect()
        } else {
            vec![None; segment.len()]
        };
        let shape = segment
            .points
            .iter()
            .zip(times)
            .map(|(p, time)| ShapePoint {
                lon: p.longitude,
                lat: p.latitude,
                time,
            })
            .collect();

        Self {
            segment_id: segment.segment_id,
            shape,
            encoded_polyline: None,
            profile: profile.clone(),
        }
    }

    /// Number of input locations the response must align with.
    pub fn point_count(&self) -> usize {
        self.shape.len()
    }

    /// The matcher takes either explicit locations or an encoded polyline, never both.
    pub fn validate(&self) -> Result<()> {
        match (self.shape.is_empty(), &self.encoded_polyline) {
            (false, Some(_)) => Err(MatchError::InvalidRequest {
                message: format!(
                    "segment {} supplies both shape locations and an encoded polyline",
                    self.segment_id
                ),
            }),
            (true, None) => Err(MatchError::InvalidRequest {
                message: format!("segment {} has no locations", self.segment_id),
            }),
            _ => Ok(()),
        }
    }

    /// True when the shape has too few points to be matched.
    pub fn is_too_short(&self) -> bool {
        self.encoded_polyline.is_none() && self.shape.len() <= 1
    }

    /// JSON body for the `trace_attributes` endpoint.
    pub fn body(&self) -> Value {
        let mut costing_options = Map::new();
        costing_options.insert(
            self.profile.costing.clone(),
            Value::Object(self.profile.costing_options.clone()),
        );

        let mut body = Map::new();
        body.insert("costing".to_string(), json!(self.profile.costing));
        body.insert("shape_match".to_string(), json!(self.profile.shape_match));
        body.insert("costing_options".to_string(), Value::Object(costing_options));
        match &self.encoded_polyline {
            Some(encoded) => {
                body.insert("encoded_polyline".to_string(), json!(encoded));
            }
            None => {
                body.insert("shape".to_string(), json!(self.shape));
            }
        }
        Value::Object(body)
    }
}

// ============================================================================
// Matcher
// ============================================================================

/// An external map-matching service.
///
/// Implementations block until the response is available and must not panic or fail on
/// error responses; anything unusable is [`MatchResponse::NoMatch`].
pub trait MapMatcher: Sync {
    fn match_segment(&self, request: &MatchRequest) -> MatchResponse;
}

impl<F> MapMatcher for F
where
    F: Fn(&MatchRequest) -> MatchResponse + Sync,
{
    fn match_segment(&self, request: &MatchRequest) -> MatchResponse {
        self(request)
    }
}

// ============================================================================
// Response
// ============================================================================

/// Decoded matcher response.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResponse {
    /// No matched points at all
    NoMatch,
    /// Matched points but no edges to attach them to
    Partial { points: Vec<RawMatchedPoint> },
    /// Matched points, their edges and the encoded shape the edges index into
    Full {
        points: Vec<RawMatchedPoint>,
        edges: Vec<RawEdge>,
        shape: Option<String>,
    },
}

impl MatchResponse {
    /// Classify a deserialized response body.
    pub fn from_raw(raw: TraceAttributesResponse) -> Self {
        let points = raw.matched_points.unwrap_or_default();
        let edges = raw.edges.unwrap_or_default();

        if points.is_empty() {
            if !edges.is_empty() {
                debug!(
                    "[MatchResponse] Dropping {} edges from a response without matched points",
                    edges.len()
                );
            }
            return MatchResponse::NoMatch;
        }
        if edges.is_empty() {
            return MatchResponse::Partial { points };
        }
        MatchResponse::Full {
            points,
            edges,
            shape: raw.shape,
        }
    }

    /// Decode a response body.
    pub fn from_json(bytes: &[u8]) -> std::result::Result<Self, serde_json::Error> {
        let raw: TraceAttributesResponse = serde_json::from_slice(bytes)?;
        Ok(Self::from_raw(raw))
    }

    pub fn is_no_match(&self) -> bool {
        matches!(self, MatchResponse::NoMatch)
    }

    pub fn edge_count(&self) -> usize {
        match self {
            MatchResponse::Full { edges, .. } => edges.len(),
            _ => 0,
        }
    }
}

/// `trace_attributes` response body, only the fields the pipeline reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraceAttributesResponse {
    #[serde(default)]
    pub matched_points: Option<Vec<RawMatchedPoint>>,
    #[serde(default)]
    pub edges: Option<Vec<RawEdge>>,
    #[serde(default)]
    pub shape: Option<String>,
}

/// Matched point as reported by the matcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawMatchedPoint {
    pub lon: Option<f64>,
    pub lat: Option<f64>,
    /// Segment-local edge index; occasionally an out-of-range sentinel
    pub edge_index: Option<u64>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub distance_along_edge: Option<f64>,
    pub distance_from_trace_point: Option<f64>,
}

/// Edge descriptor as reported by the matcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawEdge {
    pub begin_shape_index: Option<usize>,
    pub end_shape_index: Option<usize>,
    #[serde(deserialize_with = "lenient_f64")]
    pub length: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub speed: Option<f64>,
    pub road_class: Option<String>,
    pub traversability: Option<String>,
    #[serde(rename = "use")]
    pub road_use: Option<String>,
    pub unpaved: Option<bool>,
    pub tunnel: Option<bool>,
    pub bridge: Option<bool>,
    pub roundabout: Option<bool>,
    pub internal_intersection: Option<bool>,
    pub surface: Option<String>,
    pub travel_mode: Option<String>,
    pub way_id: Option<u64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub max_upward_grade: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub max_downward_grade: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub mean_elevation: Option<f64>,
    pub sac_scale: Option<i64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub speed_limit: Option<f64>,
    pub indoor: Option<bool>,
}

/// Error body returned by the matcher on a failed request.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamError {
    pub error_code: Option<i64>,
    pub error: Option<String>,
    pub status_code: Option<u16>,
}

/// Numeric attribute that the matcher may also report as a string (e.g. "unlimited").
fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_f64()))
}
