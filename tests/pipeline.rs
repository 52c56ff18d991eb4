//! End-to-end pipeline tests against a scripted in-memory matcher.
//!
//! Run with: `cargo test --test pipeline`
//! Add `RUST_LOG=debug` and `-- --nocapture` to see per-segment logging.

use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use geo::{Coord, Destination, Geodesic, LineString, Point};
use serde_json::json;
use trace_matcher::client::{RawEdge, RawMatchedPoint};
use trace_matcher::{
    analyze_unmatched, match_and_analyze, merge_streams, MapMatcher, MatchError, MatchRequest,
    MatchResponse, PipelineConfig, TrackPoint,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

/// Points heading due north, one per `(seconds, leg_meters)`; the leg is the distance from the
/// previous point and is ignored for the first one.
fn northbound(steps: &[(i64, f64)]) -> Vec<TrackPoint> {
    let mut current = Point::new(8.54, 47.37);
    steps
        .iter()
        .enumerate()
        .map(|(i, &(secs, leg))| {
            if i > 0 {
                current = Geodesic::destination(current, 0.0, leg);
            }
            TrackPoint::new(
                start_time() + chrono::Duration::seconds(secs),
                current.y(),
                current.x(),
                Some(400.0 + i as f64),
            )
        })
        .collect()
}

fn encode_shape(request: &MatchRequest) -> String {
    let line: LineString<f64> = request
        .shape
        .iter()
        .map(|p| Coord { x: p.lon, y: p.lat })
        .collect();
    polyline::encode_coordinates(line, 6).unwrap()
}

/// A matcher that records every request and answers from a per-segment script.
struct ScriptedMatcher<F> {
    script: F,
    calls: Mutex<Vec<MatchRequest>>,
}

impl<F> ScriptedMatcher<F>
where
    F: Fn(&MatchRequest) -> MatchResponse + Sync,
{
    fn new(script: F) -> Self {
        Self {
            script,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<MatchRequest> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort_by_key(|r| r.segment_id);
        calls
    }
}

impl<F> MapMatcher for ScriptedMatcher<F>
where
    F: Fn(&MatchRequest) -> MatchResponse + Sync,
{
    fn match_segment(&self, request: &MatchRequest) -> MatchResponse {
        self.calls.lock().unwrap().push(request.clone());
        (self.script)(request)
    }
}

/// One edge per segment covering the whole shape, every point matched onto it.
fn single_edge(request: &MatchRequest, surface: &str) -> MatchResponse {
    MatchResponse::Full {
        points: (0..request.point_count())
            .map(|_| RawMatchedPoint {
                edge_index: Some(0),
                kind: Some("matched".to_string()),
                ..RawMatchedPoint::default()
            })
            .collect(),
        edges: vec![RawEdge {
            begin_shape_index: Some(0),
            end_shape_index: Some(request.point_count() - 1),
            length: Some(0.5),
            surface: Some(surface.to_string()),
            road_use: Some("cycleway".to_string()),
            way_id: Some(4_711),
            ..RawEdge::default()
        }],
        shape: Some(encode_shape(request)),
    }
}

#[test]
fn test_six_point_scenario() {
    init_logging();
    // 100m legs, 1s apart, 7s gap before the fifth point
    let trace = northbound(&[
        (0, 0.0),
        (1, 100.0),
        (2, 100.0),
        (3, 100.0),
        (10, 100.0),
        (11, 100.0),
    ]);
    let matcher = ScriptedMatcher::new(|request: &MatchRequest| match request.segment_id {
        0 => single_edge(request, "paved"),
        _ => MatchResponse::NoMatch,
    });

    let analyzed = match_and_analyze(&trace, &matcher, &PipelineConfig::default()).unwrap();

    assert_eq!(analyzed.points.len(), 6);
    assert_eq!(analyzed.sections.len(), 2);
    assert_eq!(analyzed.sections[0].point_count, 4);
    assert_eq!(analyzed.sections[1].point_count, 2);
    assert_eq!(analyzed.sections[1].paused_secs, 7.0);

    for point in &analyzed.points[..4] {
        assert_eq!(point.surface.as_deref(), Some("paved"));
        assert_eq!(point.road_use.as_deref(), Some("cycleway"));
        assert_eq!(point.osm_way_id, Some(4_711));
        assert_eq!(point.surface_run_id, 0);
    }
    for point in &analyzed.points[4..] {
        assert_eq!(point.surface, None);
        assert_eq!(point.road_use, None);
        assert_eq!(point.osm_way_id, None);
        assert_eq!(point.surface_run_id, 1);
        assert_eq!(point.pause_section_id, 1);
    }

    // the paved run ends its section, so the 100m hop across the pause is not counted
    let paved = &analyzed.surfaces[0];
    assert_eq!(paved.surface.as_deref(), Some("paved"));
    assert_eq!(paved.point_count, 4);
    assert!((paved.total_distance - 300.0).abs() < 0.01);

    let totals = &analyzed.totals;
    assert!((totals.moving_distance - 400.0).abs() < 0.01);
    assert_eq!(totals.section_count, 2);
    assert_eq!(totals.surface_run_count, 2);
    assert_eq!(totals.duration_secs, 6);
    assert_eq!(totals.paused_secs, 7.0);
    assert!((totals.total_ascent - 4.0).abs() < 1e-9);

    // only the first segment's request carries the shape of points 1-4
    let calls = matcher.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].point_count(), 4);
    let times: Vec<Option<u64>> = calls[0].shape.iter().map(|p| p.time).collect();
    assert_eq!(times, vec![Some(0), Some(1), Some(2), Some(3)]);
}

#[test]
fn test_request_body_carries_costing() {
    let trace = northbound(&[(0, 0.0), (1, 50.0), (2, 50.0)]);
    let matcher = ScriptedMatcher::new(|request: &MatchRequest| single_edge(request, "asphalt"));
    match_and_analyze(&trace, &matcher, &PipelineConfig::default()).unwrap();

    let body = matcher.calls()[0].body();
    assert_eq!(body["costing"], json!("bicycle"));
    assert_eq!(body["shape_match"], json!("map_snap"));
    assert_eq!(body["costing_options"]["bicycle"]["bicycle_type"], json!("Cross"));
    assert_eq!(body["shape"].as_array().unwrap().len(), 3);
    assert!(body.get("encoded_polyline").is_none());
}

#[test]
fn test_alignment_and_global_edge_indices() {
    init_logging();
    // three segments of 3, 4 and 2 points; segment k returns k + 1 edges
    let trace = northbound(&[
        (0, 0.0),
        (1, 20.0),
        (2, 20.0),
        (30, 20.0),
        (31, 20.0),
        (32, 20.0),
        (33, 20.0),
        (60, 20.0),
        (61, 20.0),
    ]);
    let matcher = ScriptedMatcher::new(|request: &MatchRequest| {
        let edge_count = request.segment_id + 1;
        MatchResponse::Full {
            points: (0..request.point_count())
                .map(|i| RawMatchedPoint {
                    edge_index: Some((i % edge_count) as u64),
                    kind: Some("matched".to_string()),
                    ..RawMatchedPoint::default()
                })
                .collect(),
            edges: (0..edge_count)
                .map(|e| RawEdge {
                    begin_shape_index: Some(0),
                    end_shape_index: Some(1),
                    surface: Some(format!("s{}", request.segment_id)),
                    way_id: Some((request.segment_id * 100 + e) as u64),
                    ..RawEdge::default()
                })
                .collect(),
            shape: Some(encode_shape(request)),
        }
    });

    let analyzed = match_and_analyze(&trace, &matcher, &PipelineConfig::default()).unwrap();
    assert_eq!(analyzed.points.len(), trace.len());

    let segment_of = |i: usize| match i {
        0..=2 => 0,
        3..=6 => 1,
        _ => 2,
    };
    for (i, (fused, original)) in analyzed.points.iter().zip(&trace).enumerate() {
        assert_eq!(fused.timestamp, original.timestamp);
        assert_eq!(fused.latitude, original.latitude);
        let segment = segment_of(i);
        assert_eq!(fused.surface, Some(format!("s{}", segment)));
        let way = fused.osm_way_id.unwrap() as usize;
        assert!(way >= segment * 100 && way < segment * 100 + segment + 1);
    }
}

#[test]
fn test_rerun_is_identical() {
    let trace = northbound(&[(0, 0.0), (1, 30.0), (2, 30.0), (20, 30.0), (21, 30.0)]);
    let script = |request: &MatchRequest| single_edge(request, "gravel");

    let first = match_and_analyze(&trace, &script, &PipelineConfig::default()).unwrap();
    let second = match_and_analyze(&trace, &script, &PipelineConfig::default()).unwrap();

    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn test_nothing_matched_is_an_error() {
    let trace = northbound(&[(0, 0.0), (1, 30.0), (2, 30.0), (20, 30.0), (21, 30.0)]);
    let matcher = ScriptedMatcher::new(|_: &MatchRequest| MatchResponse::NoMatch);
    let err = match_and_analyze(&trace, &matcher, &PipelineConfig::default()).unwrap_err();
    assert_eq!(err, MatchError::NoMatchAvailable { segment_count: 2 });
    assert_eq!(matcher.calls().len(), 2);
}

#[test]
fn test_short_response_aborts_pipeline() {
    let trace = northbound(&[(0, 0.0), (1, 30.0), (2, 30.0)]);
    let matcher = |request: &MatchRequest| {
        let mut response = single_edge(request, "paved");
        if let MatchResponse::Full { points, .. } = &mut response {
            points.truncate(1);
        }
        response
    };
    let err = match_and_analyze(&trace, &matcher, &PipelineConfig::default()).unwrap_err();
    assert!(err.is_alignment_fault());
}

#[test]
fn test_response_decoded_from_json() {
    let trace = northbound(&[(0, 0.0), (1, 40.0), (2, 40.0), (3, 40.0)]);
    let matcher = |request: &MatchRequest| {
        let body = json!({
            "shape": encode_shape(request),
            "matched_points": [
                {"lat": 47.37, "lon": 8.54, "type": "matched", "edge_index": 0},
                {"lat": 47.37, "lon": 8.54, "type": "interpolated"},
                {"lat": 47.37, "lon": 8.54, "type": "matched", "edge_index": 999999},
                {"lat": 47.37, "lon": 8.54, "type": "matched"}
            ],
            "edges": [
                {"begin_shape_index": 0, "end_shape_index": 1, "surface": "paved_smooth", "way_id": 1},
                {"begin_shape_index": 1, "end_shape_index": 3, "surface": "compacted", "way_id": 2}
            ]
        });
        MatchResponse::from_json(body.to_string().as_bytes()).unwrap()
    };

    let analyzed = match_and_analyze(&trace, &matcher, &PipelineConfig::default()).unwrap();
    let surfaces: Vec<Option<&str>> = analyzed.points.iter().map(|p| p.surface.as_deref()).collect();
    // interior null stays null, the outlier takes the previous (null) index, the last point
    // falls back to the last edge
    assert_eq!(
        surfaces,
        vec![Some("paved_smooth"), None, None, Some("compacted")]
    );
}

#[test]
fn test_streams_to_unmatched_analytics() {
    let latlng = vec![[47.37, 8.54], [47.3701, 8.54], [47.3702, 8.54], [47.3702, 8.54]];
    let altitude = vec![400.0, 401.0, 399.5, 399.5];
    let time = vec![0, 1, 2, 9];
    let trace = merge_streams(
        start_time(),
        Some(&latlng[..]),
        Some(&altitude[..]),
        Some(&time[..]),
    )
    .unwrap();

    let analyzed = analyze_unmatched(&trace, &PipelineConfig::default()).unwrap();
    assert_eq!(analyzed.sections.len(), 2);
    assert_eq!(analyzed.surfaces.len(), 1);
    assert!(analyzed.points.iter().all(|p| p.surface.is_none()));
    assert!((analyzed.totals.total_ascent - 1.0).abs() < 1e-9);
    assert!((analyzed.totals.total_descent + 1.5).abs() < 1e-9);
    assert_eq!(analyzed.totals.stationary_secs, 1);
    assert!(analyzed.totals.distance_by_surface.contains_key("unknown"));
}

#[test]
fn test_invalid_config_is_rejected_before_matching() {
    let trace = northbound(&[(0, 0.0), (1, 30.0)]);
    let matcher = ScriptedMatcher::new(|request: &MatchRequest| single_edge(request, "paved"));
    let config = PipelineConfig {
        max_segment_distance: 50_000.0,
        ..PipelineConfig::default()
    };
    assert!(matches!(
        match_and_analyze(&trace, &matcher, &config),
        Err(MatchError::Config { .. })
    ));
    assert!(matcher.calls().is_empty());
}
