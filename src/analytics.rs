//! Pause-section, surface-run and whole-track analytics over fused points.
//!
//! Everything here is derived from a `&[FusedPoint]` and recomputed from scratch on every call.
//! Distances are in meters, times in seconds. Altitude deltas are only taken between two points
//! that both carry an altitude.

use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::geo_utils::seconds_between;
use crate::{FusedPoint, PipelineConfig};

/// Key used in [`TrackSummary::distance_by_surface`] for points without a surface.
pub const UNKNOWN_SURFACE: &str = "unknown";

/// Statistics for one pause section.
///
/// Values are unrounded; round at the presentation layer (two decimals) to compare with
/// historical summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSummary {
    pub pause_section_id: usize,
    pub start_index: usize,
    pub point_count: usize,
    /// Gap between the previous section's last point and this section's first point
    pub paused_secs: f64,
    pub ascent: f64,
    /// Sum of negative altitude deltas, so never positive
    pub descent: f64,
    pub total_distance: f64,
    /// `total_distance / point_count`, converted to km/h
    pub avg_speed_kph: f64,
    /// Distance from the section's last point to the next section's first point
    pub distance_between_stops: f64,
    pub elapsed_secs: f64,
}

/// Statistics for one run of equal surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceSummary {
    pub surface_run_id: usize,
    pub surface: Option<String>,
    pub start_index: usize,
    pub point_count: usize,
    pub ascent: f64,
    pub descent: f64,
    /// Excludes every hop across a pause, including pauses inside the run
    pub total_distance: f64,
}

/// Whole-track totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackSummary {
    /// Section distances without the hops across pauses
    pub moving_distance: f64,
    pub total_ascent: f64,
    pub total_descent: f64,
    pub paused_secs: f64,
    /// One sample per second is assumed, so this is the point count
    pub duration_secs: usize,
    pub stationary_secs: usize,
    pub section_count: usize,
    pub surface_run_count: usize,
    pub distance_by_surface: BTreeMap<String, f64>,
}

/// All summaries for one track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analytics {
    pub sections: Vec<SectionSummary>,
    pub surfaces: Vec<SurfaceSummary>,
    pub totals: TrackSummary,
}

/// Compute section, surface-run and track summaries.
pub fn analyze(points: &[FusedPoint], config: &PipelineConfig) -> Analytics {
    let sections = section_summaries(points);
    let surfaces = surface_summaries(points);
    let totals = track_summary(points, &sections, &surfaces, config);

    debug!(
        "[Analytics] {} points: {} sections, {} surface runs, {:.0}m moving, {:.0}s paused",
        points.len(),
        sections.len(),
        surfaces.len(),
        totals.moving_distance,
        totals.paused_secs
    );

    Analytics {
        sections,
        surfaces,
        totals,
    }
}

/// Split `points` into maximal runs sharing the same key, as `(start_index, run)`.
fn runs_by<K, F>(points: &[FusedPoint], key: F) -> Vec<(usize, &[FusedPoint])>
where
    K: PartialEq,
    F: Fn(&FusedPoint) -> K,
{
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=points.len() {
        if i == points.len() || key(&points[i]) != key(&points[i - 1]) {
            runs.push((start, &points[start..i]));
            start = i;
        }
    }
    runs
}

/// (ascent, descent) over consecutive altitude deltas.
fn climb(points: &[FusedPoint]) -> (f64, f64) {
    points
        .windows(2)
        .filter_map(|w| Some(w[1].altitude? - w[0].altitude?))
        .fold((0.0, 0.0), |(up, down), delta| {
            if delta >= 0.0 {
                (up + delta, down)
            } else {
                (up, down + delta)
            }
        })
}

fn section_summaries(points: &[FusedPoint]) -> Vec<SectionSummary> {
    let mut previous_end = None;

    runs_by(points, |p| p.pause_section_id)
        .into_iter()
        .filter_map(|(start_index, run)| {
            let (first, last) = (run.first()?, run.last()?);
            let (ascent, descent) = climb(run);
            let total_distance: f64 = run.iter().map(|p| p.distance_to_next).sum();
            let paused_secs = previous_end
                .map_or(0.0, |end| seconds_between(end, &first.timestamp));
            previous_end = Some(&last.timestamp);

            Some(SectionSummary {
                pause_section_id: first.pause_section_id,
                start_index,
                point_count: run.len(),
                paused_secs,
                ascent,
                descent,
                total_distance,
                avg_speed_kph: total_distance / run.len() as f64 * 3.6,
                distance_between_stops: last.distance_to_next,
                elapsed_secs: seconds_between(&first.timestamp, &last.timestamp),
            })
        })
        .collect()
}

fn surface_summaries(points: &[FusedPoint]) -> Vec<SurfaceSummary> {
    runs_by(points, |p| p.surface_run_id)
        .into_iter()
        .filter_map(|(start_index, run)| {
            let first = run.first()?;
            let (ascent, descent) = climb(run);

            // hops from the last point of a pause section jump across the pause
            let total_distance: f64 = run
                .iter()
                .enumerate()
                .filter(|&(k, p)| {
                    points
                        .get(start_index + k + 1)
                        .is_some_and(|next| next.pause_section_id == p.pause_section_id)
                })
                .map(|(_, p)| p.distance_to_next)
                .sum();

            Some(SurfaceSummary {
                surface_run_id: first.surface_run_id,
                surface: first.surface.clone(),
                start_index,
                point_count: run.len(),
                ascent,
                descent,
                total_distance,
            })
        })
        .collect()
}

fn track_summary(
    points: &[FusedPoint],
    sections: &[SectionSummary],
    surfaces: &[SurfaceSummary],
    config: &PipelineConfig,
) -> TrackSummary {
    let section_distance: f64 = sections.iter().map(|s| s.total_distance).sum();
    let between_stops: f64 = sections.iter().map(|s| s.distance_between_stops).sum();

    let stationary_secs = points
        .windows(2)
        .filter(|w| w[0].distance_to_next <= config.stationary_tolerance)
        .count();

    let mut distance_by_surface: BTreeMap<String, f64> = BTreeMap::new();
    for run in surfaces {
        let key = run.surface.as_deref().unwrap_or(UNKNOWN_SURFACE).to_string();
        *distance_by_surface.entry(key).or_insert(0.0) += run.total_distance;
    }

    TrackSummary {
        moving_distance: section_distance - between_stops,
        total_ascent: sections.iter().map(|s| s.ascent).sum(),
        total_descent: sections.iter().map(|s| s.descent).sum(),
        paused_secs: sections.iter().map(|s| s.paused_secs).sum(),
        duration_secs: points.len(),
        stationary_secs,
        section_count: sections.len(),
        surface_run_count: surfaces.len(),
        distance_by_surface,
    }
}
