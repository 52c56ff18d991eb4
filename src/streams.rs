//! Merge activity-provider streams into a trace.
//!
//! Activity providers deliver a recording as separate, time-aligned streams: `[lat, lng]`
//! pairs, altitude samples and seconds elapsed since the activity start. All three must be
//! present and of equal length; a missing stream means the trace cannot be built, and so does a
//! single sample with non-finite or out-of-range values.

use chrono::{DateTime, Duration, Utc};
use log::warn;

use crate::error::{MatchError, Result};
use crate::{validate_trace, TrackPoint};

/// Build track points from a start time and the three activity streams.
///
/// # Example
///
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use trace_matcher::merge_streams;
///
/// let start = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
/// let latlng = vec![[47.0, 8.0], [47.0001, 8.0]];
/// let altitude = vec![410.0, 411.5];
/// let time = vec![0, 1];
///
/// let trace = merge_streams(start, Some(&latlng[..]), Some(&altitude[..]), Some(&time[..])).unwrap();
/// assert_eq!(trace.len(), 2);
/// assert_eq!(trace[1].altitude, Some(411.5));
/// ```
pub fn merge_streams(
    start_time: DateTime<Utc>,
    latlng: Option<&[[f64; 2]]>,
    altitude: Option<&[f64]>,
    time: Option<&[i64]>,
) -> Result<Vec<TrackPoint>> {
    let (latlng, altitude, time) = match (latlng, altitude, time) {
        (Some(l), Some(a), Some(t)) if !l.is_empty() && !a.is_empty() && !t.is_empty() => {
            (l, a, t)
        }
        (l, a, t) => {
            warn!(
                "[Streams] Can't build track: latlng={} altitude={} time={}",
                l.is_some_and(|s| !s.is_empty()),
                a.is_some_and(|s| !s.is_empty()),
                t.is_some_and(|s| !s.is_empty())
            );
            return Err(MatchError::StreamMismatch {
                message: "latlng, altitude and time streams are all required".to_string(),
            });
        }
    };

    if latlng.len() != altitude.len() || latlng.len() != time.len() {
        return Err(MatchError::StreamMismatch {
            message: format!(
                "stream lengths differ: latlng={} altitude={} time={}",
                latlng.len(),
                altitude.len(),
                time.len()
            ),
        });
    }

    if time.windows(2).any(|w| w[1] < w[0]) {
        return Err(MatchError::StreamMismatch {
            message: "time stream is not monotonically increasing".to_string(),
        });
    }

    let trace: Vec<TrackPoint> = latlng
        .iter()
        .zip(altitude)
        .zip(time)
        .map(|((&[lat, lng], &alt), &secs)| {
            TrackPoint::new(start_time + Duration::seconds(secs), lat, lng, Some(alt))
        })
        .collect();

    validate_trace(&trace)?;
    Ok(trace)
}
