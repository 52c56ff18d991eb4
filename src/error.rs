//! Unified error handling for the trace-matcher library.
//!
//! Recoverable upstream faults (empty responses, anomalous edge indices) never reach this
//! type: they degrade to null values inside the pipeline. What remains are caller errors and
//! the one fatal class, loss of 1:1 alignment between the trace and the matched tables.

use thiserror::Error;

/// Unified error type for trace-matcher operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatchError {
    /// The input trace has no points
    #[error("Trace is empty")]
    EmptyTrace,

    /// No segment of the trace produced a single road edge
    #[error("No match available: none of the {segment_count} segments matched any road edge")]
    NoMatchAvailable { segment_count: usize },

    /// Point or edge tables lost their 1:1 correspondence
    #[error("Alignment fault in segment {segment_id}: {message}")]
    AlignmentFault { segment_id: usize, message: String },

    /// Fused points lost their 1:1 correspondence with the matched tables
    #[error("Fusion fault at point {point_index}: {message}")]
    FusionFault { point_index: usize, message: String },

    /// A trace point has non-finite or out-of-range coordinates
    #[error("Invalid point {index}: lat={latitude}, lon={longitude}, alt={altitude:?}")]
    InvalidPoint {
        index: usize,
        latitude: f64,
        longitude: f64,
        altitude: Option<f64>,
    },

    /// A matcher request was malformed by the caller
    #[error("Invalid matcher request: {message}")]
    InvalidRequest { message: String },

    /// Activity streams could not be merged into a trace
    #[error("Stream mismatch: {message}")]
    StreamMismatch { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// HTTP client setup error
    #[error("HTTP error: {message}")]
    Http { message: String },
}

impl MatchError {
    pub(crate) fn alignment(segment_id: usize, message: impl Into<String>) -> Self {
        MatchError::AlignmentFault {
            segment_id,
            message: message.into(),
        }
    }

    /// True for the fatal alignment class, raised while stitching or fusing.
    pub fn is_alignment_fault(&self) -> bool {
        matches!(
            self,
            MatchError::AlignmentFault { .. } | MatchError::FusionFault { .. }
        )
    }
}

/// Result type alias for trace-matcher operations.
pub type Result<T> = std::result::Result<T, MatchError>;

/// Extension trait for converting Option to MatchError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a fusion fault at the given trace point.
    fn ok_or_fusion_fault(self, point_index: usize, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_fusion_fault(self, point_index: usize, message: &str) -> Result<T> {
        self.ok_or_else(|| MatchError::FusionFault {
            point_index,
            message: message.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MatchError::AlignmentFault {
            segment_id: 3,
            message: "4 matched points for 5 trace points".to_string(),
        };
        assert!(err.to_string().contains("segment 3"));
        assert!(err.to_string().contains("4 matched points"));
        assert!(err.is_alignment_fault());
    }

    #[test]
    fn test_no_match_is_not_alignment() {
        let err = MatchError::NoMatchAvailable { segment_count: 2 };
        assert!(!err.is_alignment_fault());
        assert!(err.to_string().contains("2 segments"));
    }

    #[test]
    fn test_option_ext() {
        let none: Option<usize> = None;
        let result = none.ok_or_fusion_fault(7, "edge missing");
        let err = result.unwrap_err();
        assert_eq!(
            err,
            MatchError::FusionFault {
                point_index: 7,
                message: "edge missing".to_string()
            }
        );
        assert!(err.is_alignment_fault());
        assert!(err.to_string().contains("point 7"));
    }
}
