//! HTTP client for a Valhalla `trace_attributes` endpoint.
//!
//! One request per segment, no retries: a failed call is a segment without a match, and the
//! pipeline carries on with the next one. The client owns a small tokio runtime so the async
//! reqwest client can serve the synchronous [`MapMatcher`] trait.

use log::{debug, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;

use crate::client::{MapMatcher, MatchRequest, MatchResponse, UpstreamError};
use crate::error::{MatchError, Result};

const TRACE_ATTRIBUTES_PATH: &str = "trace_attributes";
const WORKER_THREADS: usize = 2;

/// Connection settings for the matcher service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValhallaConfig {
    /// Service root, e.g. "http://127.0.0.1:8002"
    pub base_url: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Sent as `access_token` query parameter when set
    pub api_key: Option<String>,
}

impl Default for ValhallaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8002".to_string(),
            timeout_secs: 60,
            api_key: None,
        }
    }
}

/// Blocking Valhalla matcher client.
pub struct ValhallaClient {
    client: Client,
    config: ValhallaConfig,
    runtime: Runtime,
}

impl ValhallaClient {
    /// Create a client for the given service.
    pub fn new(config: ValhallaConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MatchError::Http {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(WORKER_THREADS)
            .enable_all()
            .build()
            .map_err(|e| MatchError::Http {
                message: format!("Failed to create tokio runtime: {}", e),
            })?;

        info!("[ValhallaClient] Using matcher at {}", config.base_url);

        Ok(Self {
            client,
            config,
            runtime,
        })
    }

    pub fn config(&self) -> &ValhallaConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            TRACE_ATTRIBUTES_PATH
        )
    }

    /// Send one request and decode the response.
    ///
    /// Never fails: every error path is logged and returns [`MatchResponse::NoMatch`].
    pub async fn trace_attributes(&self, request: &MatchRequest) -> MatchResponse {
        if request.is_too_short() {
            debug!(
                "[Match {}] {} point(s) is not a shape, skipping request",
                request.segment_id,
                request.point_count()
            );
            return MatchResponse::NoMatch;
        }

        let req_start = Instant::now();
        let mut builder = self.client.post(self.endpoint()).json(&request.body());
        if let Some(key) = &self.config.api_key {
            builder = builder.query(&[("access_token", key)]);
        }

        // Phase 1: send request, receive headers
        let resp = match builder.send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("[Match {}] Request error: {}", request.segment_id, e);
                return MatchResponse::NoMatch;
            }
        };
        let headers_elapsed = req_start.elapsed();
        let status = resp.status();

        // Phase 2: download body
        let bytes = match resp.bytes().await {
            Ok(b) => b,
            Err(e) => {
                warn!("[Match {}] Body download error: {}", request.segment_id, e);
                return MatchResponse::NoMatch;
            }
        };

        if !status.is_success() {
            match serde_json::from_slice::<UpstreamError>(&bytes) {
                Ok(err) => warn!(
                    "[Match {}] HTTP {} error_code={:?}: {}",
                    request.segment_id,
                    status,
                    err.error_code,
                    err.error.unwrap_or_default()
                ),
                Err(_) => warn!("[Match {}] HTTP {}", request.segment_id, status),
            }
            return MatchResponse::NoMatch;
        }

        // Phase 3: decode
        let response = match MatchResponse::from_json(&bytes) {
            Ok(r) => r,
            Err(e) => {
                warn!("[Match {}] JSON parse error: {}", request.segment_id, e);
                return MatchResponse::NoMatch;
            }
        };

        debug!(
            "[Match {}] headers={:?} total={:?} body={:.1}KB points={} edges={}",
            request.segment_id,
            headers_elapsed,
            req_start.elapsed(),
            bytes.len() as f64 / 1024.0,
            request.point_count(),
            response.edge_count()
        );

        response
    }
}

impl MapMatcher for ValhallaClient {
    /// Blocks on the client's runtime; must not be called from inside an async context.
    fn match_segment(&self, request: &MatchRequest) -> MatchResponse {
        self.runtime.block_on(self.trace_attributes(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{CostingProfile, ShapePoint};

    fn request(points: usize) -> MatchRequest {
        MatchRequest {
            segment_id: 0,
            shape: (0..points)
                .map(|i| ShapePoint {
                    lon: 8.0,
                    lat: 47.0 + i as f64 * 0.0001,
                    time: Some(i as u64),
                })
                .collect(),
            encoded_polyline: None,
            profile: CostingProfile::default(),
        }
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let client = ValhallaClient::new(ValhallaConfig {
            base_url: "http://localhost:8002/".to_string(),
            ..ValhallaConfig::default()
        })
        .unwrap();
        assert_eq!(client.endpoint(), "http://localhost:8002/trace_attributes");
    }

    #[test]
    fn test_single_point_skips_request() {
        // Port 9 (discard) would fail anyway; a short segment must not even try
        let client = ValhallaClient::new(ValhallaConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
            api_key: None,
        })
        .unwrap();
        assert!(client.match_segment(&request(1)).is_no_match());
    }

    #[test]
    fn test_unreachable_service_is_no_match() {
        let client = ValhallaClient::new(ValhallaConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 2,
            api_key: None,
        })
        .unwrap();
        assert!(client.match_segment(&request(3)).is_no_match());
    }
}
