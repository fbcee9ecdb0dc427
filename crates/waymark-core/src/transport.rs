//! Delivery contract between the sync engine and the remote endpoint.
//!
//! The engine hands each claimed row to a [`DeliveryTransport`] as a
//! [`LocationPayload`] and classifies the outcome:
//!
//! | Outcome | Row becomes |
//! |---------|-------------|
//! | [`SubmitOutcome::Accepted`] | `synced` |
//! | [`SubmitOutcome::SoftRejected`] | `rejected` (server reason recorded) |
//! | technical [`TransportError`] | `pending`, retried after backoff |
//! | [`TransportError::Rejected`] | `rejected` |

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;

use waymark_store::QueuedLocation;

/// Body of one delivery POST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPayload {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Capture time.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Horizontal accuracy in meters.
    pub accuracy: f64,
    /// Altitude in meters.
    pub altitude: Option<f64>,
    /// Speed in meters per second.
    pub speed: Option<f64>,
    /// Bearing in degrees.
    pub bearing: Option<f64>,
    /// `false` for user-initiated entries.
    pub automatic: bool,
}

impl From<&QueuedLocation> for LocationPayload {
    fn from(row: &QueuedLocation) -> Self {
        Self {
            latitude: row.latitude,
            longitude: row.longitude,
            timestamp: row.captured_at,
            accuracy: row.accuracy,
            altitude: row.altitude,
            speed: row.speed,
            bearing: row.bearing,
            automatic: row.source.is_automatic(),
        }
    }
}

/// Successful HTTP exchange, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Stored by the server.
    Accepted,
    /// HTTP success, but the server declined the point.
    SoftRejected { reason: String },
}

/// Failed delivery attempt.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    /// No connectivity or the endpoint could not be reached.
    #[error("Endpoint not reachable: {0}")]
    Unreachable(String),

    /// The request did not complete in time.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Server-side failure (5xx), or a 408/429 asking to come back later.
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// The server refused the point (4xx other than 408 and 429).
    #[error("Rejected with {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The response could not be understood.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Whether the failure is transient and the row should be retried.
    pub fn is_technical(&self) -> bool {
        !matches!(self, TransportError::Rejected { .. })
    }

    /// Classify an HTTP failure status.
    ///
    /// 408 Request Timeout and 429 Too Many Requests are retried like
    /// server errors; any other 4xx is terminal.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if (400..500).contains(&status) && status != 408 && status != 429 {
            TransportError::Rejected { status, message }
        } else {
            TransportError::Server { status, message }
        }
    }
}

/// Submits one payload to the remote endpoint.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// Submit a single point.
    async fn submit(&self, payload: &LocationPayload) -> Result<SubmitOutcome, TransportError>;
}

/// JSON response body of the delivery endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitResponse {
    /// `false` marks a soft rejection.
    #[serde(default = "accepted_default")]
    pub accepted: bool,
    /// Server explanation for a soft rejection.
    #[serde(default)]
    pub reason: Option<String>,
}

fn accepted_default() -> bool {
    true
}

impl SubmitResponse {
    /// Interpret the body of a 2xx response.
    ///
    /// An empty or unparseable body is a plain success: the server has
    /// stored the point, and sending it again would duplicate it.
    pub fn classify(body: &str) -> Result<SubmitOutcome, TransportError> {
        if body.trim().is_empty() {
            return Ok(SubmitOutcome::Accepted);
        }

        let response: SubmitResponse = match serde_json::from_str(body) {
            Ok(response) => response,
            Err(e) => {
                warn!("Unreadable success body, treating as accepted: {}", e);
                return Ok(SubmitOutcome::Accepted);
            }
        };

        if response.accepted {
            Ok(SubmitOutcome::Accepted)
        } else {
            Ok(SubmitOutcome::SoftRejected {
                reason: response
                    .reason
                    .unwrap_or_else(|| "declined without reason".to_string()),
            })
        }
    }
}

#[cfg(feature = "http")]
pub use http::HttpTransport;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::Client;
    use tracing::debug;

    use super::{DeliveryTransport, LocationPayload, SubmitOutcome, SubmitResponse, TransportError};

    /// Delivery over HTTPS with an optional bearer token.
    #[derive(Debug, Clone)]
    pub struct HttpTransport {
        client: Client,
        endpoint: String,
        token: Option<String>,
        timeout: Duration,
    }

    impl HttpTransport {
        /// Create a transport posting to `endpoint`.
        pub fn new(
            endpoint: &str,
            token: Option<String>,
            timeout: Duration,
        ) -> Result<Self, TransportError> {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(TransportError::InvalidResponse(format!(
                    "endpoint must start with http:// or https://, got: {}",
                    endpoint
                )));
            }

            let client = Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| TransportError::Unreachable(e.to_string()))?;

            Ok(Self {
                client,
                endpoint: endpoint.to_string(),
                token,
                timeout,
            })
        }

        /// The endpoint URL.
        pub fn endpoint(&self) -> &str {
            &self.endpoint
        }
    }

    #[async_trait]
    impl DeliveryTransport for HttpTransport {
        async fn submit(
            &self,
            payload: &LocationPayload,
        ) -> Result<SubmitOutcome, TransportError> {
            let mut request = self.client.post(&self.endpoint).json(payload);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(self.timeout)
                } else {
                    TransportError::Unreachable(e.to_string())
                }
            })?;

            let status = response.status();
            let body = response.text().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(self.timeout)
                } else {
                    TransportError::InvalidResponse(e.to_string())
                }
            })?;
            debug!("Delivery endpoint answered {}", status);

            if status.is_success() {
                SubmitResponse::classify(&body)
            } else {
                let message = serde_json::from_str::<serde_json::Value>(&body)
                    .ok()
                    .and_then(|v| {
                        v.get("reason")
                            .or_else(|| v.get("error"))
                            .and_then(|e| e.as_str())
                            .map(String::from)
                    })
                    .unwrap_or_else(|| status.to_string());
                Err(TransportError::from_status(status.as_u16(), message))
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_rejects_non_http_endpoint() {
            let result = HttpTransport::new("example.com/points", None, Duration::from_secs(5));
            assert!(result.is_err());
        }

        #[test]
        fn test_keeps_endpoint() {
            let transport =
                HttpTransport::new("https://example.com/api/points", None, Duration::from_secs(5))
                    .unwrap();
            assert_eq!(transport.endpoint(), "https://example.com/api/points");
        }
    }
}
