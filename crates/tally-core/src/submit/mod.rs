//! Submission client for the remote survey-intake service.
//!
//! Wraps the single "submit survey" operation and classifies its outcome.
//! The intake API is an external collaborator; everything the engine needs
//! to know about it is the three-way accept/permanent/transient contract
//! plus auth expiry.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::SurveyRecord;
use crate::util::{compact_text, normalize_text_option};

/// Classified result of one submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The server durably accepted the record
    Accepted {
        /// Reference assigned by the intake service, when it returns one
        server_reference: Option<String>,
    },
    /// The payload was rejected and will never succeed unchanged
    RejectedPermanent { reason: String },
    /// The attempt failed for reasons expected to clear up (network,
    /// timeout, server error); the record should be retried
    RejectedTransient { reason: String },
    /// Credentials are no longer valid; retrying is useless until the auth
    /// layer refreshes them
    AuthExpired,
}

/// Contract for submitting one record to the intake service.
#[async_trait]
pub trait SubmissionClient: Send + Sync {
    /// Submit the record's payload and classify the outcome.
    ///
    /// Transport-level failures are reported as `RejectedTransient`, not as
    /// errors; `Err` is reserved for local faults such as payload encoding.
    async fn submit(&self, record: &SurveyRecord) -> Result<SubmitOutcome>;
}

/// HTTP implementation of [`SubmissionClient`].
///
/// One POST per record: the body is the opaque payload, the record id rides
/// in an `Idempotency-Key` header so at-least-once delivery stays idempotent
/// on the server side.
#[derive(Clone)]
pub struct HttpSubmissionClient {
    endpoint: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpSubmissionClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpSubmissionClient")
            .field("endpoint", &self.endpoint)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpSubmissionClient {
    /// Create a client for the given intake endpoint.
    ///
    /// The bearer token is optional; it is provisioned by the out-of-scope
    /// auth layer and replaced wholesale after a refresh.
    pub fn new(endpoint: impl Into<String>, auth_token: Option<String>) -> Result<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        Ok(Self {
            endpoint,
            auth_token: normalize_text_option(auth_token),
            client: reqwest::Client::builder()
                .build()
                .map_err(|error| Error::InvalidInput(error.to_string()))?,
        })
    }
}

#[async_trait]
impl SubmissionClient for HttpSubmissionClient {
    async fn submit(&self, record: &SurveyRecord) -> Result<SubmitOutcome> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Idempotency-Key", record.id.as_str())
            .header("Accept", "application/json")
            .json(&record.payload);

        if let Some(token) = self.auth_token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => {
                // Connection refused, DNS failure, timeout: all transient
                return Ok(SubmitOutcome::RejectedTransient {
                    reason: compact_text(&error.to_string()),
                });
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Ok(classify_response(status, &body))
    }
}

/// Interpret an intake response into the submission outcome taxonomy.
///
/// HTTP status is the primary signal: 2xx accepted, 401 auth expiry, 408/429
/// transient despite being 4xx, remaining 4xx permanent, everything else
/// (5xx) transient.
fn classify_response(status: StatusCode, body: &str) -> SubmitOutcome {
    if status.is_success() {
        return SubmitOutcome::Accepted {
            server_reference: parse_server_reference(body),
        };
    }

    if status == StatusCode::UNAUTHORIZED {
        return SubmitOutcome::AuthExpired;
    }

    let reason = parse_api_error(status, body);
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS {
        return SubmitOutcome::RejectedTransient { reason };
    }

    if status.is_client_error() {
        SubmitOutcome::RejectedPermanent { reason }
    } else {
        SubmitOutcome::RejectedTransient { reason }
    }
}

#[derive(Debug, Deserialize)]
struct IntakeReceipt {
    reference: Option<String>,
    receipt_no: Option<String>,
    id: Option<serde_json::Value>,
}

/// Pull a server reference out of an acceptance body, tolerating absent or
/// non-JSON bodies and the intake API's habit of returning numeric ids.
fn parse_server_reference(body: &str) -> Option<String> {
    let receipt: IntakeReceipt = serde_json::from_str(body).ok()?;

    receipt
        .reference
        .or(receipt.receipt_no)
        .or_else(|| match receipt.id {
            Some(serde_json::Value::String(id)) => Some(id),
            Some(serde_json::Value::Number(id)) => Some(id.to_string()),
            _ => None,
        })
        .map(|reference| reference.trim().to_string())
        .filter(|reference| !reference.is_empty())
}

#[derive(Debug, Deserialize)]
struct IntakeErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<IntakeErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", compact_text(trimmed), status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::InvalidInput("intake endpoint must not be empty".to_string()))?;
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "intake endpoint must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_endpoint_rejects_invalid_values() {
        assert!(normalize_endpoint(String::new()).is_err());
        assert!(normalize_endpoint("intake.example.com".to_string()).is_err());
        assert_eq!(
            normalize_endpoint("https://intake.example.com/v1/surveys/".to_string()).unwrap(),
            "https://intake.example.com/v1/surveys"
        );
    }

    #[test]
    fn classify_success_carries_reference() {
        let outcome = classify_response(StatusCode::OK, r#"{"reference": "SRV-2041"}"#);
        assert_eq!(
            outcome,
            SubmitOutcome::Accepted {
                server_reference: Some("SRV-2041".to_string())
            }
        );
    }

    #[test]
    fn classify_success_without_body() {
        let outcome = classify_response(StatusCode::CREATED, "");
        assert_eq!(
            outcome,
            SubmitOutcome::Accepted {
                server_reference: None
            }
        );
    }

    #[test]
    fn classify_unauthorized_as_auth_expiry() {
        assert_eq!(
            classify_response(StatusCode::UNAUTHORIZED, ""),
            SubmitOutcome::AuthExpired
        );
    }

    #[test]
    fn classify_client_errors_as_permanent() {
        let outcome = classify_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message": "stall_no is required"}"#,
        );
        assert_eq!(
            outcome,
            SubmitOutcome::RejectedPermanent {
                reason: "stall_no is required (422)".to_string()
            }
        );
    }

    #[test]
    fn classify_timeout_and_throttle_as_transient() {
        assert!(matches!(
            classify_response(StatusCode::REQUEST_TIMEOUT, ""),
            SubmitOutcome::RejectedTransient { .. }
        ));
        assert!(matches!(
            classify_response(StatusCode::TOO_MANY_REQUESTS, ""),
            SubmitOutcome::RejectedTransient { .. }
        ));
    }

    #[test]
    fn classify_server_errors_as_transient() {
        let outcome = classify_response(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(
            outcome,
            SubmitOutcome::RejectedTransient {
                reason: "upstream down (502)".to_string()
            }
        );
    }

    #[test]
    fn parse_server_reference_falls_back_across_keys() {
        assert_eq!(
            parse_server_reference(r#"{"receipt_no": " R-77 "}"#),
            Some("R-77".to_string())
        );
        assert_eq!(parse_server_reference(r#"{"id": 9321}"#), Some("9321".to_string()));
        assert_eq!(parse_server_reference("not json"), None);
        assert_eq!(parse_server_reference(r#"{"reference": "  "}"#), None);
    }

    #[test]
    fn debug_redacts_auth_token() {
        let client = HttpSubmissionClient::new(
            "https://intake.example.com/v1/surveys",
            Some("secret-token".to_string()),
        )
        .unwrap();

        let debug = format!("{client:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }
}
