//! Remote attestation strategy: one POST to an external verification service.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{VerificationOutcome, VerificationStrategy};
use crate::error::AttestationError;

const VERIFY_AGENT_PATH: &str = "/verify-agent";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyAgentRequest<'a> {
    agent_name: &'a str,
    registry: &'a str,
}

/// What the attestation service said, before it is mapped to an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestationVerdict {
    Verified { credential_id: Option<u64> },
    /// HTTP 200 with a well-formed body that does not assert verification.
    Denied,
    /// Any status other than 200.
    Rejected { status: u16 },
}

/// HTTP client for the attestation service.
///
/// Performs exactly one round trip per call and never retries.
pub struct RemoteAttestationClient {
    client: reqwest::Client,
    verify_url: String,
    registry_address: String,
    request_timeout: Duration,
}

impl RemoteAttestationClient {
    pub fn new(
        endpoint: &str,
        registry_address: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, AttestationError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| AttestationError::ClientInit(e.to_string()))?;

        Ok(Self {
            client,
            verify_url: format!("{}{}", endpoint.trim_end_matches('/'), VERIFY_AGENT_PATH),
            registry_address: registry_address.to_string(),
            request_timeout,
        })
    }

    pub fn verify_url(&self) -> &str {
        &self.verify_url
    }

    /// Ask the service about `identity`.
    pub async fn attest(&self, identity: &str) -> Result<AttestationVerdict, AttestationError> {
        let response = self
            .client
            .post(&self.verify_url)
            .json(&VerifyAgentRequest {
                agent_name: identity,
                registry: &self.registry_address,
            })
            .send()
            .await
            .map_err(|e| AttestationError::from_reqwest(e, self.request_timeout))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Ok(AttestationVerdict::Rejected {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| AttestationError::from_reqwest(e, self.request_timeout))?;

        parse_verdict(&body)
    }
}

/// Interpret a 200 response body.
///
/// `"verified": true`, `"verified": "true"` and `"status": "verified"` all
/// assert verification. A body with neither field is malformed.
fn parse_verdict(body: &str) -> Result<AttestationVerdict, AttestationError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| AttestationError::MalformedBody(format!("invalid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| AttestationError::MalformedBody("expected a JSON object".to_string()))?;

    let verified_field = obj.get("verified").map(is_truthy);
    let status_field = obj
        .get("status")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().eq_ignore_ascii_case("verified"));

    let verified = match (verified_field, status_field) {
        (None, None) => {
            return Err(AttestationError::MalformedBody(
                "response has neither a 'verified' nor a 'status' field".to_string(),
            ));
        }
        (v, s) => v.unwrap_or(false) || s.unwrap_or(false),
    };

    if !verified {
        return Ok(AttestationVerdict::Denied);
    }

    let credential_id = obj.get("agentId").and_then(|id| match id {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    });

    Ok(AttestationVerdict::Verified { credential_id })
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

#[async_trait]
impl VerificationStrategy for RemoteAttestationClient {
    fn name(&self) -> &'static str {
        "remote_attestation"
    }

    async fn verify(&self, identity: &str) -> VerificationOutcome {
        match self.attest(identity).await {
            Ok(AttestationVerdict::Verified { credential_id }) => {
                VerificationOutcome::verified(credential_id)
            }
            Ok(AttestationVerdict::Denied) => VerificationOutcome::not_verified("not verified"),
            Ok(AttestationVerdict::Rejected { status }) => {
                tracing::debug!(identity, status, "Attestation service rejected identity");
                VerificationOutcome::not_verified("registry rejected")
            }
            Err(e) => VerificationOutcome::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_url_joins_endpoint_once() {
        let client = RemoteAttestationClient::new(
            "http://localhost:3002/",
            "0xc488c53fdd58b2f71D4F3469D89458bE0B3a3C41",
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(client.verify_url(), "http://localhost:3002/verify-agent");
    }

    #[test]
    fn request_body_uses_wire_field_names() {
        let body = serde_json::to_value(VerifyAgentRequest {
            agent_name: "Agent_Rex",
            registry: "0xabc",
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"agentName": "Agent_Rex", "registry": "0xabc"})
        );
    }

    #[test]
    fn truthy_verified_field_verifies() {
        assert_eq!(
            parse_verdict(r#"{"verified": true}"#).unwrap(),
            AttestationVerdict::Verified {
                credential_id: None
            }
        );
        assert_eq!(
            parse_verdict(r#"{"verified": "true", "agentId": "42"}"#).unwrap(),
            AttestationVerdict::Verified {
                credential_id: Some(42)
            }
        );
        assert_eq!(
            parse_verdict(r#"{"status": "verified", "agentId": 7}"#).unwrap(),
            AttestationVerdict::Verified {
                credential_id: Some(7)
            }
        );
    }

    #[test]
    fn falsy_verified_field_denies() {
        assert_eq!(
            parse_verdict(r#"{"verified": false}"#).unwrap(),
            AttestationVerdict::Denied
        );
        assert_eq!(
            parse_verdict(r#"{"verified": 1}"#).unwrap(),
            AttestationVerdict::Denied
        );
        assert_eq!(
            parse_verdict(r#"{"status": "pending"}"#).unwrap(),
            AttestationVerdict::Denied
        );
    }

    #[test]
    fn malformed_bodies_are_errors() {
        for body in ["", "verified", "[true]", r#"{"ok": true}"#] {
            assert!(
                matches!(parse_verdict(body), Err(AttestationError::MalformedBody(_))),
                "body {body:?} should be malformed"
            );
        }
    }
}
