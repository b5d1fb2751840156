//! Outbound peer HTTP client: signed message delivery with bounded
//! exponential backoff, plus health and public-key probes.

use std::time::Duration;

use pactnet_core::constants::{HTTP_TIMEOUT_SECS, RETRY_DELAYS_SECS};
use pactnet_core::types::{EntityId, PublicKeyHex};
use pactnet_core::{PactError, WireMessage};

/// Reply payload returned by a receiving peer.
#[derive(Debug, serde::Deserialize)]
pub struct ReceiveAck {
    pub status: String,
    #[serde(default)]
    pub reply: Option<WireMessage>,
}

pub struct PeerClient {
    http: reqwest::Client,
    retry_delays: Vec<u64>,
}

impl Default for PeerClient {
    fn default() -> Self {
        Self::new(RETRY_DELAYS_SECS.to_vec())
    }
}

impl PeerClient {
    pub fn new(retry_delays: Vec<u64>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .expect("reqwest client builds");
        Self { http, retry_delays }
    }

    /// POST a message to the peer's v1.1 endpoint, retrying with backoff.
    /// Validation failures (4xx) are surfaced immediately; only transport
    /// errors and 5xx responses are retried.
    pub async fn send_message(
        &self,
        endpoint: &str,
        message: &WireMessage,
    ) -> Result<ReceiveAck, PactError> {
        let url = format!("{}/v1.1/message", endpoint.trim_end_matches('/'));
        let mut last_error = PactError::Timeout;

        let attempts = self.retry_delays.len() + 1;
        for attempt in 0..attempts {
            match self.http.post(&url).json(message).send().await {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .json::<ReceiveAck>()
                        .await
                        .map_err(|e| PactError::InvalidJson(e.to_string()));
                }
                Ok(resp) if resp.status().is_client_error() => {
                    let body: serde_json::Value = resp.json().await.unwrap_or_default();
                    let code = body["error"].as_str().unwrap_or("INVALID_JSON").to_string();
                    tracing::warn!(%url, code, "peer rejected message");
                    return Err(map_peer_rejection(&code));
                }
                Ok(resp) => {
                    tracing::warn!(%url, status = %resp.status(), attempt, "peer send failed");
                    last_error = PactError::Internal(format!("peer returned {}", resp.status()));
                }
                Err(e) => {
                    tracing::debug!(%url, attempt, error = %e, "peer send error, will retry");
                    last_error = if e.is_timeout() {
                        PactError::Timeout
                    } else {
                        PactError::Internal(e.to_string())
                    };
                }
            }
            if let Some(delay) = self.retry_delays.get(attempt) {
                tokio::time::sleep(Duration::from_secs(*delay)).await;
            }
        }
        Err(last_error)
    }

    /// A peer is reachable when its health endpoint answers 200.
    pub async fn is_reachable(&self, endpoint: &str) -> bool {
        let url = format!("{}/v1.1/health", endpoint.trim_end_matches('/'));
        matches!(
            self.http.get(&url).send().await,
            Ok(resp) if resp.status().is_success()
        )
    }

    /// Fetch a peer's advertised Ed25519 public key.
    pub async fn fetch_public_key(
        &self,
        endpoint: &str,
    ) -> Result<(EntityId, PublicKeyHex), PactError> {
        let url = format!("{}/v1.1/public-key", endpoint.trim_end_matches('/'));
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| PactError::Internal(e.to_string()))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| PactError::InvalidJson(e.to_string()))?;
        let entity = body["entity_id"]
            .as_str()
            .ok_or_else(|| PactError::InvalidJson("missing entity_id".into()))?;
        let key = body["public_key"]
            .as_str()
            .ok_or_else(|| PactError::InvalidJson("missing public_key".into()))?;
        Ok((EntityId::new(entity), PublicKeyHex(key.to_string())))
    }
}

/// Map a peer's rejection code onto the matching local error. These are
/// never retried.
fn map_peer_rejection(code: &str) -> PactError {
    match code {
        "INVALID_SIGNATURE" => PactError::InvalidSignature,
        "REPLAY_DETECTED" => PactError::ReplayDetected("peer".into()),
        "EXPIRED_TIMESTAMP" => PactError::ExpiredTimestamp { skew_secs: 0 },
        "INVALID_VERSION" => PactError::InvalidVersion("rejected".into()),
        "UNKNOWN_SENDER" => PactError::UnknownSender("local".into()),
        "UNKNOWN_RECIPIENT" => PactError::UnknownRecipient("peer".into()),
        "RATE_LIMITED" => PactError::RateLimited,
        other => PactError::InvalidJson(format!("peer rejected: {other}")),
    }
}
