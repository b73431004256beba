//! Outbound webhook transport.
//!
//! A small trait seam over the HTTP client so the relay can be tested
//! without a live endpoint. The production transport posts JSON with a
//! short timeout and optionally signs payloads with HMAC-SHA256.

use async_trait::async_trait;
use std::time::Duration;
use tracing::trace;
use wardline_core::error::TelemetryError;

/// Delivers a serialized telemetry payload to an endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Post `payload` to `url`. Only an HTTP 200 counts as delivered.
    async fn send(&self, url: &str, payload: &serde_json::Value) -> Result<(), TelemetryError>;
}

/// Production transport backed by `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
    /// HMAC shared secret for payload signing. None = unsigned.
    signing_secret: Option<String>,
}

impl HttpTransport {
    /// Build a transport with the given request timeout.
    pub fn new(
        timeout_secs: u64,
        signing_secret: Option<String>,
    ) -> Result<Self, TelemetryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| TelemetryError::TransmissionFailed(e.to_string()))?;
        Ok(Self {
            client,
            signing_secret,
        })
    }

    /// Compute the hex-encoded HMAC-SHA256 signature of a payload body.
    fn sign(&self, body: &[u8]) -> Option<String> {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        type HmacSha256 = Hmac<Sha256>;

        let secret = self.signing_secret.as_deref().filter(|s| !s.is_empty())?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(body);
        Some(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, url: &str, payload: &serde_json::Value) -> Result<(), TelemetryError> {
        let body = serde_json::to_vec(payload)?;

        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(signature) = self.sign(&body) {
            request = request.header("x-wardline-signature", format!("sha256={signature}"));
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| TelemetryError::TransmissionFailed(e.to_string()))?;

        let status = response.status();
        trace!(%status, url, "Telemetry POST completed");
        if status.as_u16() == 200 {
            Ok(())
        } else {
            Err(TelemetryError::TransmissionFailed(format!(
                "endpoint returned HTTP {status}"
            )))
        }
    }
}
