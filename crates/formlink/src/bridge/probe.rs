use super::protocol::{is_signature_body, SIGNATURE_PATH};
use super::Endpoint;
use chrono::Utc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Checks one candidate port: TCP connect, then the signature request, each
/// bounded by the same per-probe timeout.
#[derive(Debug, Clone)]
pub struct EndpointProbe {
    http: reqwest::Client,
    host: String,
    timeout: Duration,
}

impl EndpointProbe {
    pub fn new(http: reqwest::Client, host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            host: host.into(),
            timeout,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// `Some` only when the listener answered like the bridge.
    pub async fn probe(&self, port: u16, process_id: Option<u32>) -> Option<Endpoint> {
        let addr = format!("{}:{}", self.host, port);
        match tokio::time::timeout(self.timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_stream)) => {}
            Ok(Err(e)) => {
                tracing::debug!(port, error = %e, "probe: connect refused");
                return None;
            }
            Err(_) => {
                tracing::debug!(port, "probe: connect timed out");
                return None;
            }
        }

        let url = format!("http://{addr}{SIGNATURE_PATH}");
        let response = match self.http.get(&url).timeout(self.timeout).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(port, error = %e, "probe: signature request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            tracing::debug!(port, status = %response.status(), "probe: non-success status");
            return None;
        }
        let body: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(port, error = %e, "probe: body is not JSON");
                return None;
            }
        };
        if !is_signature_body(&body) {
            tracing::debug!(port, "probe: JSON does not match the bridge signature");
            return None;
        }

        tracing::info!(port, host = %self.host, "bridge signature matched");
        Some(Endpoint {
            host: self.host.clone(),
            port,
            process_id,
            validated_at: Utc::now(),
            signature_path: SIGNATURE_PATH.to_string(),
        })
    }
}
