use super::discovery::EndpointDiscovery;
use super::protocol::{
    parse_controls, BridgeForm, BridgeRequest, ClickTarget, ControlGeometry, ControlNode,
    ControlQuery, ACTIVE_FORM_FALLBACK_ID,
};
use super::{Endpoint, ProcessTarget};
use crate::element::{ElementSource, FormContext};
use crate::errors::{AutomationError, Result};
use crate::filter::{flatten_bridge_nodes, ElementFilter};
use crate::geometry::Rect;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Request and recovery settings of a [`BridgeClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub request_timeout: Duration,
    /// Consecutive transport failures tolerated before the endpoint is dropped.
    pub failure_threshold: u32,
    /// Minimum gap between a failed discovery and the next attempt.
    pub rediscovery_cooldown: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(3),
            failure_threshold: 1,
            rediscovery_cooldown: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Default)]
struct EndpointState {
    endpoint: Option<Endpoint>,
    valid: bool,
    consecutive_failures: u32,
    last_failed_discovery: Option<Instant>,
}

/// Typed access to the bridge of one target process.
///
/// The endpoint is discovered lazily and replaced after `failure_threshold`
/// consecutive transport errors. The call that trips the threshold still fails;
/// the next call runs against the rediscovered endpoint.
pub struct BridgeClient {
    http: reqwest::Client,
    target: ProcessTarget,
    discovery: EndpointDiscovery,
    options: ClientOptions,
    // Held across discovery so concurrent callers never rediscover twice.
    state: Mutex<EndpointState>,
}

impl BridgeClient {
    pub fn new(
        http: reqwest::Client,
        target: ProcessTarget,
        discovery: EndpointDiscovery,
        options: ClientOptions,
    ) -> Self {
        Self {
            http,
            target,
            discovery,
            options,
            state: Mutex::new(EndpointState::default()),
        }
    }

    pub fn target(&self) -> &ProcessTarget {
        &self.target
    }

    /// Currently cached endpoint, if it is still considered valid.
    pub async fn endpoint(&self) -> Option<Endpoint> {
        let state = self.state.lock().await;
        if state.valid {
            state.endpoint.clone()
        } else {
            None
        }
    }

    /// Drops the cached endpoint and clears the cool-down; the next call rediscovers.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        state.valid = false;
        state.consecutive_failures = 0;
        state.last_failed_discovery = None;
    }

    /// Returns the cached endpoint or discovers one.
    pub async fn connect(&self, cancel: Option<&CancellationToken>) -> Result<Endpoint> {
        let mut state = self.state.lock().await;
        if state.valid {
            if let Some(endpoint) = &state.endpoint {
                return Ok(endpoint.clone());
            }
        }
        self.rediscover_locked(&mut state, cancel).await
    }

    pub async fn request(&self, request: &BridgeRequest) -> Result<Value> {
        self.request_with_cancel(request, None).await
    }

    #[tracing::instrument(skip(self, request, cancel), fields(op = request.operation()))]
    pub async fn request_with_cancel(
        &self,
        request: &BridgeRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value> {
        let endpoint = self.connect(cancel).await?;
        match self.send(&endpoint, request).await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(err) if err.is_transport() => {
                self.record_transport_failure(&endpoint).await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    async fn send(&self, endpoint: &Endpoint, request: &BridgeRequest) -> Result<Value> {
        let path = request.path();
        let url = format!("{}{}", endpoint.base_url(), path);
        let mut builder = self
            .http
            .request(request.method(), &url)
            .timeout(self.options.request_timeout);
        let query = request.query();
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        if let Some(body) = request.body() {
            builder = builder.json(&body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(endpoint, &e))?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(port = endpoint.port, %path, status = status.as_u16(), "bridge returned error status");
            return Err(AutomationError::BridgeStatus {
                status: status.as_u16(),
                path,
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(endpoint, &e))?;
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Value::Null);
        }
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => Ok(value),
            // action endpoints may acknowledge with plain text
            Err(_) if request.method() == reqwest::Method::POST => {
                Ok(Value::String(String::from_utf8_lossy(&bytes).trim().to_string()))
            }
            Err(e) => Err(AutomationError::BridgeProtocol(format!(
                "{path} returned invalid JSON: {e}"
            ))),
        }
    }

    async fn record_success(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_failures = 0;
    }

    async fn record_transport_failure(&self, failed: &Endpoint) {
        let mut state = self.state.lock().await;
        let is_current = state.valid
            && state
                .endpoint
                .as_ref()
                .map(|current| current.same_listener(failed))
                .unwrap_or(false);
        if !is_current {
            // another caller already replaced it
            return;
        }

        state.consecutive_failures += 1;
        if state.consecutive_failures < self.options.failure_threshold {
            tracing::debug!(
                port = failed.port,
                failures = state.consecutive_failures,
                threshold = self.options.failure_threshold,
                "bridge transport failure below threshold"
            );
            return;
        }

        tracing::warn!(
            port = failed.port,
            failures = state.consecutive_failures,
            "bridge endpoint marked invalid, rediscovering"
        );
        state.valid = false;
        state.consecutive_failures = 0;
        state.last_failed_discovery = None;
        match self.rediscover_locked(&mut state, None).await {
            Ok(endpoint) => tracing::info!(old_port = failed.port, new_port = endpoint.port, "bridge endpoint replaced"),
            Err(e) => tracing::warn!(error = %e, "bridge rediscovery failed"),
        }
    }

    async fn rediscover_locked(
        &self,
        state: &mut EndpointState,
        cancel: Option<&CancellationToken>,
    ) -> Result<Endpoint> {
        if let Some(failed_at) = state.last_failed_discovery {
            let elapsed = failed_at.elapsed();
            if elapsed < self.options.rediscovery_cooldown {
                return Err(AutomationError::BridgeUnavailable(format!(
                    "discovery for {} failed {}ms ago, next attempt in {}ms",
                    self.target,
                    elapsed.as_millis(),
                    (self.options.rediscovery_cooldown - elapsed).as_millis()
                )));
            }
        }

        match self.discover_target(state, cancel).await {
            Ok(endpoint) => {
                state.endpoint = Some(endpoint.clone());
                state.valid = true;
                state.consecutive_failures = 0;
                state.last_failed_discovery = None;
                Ok(endpoint)
            }
            Err(AutomationError::Cancelled) => Err(AutomationError::Cancelled),
            Err(e) => {
                state.last_failed_discovery = Some(Instant::now());
                Err(e)
            }
        }
    }

    /// A restarted process comes back under a new PID, so once a PID-bound
    /// client has lost its endpoint it widens the search to every local
    /// listener that answers with the bridge signature.
    async fn discover_target(
        &self,
        state: &EndpointState,
        cancel: Option<&CancellationToken>,
    ) -> Result<Endpoint> {
        let result = self.discovery.discover(&self.target, cancel).await;
        let follows_restarts =
            matches!(self.target, ProcessTarget::Pid(_)) && state.endpoint.is_some();
        match result {
            Err(AutomationError::DiscoveryFailure { .. }) if follows_restarts => {
                tracing::warn!(
                    target_process = %self.target,
                    "no bridge owned by the target pid, searching all local listeners"
                );
                self.discovery.discover(&ProcessTarget::Any, cancel).await
            }
            other => other,
        }
    }

    pub async fn list_forms(&self) -> Result<Vec<BridgeForm>> {
        let value = self.request(&BridgeRequest::ListForms).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn active_form_controls(&self) -> Result<Vec<ControlNode>> {
        let value = self.request(&BridgeRequest::ActiveFormControls).await?;
        parse_controls(value)
    }

    pub async fn form_controls(&self, handle: i64) -> Result<Vec<ControlNode>> {
        let value = self.request(&BridgeRequest::FormControls { handle }).await?;
        parse_controls(value)
    }

    /// Flat query across every form.
    pub async fn controls(&self, query: ControlQuery) -> Result<Vec<ControlNode>> {
        let value = self.request(&BridgeRequest::Controls(query)).await?;
        parse_controls(value)
    }

    pub async fn click(&self, target: ClickTarget) -> Result<Value> {
        self.request(&BridgeRequest::Click(target)).await
    }

    pub async fn set_text(&self, name: &str, text: &str) -> Result<Value> {
        self.request(&BridgeRequest::SetText {
            name: name.to_string(),
            text: text.to_string(),
        })
        .await
    }

    pub async fn geometry(&self, name: &str) -> Result<Rect> {
        let value = self
            .request(&BridgeRequest::Geometry {
                name: name.to_string(),
            })
            .await?;
        let geometry: ControlGeometry = serde_json::from_value(value)?;
        Rect::try_from(geometry)
    }

    /// Snapshot of the form the bridge marks active. Falls back to
    /// `/activeform/controls` when no form carries the flag.
    pub async fn active_form_context(&self, filter: &ElementFilter) -> Result<FormContext> {
        let forms = self.list_forms().await?;
        let (form_id, nodes) = match forms.iter().find(|f| f.active) {
            Some(form) => (form.handle.to_string(), self.form_controls(form.handle).await?),
            None => (
                ACTIVE_FORM_FALLBACK_ID.to_string(),
                self.active_form_controls().await?,
            ),
        };
        Ok(FormContext {
            elements: flatten_bridge_nodes(&nodes, &form_id, filter),
            form_id,
            source: ElementSource::Bridge,
        })
    }

    /// One snapshot per form, in the order the bridge lists them.
    pub async fn form_contexts(&self, filter: &ElementFilter) -> Result<Vec<FormContext>> {
        let forms = self.list_forms().await?;
        let mut contexts = Vec::with_capacity(forms.len());
        for form in forms {
            let form_id = form.handle.to_string();
            let nodes = self.form_controls(form.handle).await?;
            contexts.push(FormContext {
                elements: flatten_bridge_nodes(&nodes, &form_id, filter),
                form_id,
                source: ElementSource::Bridge,
            });
        }
        Ok(contexts)
    }
}

fn transport_error(endpoint: &Endpoint, err: &reqwest::Error) -> AutomationError {
    if err.is_decode() {
        return AutomationError::BridgeProtocol(err.to_string());
    }
    let kind = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    AutomationError::Transport {
        endpoint: endpoint.to_string(),
        message: format!("{kind}: {err}"),
    }
}
