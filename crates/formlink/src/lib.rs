//! Desktop form automation through an embedded introspection bridge
//!
//! The target application hosts a small HTTP bridge that reports its forms and
//! controls. This crate finds that bridge among the process's listening ports,
//! resolves controls against it, falls back to the OS accessibility tree when
//! the bridge is silent, spots native dialogs the bridge cannot see, and drives
//! physical input at the resolved coordinates.

use std::sync::{Arc, RwLock};
use tracing::{info, instrument};

pub mod batch;
pub mod bridge;
pub mod config;
pub mod dialog;
pub mod element;
pub mod errors;
pub mod filter;
pub mod geometry;
pub mod platforms;
pub mod report;
pub mod resolver;
pub mod selector;
#[cfg(test)]
mod tests;
pub mod utils;

pub use batch::{BatchExecutor, BatchResult, BatchStep, ExecutorOptions, Operation, OperationKind, StepOutcome};
pub use bridge::{BridgeClient, Endpoint, EndpointDiscovery, EndpointProbe, ProcessTarget};
pub use config::FormlinkConfig;
pub use dialog::{DialogDescriptor, NativeDialogDetector};
pub use element::{ElementDescriptor, ElementSource, FormContext};
pub use errors::{AutomationError, Result};
pub use filter::ElementFilter;
pub use geometry::{Anchor, Point, Rect};
pub use platforms::Platform;
pub use report::ActiveFormReport;
pub use resolver::{ElementResolver, Resolution, ResolveOptions, SourceAttempt};
pub use selector::{MatchPolicy, Scope, Selector, SourcePreference};
pub use tokio_util::sync::CancellationToken;
pub use utils::find_pids_for_process;

/// Everything needed to automate one target process.
///
/// Owns the bridge client (and through it the cached endpoint), the resolver,
/// the dialog detector and the input driver. Cheap to share behind an `Arc`.
pub struct Session {
    config: FormlinkConfig,
    bridge: Arc<BridgeClient>,
    resolver: Arc<ElementResolver>,
    detector: Arc<NativeDialogDetector>,
    input: Arc<dyn platforms::InputDriver>,
    /// Cancellation token for batches started through the session (RwLock to allow reset)
    cancellation_token: Arc<RwLock<CancellationToken>>,
}

impl Session {
    /// Session against the native platform of this OS.
    #[instrument(skip(config))]
    pub fn new(target: ProcessTarget, config: FormlinkConfig) -> Result<Self> {
        Self::with_platform(target, config, Platform::native()?)
    }

    /// Session against explicit platform collaborators.
    pub fn with_platform(
        target: ProcessTarget,
        config: FormlinkConfig,
        platform: Platform,
    ) -> Result<Self> {
        config.validate()?;

        // The bridge only ever listens on a local address; a system proxy would swallow it.
        let http = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| AutomationError::PlatformError(format!("failed to build HTTP client: {e}")))?;

        let probe = EndpointProbe::new(
            http.clone(),
            config.bridge.host.clone(),
            config.discovery_options().per_probe_timeout,
        );
        let discovery = EndpointDiscovery::new(platform.listeners.clone(), probe, config.discovery_options());
        let bridge = Arc::new(BridgeClient::new(
            http,
            target.clone(),
            discovery,
            config.client_options(),
        ));
        let resolver = Arc::new(ElementResolver::new(
            Some(bridge.clone()),
            platform.tree.clone(),
            target.clone(),
        ));
        let detector = Arc::new(NativeDialogDetector::new(platform.windows.clone()));

        info!(%target, host = %config.bridge.host, "formlink session created");
        Ok(Self {
            config,
            bridge,
            resolver,
            detector,
            input: platform.input,
            cancellation_token: Arc::new(RwLock::new(CancellationToken::new())),
        })
    }

    pub fn config(&self) -> &FormlinkConfig {
        &self.config
    }

    pub fn target(&self) -> &ProcessTarget {
        self.bridge.target()
    }

    pub fn bridge(&self) -> &Arc<BridgeClient> {
        &self.bridge
    }

    pub fn resolver(&self) -> &Arc<ElementResolver> {
        &self.resolver
    }

    pub fn dialog_detector(&self) -> &Arc<NativeDialogDetector> {
        &self.detector
    }

    /// Cached endpoint, or a fresh discovery.
    #[instrument(skip(self))]
    pub async fn discover(&self) -> Result<Endpoint> {
        let cancel = self.cancellation_token();
        self.bridge.connect(Some(&cancel)).await
    }

    /// Scope, source and filter defaults from the configuration.
    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            scope: self.config.resolver.default_scope,
            source: self.config.resolver.source_preference,
            filter: self.config.resolver.filter,
            match_policy: MatchPolicy::default(),
        }
    }

    pub async fn resolve(&self, selector: &Selector, options: &ResolveOptions) -> Result<Resolution> {
        self.resolver.resolve(selector, options).await
    }

    pub async fn resolve_one(
        &self,
        selector: &Selector,
        options: &ResolveOptions,
    ) -> Result<ElementDescriptor> {
        self.resolver.resolve_one(selector, options).await
    }

    /// Waits up to `timeout` for `selector` to match; stops early on [`Session::stop_execution`].
    pub async fn wait_for(
        &self,
        selector: &Selector,
        options: &ResolveOptions,
        timeout: std::time::Duration,
    ) -> Result<ElementDescriptor> {
        let cancel = self.cancellation_token();
        tokio::select! {
            _ = cancel.cancelled() => Err(AutomationError::Cancelled),
            r = self.resolver.wait_for(selector, options, timeout) => r,
        }
    }

    /// Controls of the active form, with any native dialog blocking it.
    ///
    /// `filter` falls back to the configured one when `None`.
    #[instrument(skip(self, filter))]
    pub async fn active_form_report(&self, filter: Option<ElementFilter>) -> Result<ActiveFormReport> {
        let filter = filter.unwrap_or(self.config.resolver.filter);
        let owner = self.resolver.process_id().await;
        let native_dialog = match self.detector.detect_blocking_dialog(owner).await {
            Ok(dialog) => dialog,
            Err(e) => {
                tracing::warn!(error = %e, "native dialog scan failed");
                None
            }
        };

        let (context, attempts) = self
            .resolver
            .active_form(self.config.resolver.source_preference, &filter)
            .await?;
        info!(
            form = %context.form_id,
            source = %context.source,
            controls = context.elements.len(),
            blocked = native_dialog.is_some(),
            "active form report"
        );
        Ok(ActiveFormReport::new(context, attempts, native_dialog))
    }

    /// First visible native dialog of the target process.
    pub async fn detect_blocking_dialog(&self) -> Result<Option<DialogDescriptor>> {
        let owner = self.resolver.process_id().await;
        self.detector.detect_blocking_dialog(owner).await
    }

    /// Every visible native dialog of the target process.
    pub async fn detect_dialogs(&self) -> Result<Vec<DialogDescriptor>> {
        let owner = self.resolver.process_id().await;
        self.detector.detect_all(owner).await
    }

    /// Screen point for `anchor` on `rect`, using the configured inset.
    pub fn point_for(&self, rect: &Rect, anchor: Anchor) -> Point {
        geometry::point_for_with_inset(rect, anchor, self.config.input.anchor_inset)
    }

    pub fn executor(&self) -> BatchExecutor {
        let options = ExecutorOptions {
            resolve: self.resolve_options(),
            anchor_inset: self.config.input.anchor_inset,
            default_wait: self.config.default_wait(),
            focus_settle: std::time::Duration::from_millis(self.config.input.focus_settle_ms),
            dialog_guard: self.config.dialog_guard,
        };
        BatchExecutor::new(
            self.resolver.clone(),
            self.input.clone(),
            Some(self.detector.clone()),
            options,
        )
    }

    /// Runs `steps` in order, stopping at the first failure or at `stop_execution`.
    ///
    /// `scope` falls back to the configured default scope.
    pub async fn run_batch(&self, steps: &[BatchStep], scope: Option<Scope>) -> BatchResult {
        let cancel = self.cancellation_token();
        self.run_batch_with_cancel(steps, scope, &cancel).await
    }

    pub async fn run_batch_with_cancel(
        &self,
        steps: &[BatchStep],
        scope: Option<Scope>,
        cancel: &CancellationToken,
    ) -> BatchResult {
        let scope = scope.unwrap_or(self.config.resolver.default_scope);
        self.executor().run_with_cancel(steps, scope, cancel).await
    }

    /// Cancels every discovery and batch running through this session.
    pub fn stop_execution(&self) {
        info!("stop_execution called, cancelling session operations");
        if let Ok(token) = self.cancellation_token.read() {
            token.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token
            .read()
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token
            .read()
            .map(|t| t.clone())
            .unwrap_or_else(|_| CancellationToken::new())
    }

    /// Clears a previous `stop_execution` so new operations can run.
    pub fn reset_cancellation(&self) {
        if let Ok(mut token) = self.cancellation_token.write() {
            *token = CancellationToken::new();
        }
    }
}
