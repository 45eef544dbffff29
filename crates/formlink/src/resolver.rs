//! Element resolution across the bridge and the accessibility tree.
//!
//! A query resolves entirely from one source: strategies run in order and the
//! first one that yields matches wins. Empty results and errors both fall
//! through to the next strategy and are recorded as attempts, except a
//! transport failure on a live bridge endpoint, which fails the call so the
//! caller sees it while the client rediscovers in the background.

use crate::bridge::{BridgeClient, ProcessTarget};
use crate::element::{ElementDescriptor, ElementSource, FormContext};
use crate::errors::{AutomationError, Result};
use crate::filter::{flatten_accessible, ElementFilter};
use crate::platforms::{AccessibilityTree, AccessibleNode};
use crate::selector::{MatchPolicy, Scope, Selector, SourcePreference};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Gap between resolutions while waiting for an element to appear.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-call resolution settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveOptions {
    pub scope: Scope,
    pub source: SourcePreference,
    pub filter: ElementFilter,
    pub match_policy: MatchPolicy,
}

/// What one strategy produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum AttemptOutcome {
    Matched(usize),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAttempt {
    pub source: ElementSource,
    pub outcome: AttemptOutcome,
}

impl fmt::Display for SourceAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::Matched(n) => write!(f, "{}: {} match(es)", self.source, n),
            AttemptOutcome::Failed(e) => write!(f, "{}: error: {}", self.source, e),
        }
    }
}

/// Result of a resolution: the elements from the winning source plus every attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// `None` when no strategy matched.
    pub source: Option<ElementSource>,
    pub elements: Vec<ElementDescriptor>,
    pub attempts: Vec<SourceAttempt>,
}

/// One source of form snapshots.
#[async_trait]
pub trait ResolutionStrategy: Send + Sync {
    fn source(&self) -> ElementSource;

    /// Snapshots in scope: the active form only, or every form.
    async fn snapshot(&self, scope: Scope, filter: &ElementFilter) -> Result<Vec<FormContext>>;
}

/// Snapshots from the embedded bridge.
pub struct BridgeStrategy {
    client: Arc<BridgeClient>,
}

impl BridgeStrategy {
    pub fn new(client: Arc<BridgeClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResolutionStrategy for BridgeStrategy {
    fn source(&self) -> ElementSource {
        ElementSource::Bridge
    }

    async fn snapshot(&self, scope: Scope, filter: &ElementFilter) -> Result<Vec<FormContext>> {
        match scope {
            Scope::ActiveForm => Ok(vec![self.client.active_form_context(filter).await?]),
            Scope::Global => self.client.form_contexts(filter).await,
        }
    }
}

/// Snapshots from the OS accessibility tree.
pub struct AccessibilityStrategy {
    tree: Arc<dyn AccessibilityTree>,
    process_id: Option<u32>,
}

impl AccessibilityStrategy {
    pub fn new(tree: Arc<dyn AccessibilityTree>, process_id: Option<u32>) -> Self {
        Self { tree, process_id }
    }
}

#[async_trait]
impl ResolutionStrategy for AccessibilityStrategy {
    fn source(&self) -> ElementSource {
        ElementSource::Accessibility
    }

    async fn snapshot(&self, scope: Scope, filter: &ElementFilter) -> Result<Vec<FormContext>> {
        let windows: Vec<AccessibleNode> = match scope {
            Scope::ActiveForm => self
                .tree
                .active_window(self.process_id)
                .await?
                .into_iter()
                .collect(),
            Scope::Global => self.tree.top_level_windows(self.process_id).await?,
        };
        Ok(windows
            .iter()
            .map(|window| FormContext {
                form_id: window.window_id.clone(),
                source: ElementSource::Accessibility,
                elements: flatten_accessible(window, &window.window_id, filter),
            })
            .collect())
    }
}

/// Ordered fallback over strategies.
pub struct ResolutionChain {
    strategies: Vec<Arc<dyn ResolutionStrategy>>,
}

impl ResolutionChain {
    pub fn new(strategies: Vec<Arc<dyn ResolutionStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub async fn resolve(
        &self,
        selector: &Selector,
        scope: Scope,
        filter: &ElementFilter,
    ) -> Result<Resolution> {
        let mut attempts = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            let source = strategy.source();
            match strategy.snapshot(scope, filter).await {
                Ok(contexts) => {
                    let elements: Vec<ElementDescriptor> = contexts
                        .into_iter()
                        .flat_map(|c| c.elements)
                        .filter(|e| selector.matches(e))
                        .collect();
                    tracing::debug!(%source, matched = elements.len(), "resolution attempt");
                    attempts.push(SourceAttempt {
                        source,
                        outcome: AttemptOutcome::Matched(elements.len()),
                    });
                    if !elements.is_empty() {
                        return Ok(Resolution {
                            source: Some(source),
                            elements,
                            attempts,
                        });
                    }
                }
                Err(AutomationError::Cancelled) => return Err(AutomationError::Cancelled),
                Err(e) if e.is_transport() => {
                    tracing::warn!(%source, error = %e, "resolution aborted by transport failure");
                    return Err(e);
                }
                Err(e) => {
                    tracing::debug!(%source, error = %e, "resolution attempt failed");
                    attempts.push(SourceAttempt {
                        source,
                        outcome: AttemptOutcome::Failed(e.to_string()),
                    });
                }
            }
        }
        Ok(Resolution {
            source: None,
            elements: Vec::new(),
            attempts,
        })
    }
}

/// Builds the strategy chain for a query and applies match policies.
pub struct ElementResolver {
    bridge: Option<Arc<BridgeClient>>,
    tree: Arc<dyn AccessibilityTree>,
    target: ProcessTarget,
}

impl ElementResolver {
    pub fn new(
        bridge: Option<Arc<BridgeClient>>,
        tree: Arc<dyn AccessibilityTree>,
        target: ProcessTarget,
    ) -> Self {
        Self {
            bridge,
            tree,
            target,
        }
    }

    /// PID whose windows the accessibility walk covers. The bridge endpoint's
    /// owner wins so a restarted target is followed; `None` means the foreground app.
    pub async fn process_id(&self) -> Option<u32> {
        if let Some(client) = &self.bridge {
            if let Some(pid) = client.endpoint().await.and_then(|e| e.process_id) {
                return Some(pid);
            }
        }
        match &self.target {
            ProcessTarget::Pid(pid) => Some(*pid),
            ProcessTarget::Name(_) => self.target.resolve_pid(),
            ProcessTarget::Any => None,
        }
    }

    pub async fn chain(&self, preference: SourcePreference) -> ResolutionChain {
        let mut strategies: Vec<Arc<dyn ResolutionStrategy>> = Vec::new();
        if preference != SourcePreference::AccessibilityOnly {
            if let Some(client) = &self.bridge {
                strategies.push(Arc::new(BridgeStrategy::new(client.clone())));
            }
        }
        if preference != SourcePreference::BridgeOnly {
            strategies.push(Arc::new(AccessibilityStrategy::new(
                self.tree.clone(),
                self.process_id().await,
            )));
        }
        ResolutionChain::new(strategies)
    }

    /// Every element matching `selector`, from a single source, in snapshot order.
    #[tracing::instrument(skip(self, selector, options), fields(selector = %selector, scope = ?options.scope))]
    pub async fn resolve(&self, selector: &Selector, options: &ResolveOptions) -> Result<Resolution> {
        selector.validate()?;
        if let Some(point) = selector.point {
            return Ok(Resolution {
                source: Some(ElementSource::Coordinates),
                elements: vec![ElementDescriptor::synthetic_point(point)],
                attempts: Vec::new(),
            });
        }
        self.chain(options.source)
            .await
            .resolve(selector, options.scope, &options.filter)
            .await
    }

    /// Exactly one element chosen by `options.match_policy`.
    pub async fn resolve_one(
        &self,
        selector: &Selector,
        options: &ResolveOptions,
    ) -> Result<ElementDescriptor> {
        let resolution = self.resolve(selector, options).await?;
        pick(selector, resolution, options.match_policy)
    }

    /// Resolves repeatedly until something matches or `timeout` elapses and
    /// returns the last resolution either way. A zero timeout resolves once.
    pub async fn resolve_within(
        &self,
        selector: &Selector,
        options: &ResolveOptions,
        timeout: Duration,
    ) -> Result<Resolution> {
        let deadline = Instant::now() + timeout;
        loop {
            let resolution = self.resolve(selector, options).await?;
            let now = Instant::now();
            if !resolution.elements.is_empty() || now >= deadline {
                return Ok(resolution);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// [`ElementResolver::resolve_one`] that keeps polling until the element
    /// appears, failing with `ElementNotFound` once `timeout` has passed.
    #[tracing::instrument(skip(self, selector, options), fields(selector = %selector))]
    pub async fn wait_for(
        &self,
        selector: &Selector,
        options: &ResolveOptions,
        timeout: Duration,
    ) -> Result<ElementDescriptor> {
        let resolution = self.resolve_within(selector, options, timeout).await?;
        if resolution.elements.is_empty() {
            return Err(AutomationError::ElementNotFound {
                selector: format!("{selector} within {}ms", timeout.as_millis()),
                attempts: resolution.attempts,
            });
        }
        pick(selector, resolution, options.match_policy)
    }

    /// Snapshot of the active form, from the first source that answers.
    pub async fn active_form(
        &self,
        preference: SourcePreference,
        filter: &ElementFilter,
    ) -> Result<(FormContext, Vec<SourceAttempt>)> {
        let chain = self.chain(preference).await;
        let mut attempts = Vec::new();
        for strategy in &chain.strategies {
            match strategy.snapshot(Scope::ActiveForm, filter).await {
                Ok(mut contexts) if !contexts.is_empty() => {
                    let context = contexts.remove(0);
                    attempts.push(SourceAttempt {
                        source: strategy.source(),
                        outcome: AttemptOutcome::Matched(context.elements.len()),
                    });
                    return Ok((context, attempts));
                }
                Ok(_) => attempts.push(SourceAttempt {
                    source: strategy.source(),
                    outcome: AttemptOutcome::Matched(0),
                }),
                Err(e) if e.is_transport() || matches!(e, AutomationError::Cancelled) => {
                    return Err(e)
                }
                Err(e) => attempts.push(SourceAttempt {
                    source: strategy.source(),
                    outcome: AttemptOutcome::Failed(e.to_string()),
                }),
            }
        }
        Err(AutomationError::ElementNotFound {
            selector: "active form".to_string(),
            attempts,
        })
    }
}

fn pick(selector: &Selector, resolution: Resolution, policy: MatchPolicy) -> Result<ElementDescriptor> {
    let Resolution {
        mut elements,
        attempts,
        ..
    } = resolution;
    if elements.is_empty() {
        return Err(AutomationError::ElementNotFound {
            selector: selector.to_string(),
            attempts,
        });
    }
    match policy {
        MatchPolicy::Unique if elements.len() > 1 => Err(AutomationError::AmbiguousMatch {
            selector: selector.to_string(),
            candidates: elements,
        }),
        MatchPolicy::Unique | MatchPolicy::First => Ok(elements.swap_remove(0)),
        MatchPolicy::Nth(n) if n < elements.len() => Ok(elements.swap_remove(n)),
        MatchPolicy::Nth(n) => Err(AutomationError::ElementNotFound {
            selector: format!("{selector} (index {n} of {} matches)", elements.len()),
            attempts,
        }),
    }
}
