//! Sequential multi-step interactions with stop-at-first-failure semantics.

use crate::dialog::NativeDialogDetector;
use crate::element::ElementDescriptor;
use crate::errors::{AutomationError, Result};
use crate::geometry::{point_for_with_inset, Anchor, Point, DEFAULT_ANCHOR_INSET};
use crate::platforms::{InputDriver, MouseButton};
use crate::resolver::{ElementResolver, ResolveOptions};
use crate::selector::{MatchPolicy, Scope, Selector};
use crate::utils::text_matches;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default pause after each step.
pub const DEFAULT_WAIT_AFTER: Duration = Duration::from_millis(100);

const DEFAULT_WAIT_STEP: Duration = Duration::from_millis(500);

/// How long `wait_for` polls when the step gives no `timeout`.
pub const DEFAULT_WAIT_FOR_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Click,
    DoubleClick,
    RightClick,
    Hover,
    SetText,
    GetText,
    Rect,
    Info,
    Visible,
    Enabled,
    Exists,
    WaitFor,
    VerifyText,
    Wait,
    DismissDialog,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Click => "click",
            OperationKind::DoubleClick => "double_click",
            OperationKind::RightClick => "right_click",
            OperationKind::Hover => "hover",
            OperationKind::SetText => "set_text",
            OperationKind::GetText => "get_text",
            OperationKind::Rect => "rect",
            OperationKind::Info => "info",
            OperationKind::Visible => "visible",
            OperationKind::Enabled => "enabled",
            OperationKind::Exists => "exists",
            OperationKind::WaitFor => "wait_for",
            OperationKind::VerifyText => "verify_text",
            OperationKind::Wait => "wait",
            OperationKind::DismissDialog => "dismiss_dialog",
        }
    }

    /// Whether the step needs an element selector.
    pub fn targets_element(&self) -> bool {
        !matches!(self, OperationKind::Wait | OperationKind::DismissDialog)
    }

    /// Whether the step accepts a `timeout`.
    pub fn polls(&self) -> bool {
        matches!(self, OperationKind::Exists | OperationKind::WaitFor)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operation together with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Click,
    DoubleClick,
    RightClick,
    Hover,
    SetText { text: String },
    GetText,
    Rect,
    /// The whole resolved descriptor.
    Info,
    Visible,
    Enabled,
    /// `true`/`false`; with a timeout, polls until the element appears.
    Exists { timeout: Option<Duration> },
    /// Fails when the element has not appeared within `timeout`.
    WaitFor { timeout: Duration },
    VerifyText { expected: String, exact: bool },
    Wait { duration: Duration },
    /// Clicks the dialog button with this caption, or the first enabled button when `None`.
    DismissDialog { button: Option<String> },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Click => OperationKind::Click,
            Operation::DoubleClick => OperationKind::DoubleClick,
            Operation::RightClick => OperationKind::RightClick,
            Operation::Hover => OperationKind::Hover,
            Operation::SetText { .. } => OperationKind::SetText,
            Operation::GetText => OperationKind::GetText,
            Operation::Rect => OperationKind::Rect,
            Operation::Info => OperationKind::Info,
            Operation::Visible => OperationKind::Visible,
            Operation::Enabled => OperationKind::Enabled,
            Operation::Exists { .. } => OperationKind::Exists,
            Operation::WaitFor { .. } => OperationKind::WaitFor,
            Operation::VerifyText { .. } => OperationKind::VerifyText,
            Operation::Wait { .. } => OperationKind::Wait,
            Operation::DismissDialog { .. } => OperationKind::DismissDialog,
        }
    }
}

/// One step of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawStep")]
pub struct BatchStep {
    pub operation: Operation,
    pub selector: Selector,
    pub anchor: Anchor,
    /// `None` uses the executor default.
    pub wait_after: Option<Duration>,
    pub scope: Option<Scope>,
    pub match_policy: MatchPolicy,
}

impl BatchStep {
    pub fn new(operation: Operation, selector: Selector) -> Self {
        Self {
            operation,
            selector,
            anchor: Anchor::Center,
            wait_after: None,
            scope: None,
            match_policy: MatchPolicy::Unique,
        }
    }

    pub fn with_anchor(mut self, anchor: Anchor) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait_after = Some(wait);
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_match_policy(mut self, policy: MatchPolicy) -> Self {
        self.match_policy = policy;
        self
    }
}

/// Step as written in JSON/YAML: `{op, id?, title?, class_name?, control_type?,
/// control_id?, x?, y?, text?, anchor?, wait?, timeout?, scope?, match?}`.
///
/// `title` is the element caption; `text` is the value for `set_text`,
/// `verify_text` and `dismiss_dialog`. `wait` and `timeout` are in seconds;
/// only `exists` and `wait_for` take a timeout.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStep {
    op: OperationKind,
    #[serde(default, alias = "automation_id")]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, alias = "class")]
    class_name: Option<String>,
    #[serde(default)]
    control_type: Option<String>,
    #[serde(default)]
    control_id: Option<i64>,
    #[serde(default)]
    x: Option<i32>,
    #[serde(default)]
    y: Option<i32>,
    #[serde(default)]
    selector: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    exact: Option<bool>,
    #[serde(default)]
    anchor: Option<Anchor>,
    #[serde(default)]
    wait: Option<f64>,
    #[serde(default)]
    timeout: Option<f64>,
    #[serde(default)]
    scope: Option<Scope>,
    #[serde(default, rename = "match")]
    match_policy: Option<String>,
}

impl TryFrom<RawStep> for BatchStep {
    type Error = AutomationError;

    fn try_from(raw: RawStep) -> Result<Self> {
        let wait = seconds("wait", raw.wait)?;
        let timeout = seconds("timeout", raw.timeout)?;
        if timeout.is_some() && !raw.op.polls() {
            return Err(AutomationError::InvalidArgument(format!(
                "'{}' does not take a timeout",
                raw.op
            )));
        }

        let mut selector = match &raw.selector {
            Some(s) => s.parse::<Selector>()?,
            None => Selector::default(),
        };
        merge(&mut selector.automation_id, raw.id)?;
        merge(&mut selector.text, raw.title)?;
        merge(&mut selector.class_name, raw.class_name)?;
        merge(&mut selector.control_type, raw.control_type)?;
        merge(&mut selector.control_id, raw.control_id)?;
        match (raw.x, raw.y) {
            (Some(x), Some(y)) => merge(&mut selector.point, Some(Point::new(x, y)))?,
            (None, None) => {}
            _ => {
                return Err(AutomationError::InvalidArgument(
                    "coordinates need both x and y".to_string(),
                ))
            }
        }

        let exact = raw.exact.unwrap_or(true);
        let required_text = |what: &str| {
            raw.text.clone().ok_or_else(|| {
                AutomationError::InvalidArgument(format!("'{what}' needs a 'text' value"))
            })
        };
        let (operation, wait_after) = match raw.op {
            OperationKind::Click => (Operation::Click, wait),
            OperationKind::DoubleClick => (Operation::DoubleClick, wait),
            OperationKind::RightClick => (Operation::RightClick, wait),
            OperationKind::Hover => (Operation::Hover, wait),
            OperationKind::SetText => (
                Operation::SetText {
                    text: required_text("set_text")?,
                },
                wait,
            ),
            OperationKind::GetText => (Operation::GetText, wait),
            OperationKind::Rect => (Operation::Rect, wait),
            OperationKind::Info => (Operation::Info, wait),
            OperationKind::Visible => (Operation::Visible, wait),
            OperationKind::Enabled => (Operation::Enabled, wait),
            OperationKind::Exists => (Operation::Exists { timeout }, wait),
            OperationKind::WaitFor => (
                Operation::WaitFor {
                    timeout: timeout.unwrap_or(DEFAULT_WAIT_FOR_TIMEOUT),
                },
                wait,
            ),
            OperationKind::VerifyText => (
                Operation::VerifyText {
                    expected: required_text("verify_text")?,
                    exact,
                },
                wait,
            ),
            // the wait value is the delay itself
            OperationKind::Wait => (
                Operation::Wait {
                    duration: wait.unwrap_or(DEFAULT_WAIT_STEP),
                },
                Some(Duration::ZERO),
            ),
            OperationKind::DismissDialog => (
                Operation::DismissDialog {
                    button: raw.text.clone().filter(|t| !t.trim().is_empty()),
                },
                wait,
            ),
        };
        if raw.op != OperationKind::VerifyText {
            selector.exact = exact && selector.exact;
        }
        if raw.op.targets_element() {
            selector.validate()?;
        }

        let match_policy = match raw.match_policy {
            Some(m) => m.parse()?,
            None => MatchPolicy::Unique,
        };

        Ok(BatchStep {
            operation,
            selector,
            anchor: raw.anchor.unwrap_or_default(),
            wait_after,
            scope: raw.scope,
            match_policy,
        })
    }
}

fn seconds(field: &str, value: Option<f64>) -> Result<Option<Duration>> {
    match value {
        Some(secs) if !secs.is_finite() || secs < 0.0 => Err(AutomationError::InvalidArgument(
            format!("{field} must be a non-negative number of seconds, got {secs}"),
        )),
        Some(secs) => Ok(Some(Duration::from_secs_f64(secs))),
        None => Ok(None),
    }
}

fn merge<T>(slot: &mut Option<T>, value: Option<T>) -> Result<()> {
    match (slot.is_some(), value) {
        (true, Some(_)) => Err(AutomationError::InvalidSelector(
            "field given both in 'selector' and as a separate key".to_string(),
        )),
        (_, Some(v)) => {
            *slot = Some(v);
            Ok(())
        }
        (_, None) => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: String,
    pub message: String,
}

impl From<&AutomationError> for StepError {
    fn from(err: &AutomationError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub index: usize,
    pub operation: OperationKind,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

/// Outcomes in step order, truncated after the first failure.
#[derive(Debug, Default, Serialize)]
pub struct BatchResult {
    pub outcomes: Vec<StepOutcome>,
    #[serde(skip)]
    failure: Option<AutomationError>,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn failed_step(&self) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|o| !o.success)
    }

    pub fn error(&self) -> Option<&AutomationError> {
        self.failure.as_ref()
    }

    /// The outcomes, or a [`AutomationError::BatchStepFailure`] wrapping the cause.
    pub fn into_result(self) -> Result<Vec<StepOutcome>> {
        let Some(cause) = self.failure else {
            return Ok(self.outcomes);
        };
        let (index, operation) = self
            .outcomes
            .last()
            .map(|o| (o.index, o.operation.to_string()))
            .unwrap_or((0, String::new()));
        Err(AutomationError::BatchStepFailure {
            index,
            operation,
            source: Box::new(cause),
        })
    }
}

/// Executor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Source and filter for every step; scope and match policy come from the step.
    pub resolve: ResolveOptions,
    pub anchor_inset: i32,
    pub default_wait: Duration,
    pub focus_settle: Duration,
    /// Fail element steps while a native dialog of the target is open.
    pub dialog_guard: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            resolve: ResolveOptions::default(),
            anchor_inset: DEFAULT_ANCHOR_INSET,
            default_wait: DEFAULT_WAIT_AFTER,
            focus_settle: Duration::from_millis(150),
            dialog_guard: false,
        }
    }
}

pub struct BatchExecutor {
    resolver: Arc<ElementResolver>,
    input: Arc<dyn InputDriver>,
    detector: Option<Arc<NativeDialogDetector>>,
    options: ExecutorOptions,
}

impl BatchExecutor {
    pub fn new(
        resolver: Arc<ElementResolver>,
        input: Arc<dyn InputDriver>,
        detector: Option<Arc<NativeDialogDetector>>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            resolver,
            input,
            detector,
            options,
        }
    }

    pub async fn run(&self, steps: &[BatchStep], default_scope: Scope) -> BatchResult {
        self.run_with_cancel(steps, default_scope, &CancellationToken::new())
            .await
    }

    #[tracing::instrument(skip(self, steps, cancel), fields(steps = steps.len()))]
    pub async fn run_with_cancel(
        &self,
        steps: &[BatchStep],
        default_scope: Scope,
        cancel: &CancellationToken,
    ) -> BatchResult {
        let owner = self.resolver.process_id().await;
        let mut result = BatchResult::default();

        for (index, step) in steps.iter().enumerate() {
            let kind = step.operation.kind();
            let outcome = if cancel.is_cancelled() {
                Err(AutomationError::Cancelled)
            } else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(AutomationError::Cancelled),
                    r = self.execute(step, default_scope, owner) => r,
                }
            };

            match outcome {
                Ok(value) => {
                    tracing::debug!(step = index, op = %kind, "batch step succeeded");
                    result.outcomes.push(StepOutcome {
                        index,
                        operation: kind,
                        success: true,
                        value,
                        error: None,
                    });
                }
                Err(err) => {
                    tracing::warn!(step = index, op = %kind, error = %err, "batch step failed, stopping");
                    result.outcomes.push(StepOutcome {
                        index,
                        operation: kind,
                        success: false,
                        value: None,
                        error: Some(StepError::from(&err)),
                    });
                    result.failure = Some(err);
                    break;
                }
            }

            let wait = step.wait_after.unwrap_or(self.options.default_wait);
            if !wait.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }
        result
    }

    async fn execute(
        &self,
        step: &BatchStep,
        default_scope: Scope,
        owner: Option<u32>,
    ) -> Result<Option<Value>> {
        if self.options.dialog_guard && step.operation.kind().targets_element() {
            if let Some(detector) = &self.detector {
                if let Some(dialog) = detector.detect_blocking_dialog(owner).await? {
                    return Err(AutomationError::BlockingDialogDetected(Box::new(dialog)));
                }
            }
        }

        let mut options = ResolveOptions {
            scope: step.scope.unwrap_or(default_scope),
            match_policy: step.match_policy,
            ..self.options.resolve
        };
        if matches!(step.operation, Operation::Visible | Operation::Info) {
            // a hidden control must still resolve to report that it is hidden
            options.filter.include_hidden = true;
        }

        match &step.operation {
            Operation::Wait { duration } => {
                tokio::time::sleep(*duration).await;
                Ok(None)
            }
            Operation::DismissDialog { button } => self.dismiss_dialog(owner, button.as_deref()).await,
            Operation::Exists { timeout } => {
                let resolution = self
                    .resolver
                    .resolve_within(&step.selector, &options, timeout.unwrap_or_default())
                    .await?;
                Ok(Some(json!(!resolution.elements.is_empty())))
            }
            Operation::WaitFor { timeout } => {
                let element = self.resolver.wait_for(&step.selector, &options, *timeout).await?;
                Ok(Some(serde_json::to_value(&element)?))
            }
            operation => {
                let element = self.resolver.resolve_one(&step.selector, &options).await?;
                self.perform(operation, step.anchor, &element).await
            }
        }
    }

    async fn perform(
        &self,
        operation: &Operation,
        anchor: Anchor,
        element: &ElementDescriptor,
    ) -> Result<Option<Value>> {
        let point = point_for_with_inset(&element.bounding_rect, anchor, self.options.anchor_inset);
        match operation {
            Operation::Click => self.click(element, point, MouseButton::Left, 1).await,
            Operation::DoubleClick => self.click(element, point, MouseButton::Left, 2).await,
            Operation::RightClick => self.click(element, point, MouseButton::Right, 1).await,
            Operation::Hover => {
                self.input.move_to(point).await?;
                Ok(Some(json!({ "element": element.label(), "x": point.x, "y": point.y })))
            }
            Operation::SetText { text } => {
                self.input.click(point, MouseButton::Left, 1).await?;
                tokio::time::sleep(self.options.focus_settle).await;
                self.input.replace_text(text).await?;
                Ok(Some(json!({ "element": element.label(), "text": text })))
            }
            Operation::GetText => Ok(Some(Value::String(element.display_text.clone()))),
            Operation::Rect => Ok(Some(serde_json::to_value(element.bounding_rect)?)),
            Operation::Info => Ok(Some(serde_json::to_value(element)?)),
            Operation::Visible => Ok(Some(json!(element.is_visible))),
            Operation::Enabled => Ok(Some(json!(element.is_enabled))),
            Operation::VerifyText { expected, exact } => {
                if text_matches(&element.display_text, expected, *exact) {
                    Ok(Some(json!(true)))
                } else {
                    Err(AutomationError::VerificationFailed {
                        expected: expected.clone(),
                        actual: element.display_text.clone(),
                    })
                }
            }
            Operation::Exists { .. }
            | Operation::WaitFor { .. }
            | Operation::Wait { .. }
            | Operation::DismissDialog { .. } => {
                Err(AutomationError::InvalidArgument(format!(
                    "{} does not act on a resolved element",
                    operation.kind()
                )))
            }
        }
    }

    async fn click(
        &self,
        element: &ElementDescriptor,
        point: Point,
        button: MouseButton,
        count: u32,
    ) -> Result<Option<Value>> {
        self.input.click(point, button, count).await?;
        Ok(Some(json!({ "element": element.label(), "x": point.x, "y": point.y })))
    }

    async fn dismiss_dialog(&self, owner: Option<u32>, button: Option<&str>) -> Result<Option<Value>> {
        let detector = self.detector.as_ref().ok_or_else(|| {
            AutomationError::UnsupportedOperation("no native dialog detector configured".to_string())
        })?;
        let dialog = detector
            .detect_blocking_dialog(owner)
            .await?
            .ok_or_else(|| AutomationError::ElementNotFound {
                selector: "native dialog".to_string(),
                attempts: Vec::new(),
            })?;

        let target = match button {
            Some(caption) => dialog
                .buttons()
                .find(|b| text_matches(&b.display_text, caption, true)),
            None => dialog.buttons().find(|b| b.is_enabled),
        }
        .ok_or_else(|| AutomationError::ElementNotFound {
            selector: format!(
                "button '{}' in dialog '{}'",
                button.unwrap_or("<any>"),
                dialog.title
            ),
            attempts: Vec::new(),
        })?;
        if !target.is_enabled {
            return Err(AutomationError::UnsupportedOperation(format!(
                "button '{}' in dialog '{}' is disabled",
                target.display_text, dialog.title
            )));
        }

        let point = target.bounding_rect.center();
        self.input.click(point, MouseButton::Left, 1).await?;
        Ok(Some(json!({ "dialog": dialog.title, "button": target.display_text })))
    }
}
