//! Batch step parsing and sequential execution.

use super::fakes::{confirm_dialog, node, window, FakeTree, FakeWindows, InputEvent, RecordingInput};
use crate::batch::{BatchExecutor, BatchStep, ExecutorOptions, Operation, OperationKind};
use crate::bridge::ProcessTarget;
use crate::dialog::NativeDialogDetector;
use crate::errors::{AutomationError, Result};
use crate::geometry::{Anchor, Point};
use crate::platforms::{AccessibilityTree, AccessibleNode, MouseButton};
use crate::resolver::ElementResolver;
use crate::selector::{MatchPolicy, Scope, Selector};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[test]
fn test_step_from_json() {
    let step: BatchStep = serde_json::from_value(json!({
        "op": "set_text",
        "id": "edtName",
        "title": "Name",
        "text": "Ana",
        "anchor": "left",
        "wait": 0.25,
        "scope": "global",
        "match": "first"
    }))
    .unwrap();

    assert_eq!(step.operation, Operation::SetText { text: "Ana".to_string() });
    assert_eq!(step.selector.automation_id.as_deref(), Some("edtName"));
    assert_eq!(step.selector.text.as_deref(), Some("Name"));
    assert_eq!(step.anchor, Anchor::Left);
    assert_eq!(step.wait_after, Some(Duration::from_millis(250)));
    assert_eq!(step.scope, Some(Scope::Global));
    assert_eq!(step.match_policy, MatchPolicy::First);
}

#[test]
fn test_steps_from_yaml() {
    let yaml = r#"
- op: click
  selector: "id:btnNew"
- op: wait
  wait: 1.5
- op: verify_text
  id: lblStatus
  text: saved
  exact: false
- op: dismiss_dialog
  text: OK
- op: click
  x: 10
  y: 20
"#;
    let steps: Vec<BatchStep> = serde_yaml::from_str(yaml).unwrap();
    let kinds: Vec<OperationKind> = steps.iter().map(|s| s.operation.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            OperationKind::Click,
            OperationKind::Wait,
            OperationKind::VerifyText,
            OperationKind::DismissDialog,
            OperationKind::Click,
        ]
    );
    assert_eq!(steps[0].selector, Selector::by_id("btnNew"));
    assert_eq!(steps[0].wait_after, None);
    assert_eq!(
        steps[1].operation,
        Operation::Wait {
            duration: Duration::from_millis(1500)
        }
    );
    assert_eq!(steps[1].wait_after, Some(Duration::ZERO));
    assert_eq!(
        steps[2].operation,
        Operation::VerifyText {
            expected: "saved".to_string(),
            exact: false
        }
    );
    assert_eq!(
        steps[3].operation,
        Operation::DismissDialog {
            button: Some("OK".to_string())
        }
    );
    assert_eq!(steps[4].selector.point, Some(Point::new(10, 20)));
}

#[test]
fn test_invalid_steps_are_rejected() {
    let cases = [
        json!({"op": "set_text", "id": "edtName"}),
        json!({"op": "click", "x": 10}),
        json!({"op": "click"}),
        json!({"op": "click", "selector": "id:a", "id": "b"}),
        json!({"op": "click", "id": "a", "color": "red"}),
        json!({"op": "launch", "id": "a"}),
        json!({"op": "click", "id": "a", "wait": -1.0}),
        json!({"op": "click", "id": "a", "match": "some"}),
    ];
    for case in cases {
        assert!(
            serde_json::from_value::<BatchStep>(case.clone()).is_err(),
            "{case} should not parse"
        );
    }
}

#[test]
fn test_polling_steps_take_a_timeout() {
    let yaml = r#"
- op: wait_for
  id: dlgResult
  timeout: 2.5
- op: wait_for
  id: dlgResult
- op: exists
  id: btnSave
  timeout: 0.5
- op: exists
  id: btnSave
- op: visible
  id: btnSave
- op: enabled
  id: btnSave
- op: info
  id: btnSave
"#;
    let steps: Vec<BatchStep> = serde_yaml::from_str(yaml).unwrap();
    let operations: Vec<Operation> = steps.into_iter().map(|s| s.operation).collect();
    assert_eq!(
        operations,
        vec![
            Operation::WaitFor {
                timeout: Duration::from_millis(2500)
            },
            Operation::WaitFor {
                timeout: Duration::from_secs(5)
            },
            Operation::Exists {
                timeout: Some(Duration::from_millis(500))
            },
            Operation::Exists { timeout: None },
            Operation::Visible,
            Operation::Enabled,
            Operation::Info,
        ]
    );

    for case in [
        json!({"op": "click", "id": "a", "timeout": 1.0}),
        json!({"op": "wait_for", "id": "a", "timeout": -2.0}),
        json!({"op": "wait_for"}),
    ] {
        assert!(
            serde_json::from_value::<BatchStep>(case.clone()).is_err(),
            "{case} should not parse"
        );
    }
}

#[test]
fn test_wait_without_duration_uses_default() {
    let step: BatchStep = serde_json::from_value(json!({"op": "wait"})).unwrap();
    assert_eq!(
        step.operation,
        Operation::Wait {
            duration: Duration::from_millis(500)
        }
    );
}

struct Harness {
    executor: BatchExecutor,
    input: Arc<RecordingInput>,
}

fn order_form() -> AccessibleNode {
    let mut locked = node("chkLocked", "Locked", "TcxCheckBox", "CheckBox");
    locked.is_enabled = false;
    let mut hint = node("edtHint", "", "TcxTextEdit", "Edit");
    hint.is_offscreen = true;
    window(
        "1.1",
        7,
        vec![
            node("edtName", "", "TcxTextEdit", "Edit"),
            node("btnSave", "Save", "TcxButton", "Button"),
            node("lblStatus", "Saved OK", "TcxButton", "Button"),
            locked,
            hint,
        ],
    )
}

fn harness(windows: FakeWindows, dialog_guard: bool) -> Harness {
    let form = order_form();
    let tree = FakeTree {
        active: Some(form.clone()),
        windows: vec![form],
        fail: false,
    };
    harness_with_tree(Arc::new(tree), windows, dialog_guard)
}

fn harness_with_tree(
    tree: Arc<dyn AccessibilityTree>,
    windows: FakeWindows,
    dialog_guard: bool,
) -> Harness {
    let resolver = Arc::new(ElementResolver::new(None, tree, ProcessTarget::Pid(7)));
    let input = Arc::new(RecordingInput::default());
    let options = ExecutorOptions {
        default_wait: Duration::ZERO,
        focus_settle: Duration::ZERO,
        dialog_guard,
        ..ExecutorOptions::default()
    };
    let executor = BatchExecutor::new(
        resolver,
        input.clone(),
        Some(Arc::new(NativeDialogDetector::new(Arc::new(windows)))),
        options,
    );
    Harness { executor, input }
}

fn click(selector: Selector) -> BatchStep {
    BatchStep::new(Operation::Click, selector)
}

#[tokio::test]
async fn test_batch_stops_at_first_failure() {
    let h = harness(FakeWindows::default(), false);
    let steps = vec![
        click(Selector::by_id("btnSave")),
        click(Selector::by_id("btnMissing")),
        click(Selector::by_id("edtName")),
    ];
    let result = h.executor.run(&steps, Scope::ActiveForm).await;

    assert!(!result.is_success());
    assert_eq!(result.outcomes.len(), 2);
    assert!(result.outcomes[0].success);
    let failed = result.failed_step().unwrap();
    assert_eq!(failed.index, 1);
    assert_eq!(failed.error.as_ref().unwrap().kind, "element_not_found");
    // only the first click reached the input driver
    assert_eq!(h.input.events().len(), 1);

    match result.into_result().unwrap_err() {
        AutomationError::BatchStepFailure { index, operation, source } => {
            assert_eq!(index, 1);
            assert_eq!(operation, "click");
            assert!(matches!(*source, AutomationError::ElementNotFound { .. }));
        }
        other => panic!("expected BatchStepFailure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_operations_drive_input_at_anchor_points() {
    let h = harness(FakeWindows::default(), false);
    let steps = vec![
        click(Selector::by_id("btnSave")).with_anchor(Anchor::Right),
        BatchStep::new(Operation::DoubleClick, Selector::by_id("btnSave")),
        BatchStep::new(
            Operation::SetText {
                text: "Ana".to_string(),
            },
            Selector::by_id("edtName"),
        ),
        BatchStep::new(Operation::Hover, Selector::at(5, 6)),
    ];
    let result = h.executor.run(&steps, Scope::ActiveForm).await;
    assert!(result.is_success(), "{:?}", result.error());

    // nodes span (10,10)-(110,30)
    assert_eq!(
        h.input.events(),
        vec![
            InputEvent::Click(Point::new(105, 20), MouseButton::Left, 1),
            InputEvent::Click(Point::new(60, 20), MouseButton::Left, 2),
            InputEvent::Click(Point::new(60, 20), MouseButton::Left, 1),
            InputEvent::Text("Ana".to_string()),
            InputEvent::Move(Point::new(5, 6)),
        ]
    );
}

#[tokio::test]
async fn test_read_only_operations_return_values() {
    let h = harness(FakeWindows::default(), false);
    let steps = vec![
        BatchStep::new(Operation::GetText, Selector::by_id("btnSave")),
        BatchStep::new(Operation::Exists { timeout: None }, Selector::by_id("btnNope")),
        BatchStep::new(Operation::Rect, Selector::by_id("btnSave")),
        BatchStep::new(
            Operation::VerifyText {
                expected: "saved".to_string(),
                exact: false,
            },
            Selector::by_id("lblStatus"),
        ),
        BatchStep::new(
            Operation::VerifyText {
                expected: "saved".to_string(),
                exact: true,
            },
            Selector::by_id("lblStatus"),
        ),
    ];
    let result = h.executor.run(&steps, Scope::ActiveForm).await;

    let values: Vec<_> = result.outcomes.iter().map(|o| o.value.clone()).collect();
    assert_eq!(values[0], Some(json!("Save")));
    assert_eq!(values[1], Some(json!(false)));
    assert_eq!(
        values[2],
        Some(json!({"left": 10, "top": 10, "right": 110, "bottom": 30}))
    );
    assert_eq!(values[3], Some(json!(true)));
    assert_eq!(result.outcomes.len(), 5);
    assert!(matches!(
        result.error(),
        Some(AutomationError::VerificationFailed { .. })
    ));
    assert!(h.input.events().is_empty());
}

#[tokio::test]
async fn test_dialog_guard_blocks_element_steps() {
    let h = harness(confirm_dialog(7), true);
    let steps = vec![click(Selector::by_id("btnSave"))];
    let result = h.executor.run(&steps, Scope::ActiveForm).await;
    assert!(matches!(
        result.error(),
        Some(AutomationError::BlockingDialogDetected(d)) if d.title == "Confirm"
    ));
    assert!(h.input.events().is_empty());
}

#[tokio::test]
async fn test_dismiss_dialog_clicks_button_by_caption() {
    let h = harness(confirm_dialog(7), true);
    let steps = vec![BatchStep::new(
        Operation::DismissDialog {
            button: Some("no".to_string()),
        },
        Selector::default(),
    )];
    let result = h.executor.run(&steps, Scope::ActiveForm).await;
    assert!(result.is_success(), "{:?}", result.error());
    assert_eq!(
        h.input.events(),
        vec![InputEvent::Click(Point::new(240, 162), MouseButton::Left, 1)]
    );
    assert_eq!(
        result.outcomes[0].value,
        Some(json!({"dialog": "Confirm", "button": "&No"}))
    );
}

#[tokio::test]
async fn test_dismiss_dialog_without_dialog_fails() {
    let h = harness(FakeWindows::default(), false);
    let steps = vec![BatchStep::new(
        Operation::DismissDialog { button: None },
        Selector::default(),
    )];
    let result = h.executor.run(&steps, Scope::ActiveForm).await;
    assert_eq!(result.failed_step().unwrap().error.as_ref().unwrap().kind, "element_not_found");
}

#[tokio::test]
async fn test_cancelled_batch_records_cancelled_step() {
    let h = harness(FakeWindows::default(), false);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let steps = vec![click(Selector::by_id("btnSave")), click(Selector::by_id("edtName"))];
    let result = h
        .executor
        .run_with_cancel(&steps, Scope::ActiveForm, &cancel)
        .await;
    assert_eq!(result.outcomes.len(), 1);
    assert_eq!(result.outcomes[0].error.as_ref().unwrap().kind, "cancelled");
    assert!(h.input.events().is_empty());
}

#[tokio::test]
async fn test_state_queries_report_descriptor_flags() {
    let h = harness(FakeWindows::default(), false);
    let steps = vec![
        BatchStep::new(Operation::Enabled, Selector::by_id("btnSave")),
        BatchStep::new(Operation::Enabled, Selector::by_id("chkLocked")),
        BatchStep::new(Operation::Visible, Selector::by_id("btnSave")),
        BatchStep::new(Operation::Visible, Selector::by_id("edtHint")),
        BatchStep::new(Operation::Info, Selector::by_id("chkLocked")),
    ];
    let result = h.executor.run(&steps, Scope::ActiveForm).await;
    assert!(result.is_success(), "{:?}", result.error());

    let values: Vec<_> = result.outcomes.iter().map(|o| o.value.clone()).collect();
    assert_eq!(values[0], Some(json!(true)));
    assert_eq!(values[1], Some(json!(false)));
    assert_eq!(values[2], Some(json!(true)));
    assert_eq!(values[3], Some(json!(false)));

    let info = values[4].clone().unwrap();
    assert_eq!(info["automation_id"], json!("chkLocked"));
    assert_eq!(info["display_text"], json!("Locked"));
    assert_eq!(info["is_enabled"], json!(false));
    assert_eq!(info["owning_form_id"], json!("1.1"));
    assert!(h.input.events().is_empty());
}

/// Serves the order form only from the `after`-th snapshot on.
struct AppearingTree {
    after: usize,
    calls: AtomicUsize,
}

impl AppearingTree {
    fn new(after: usize) -> Arc<Self> {
        Arc::new(Self {
            after,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl AccessibilityTree for AppearingTree {
    async fn active_window(&self, _pid: Option<u32>) -> Result<Option<AccessibleNode>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((call >= self.after).then(order_form))
    }

    async fn top_level_windows(&self, pid: Option<u32>) -> Result<Vec<AccessibleNode>> {
        Ok(self.active_window(pid).await?.into_iter().collect())
    }
}

fn wait_for(id: &str, timeout: Duration) -> BatchStep {
    BatchStep::new(Operation::WaitFor { timeout }, Selector::by_id(id))
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_polls_until_the_element_appears() {
    let tree = AppearingTree::new(3);
    let h = harness_with_tree(tree.clone(), FakeWindows::default(), false);

    let result = h
        .executor
        .run(&[wait_for("btnSave", Duration::from_secs(2))], Scope::ActiveForm)
        .await;
    assert!(result.is_success(), "{:?}", result.error());
    assert_eq!(result.outcomes[0].value.as_ref().unwrap()["automation_id"], json!("btnSave"));
    assert_eq!(tree.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_times_out_with_element_not_found() {
    let h = harness(FakeWindows::default(), false);
    let started = Instant::now();
    let steps = vec![
        wait_for("btnNope", Duration::from_millis(250)),
        click(Selector::by_id("btnSave")),
    ];
    let result = h.executor.run(&steps, Scope::ActiveForm).await;

    assert!(started.elapsed() >= Duration::from_millis(250));
    assert_eq!(result.outcomes.len(), 1);
    let error = result.outcomes[0].error.as_ref().unwrap();
    assert_eq!(error.kind, "element_not_found");
    assert!(error.message.contains("within 250ms"), "{}", error.message);
    assert!(h.input.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_exists_with_timeout_waits_for_late_elements() {
    let h = harness_with_tree(AppearingTree::new(2), FakeWindows::default(), false);
    let steps = vec![
        BatchStep::new(
            Operation::Exists {
                timeout: Some(Duration::from_secs(1)),
            },
            Selector::by_id("btnSave"),
        ),
        BatchStep::new(
            Operation::Exists {
                timeout: Some(Duration::from_millis(300)),
            },
            Selector::by_id("btnNope"),
        ),
    ];
    let started = Instant::now();
    let result = h.executor.run(&steps, Scope::ActiveForm).await;

    assert!(result.is_success(), "{:?}", result.error());
    let values: Vec<_> = result.outcomes.iter().map(|o| o.value.clone()).collect();
    assert_eq!(values, vec![Some(json!(true)), Some(json!(false))]);
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_wait_for() {
    let h = harness_with_tree(AppearingTree::new(usize::MAX), FakeWindows::default(), false);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = h
        .executor
        .run_with_cancel(&[wait_for("btnSave", Duration::from_secs(30))], Scope::ActiveForm, &cancel)
        .await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(result.outcomes[0].error.as_ref().unwrap().kind, "cancelled");
}

#[tokio::test]
async fn test_dismiss_dialog_skips_disabled_buttons() {
    let mut windows = confirm_dialog(7);
    for child in windows.children.iter_mut().filter(|c| c.text == "&Yes") {
        child.enabled = false;
    }
    let h = harness(windows, false);

    let any = BatchStep::new(Operation::DismissDialog { button: None }, Selector::default());
    let result = h.executor.run(&[any], Scope::ActiveForm).await;
    assert!(result.is_success(), "{:?}", result.error());
    assert_eq!(
        result.outcomes[0].value,
        Some(json!({"dialog": "Confirm", "button": "&No"}))
    );

    let yes = BatchStep::new(
        Operation::DismissDialog {
            button: Some("Yes".to_string()),
        },
        Selector::default(),
    );
    let result = h.executor.run(&[yes], Scope::ActiveForm).await;
    assert_eq!(
        result.outcomes[0].error.as_ref().unwrap().kind,
        "unsupported_operation"
    );
    assert_eq!(h.input.events().len(), 1);
}
