//! Shared fixtures: an axum mock of the in-process bridge and in-memory
//! platform collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use formlink::geometry::{Point, Rect};
use formlink::platforms::{
    AccessibilityTree, AccessibleNode, ChildWindow, InputDriver, ListenerSource, ListeningSocket,
    MouseButton, Platform, TopLevelWindow, WindowEnumerator,
};
use formlink::{FormlinkConfig, ProcessTarget, Result, Session};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const PID: u32 = 4242;

/// Forms and controls a mock bridge serves, plus the actions it received.
#[derive(Default)]
pub struct BridgeState {
    pub forms: Mutex<Vec<Value>>,
    pub controls: Mutex<HashMap<i64, Value>>,
    pub active_controls: Mutex<Value>,
    pub actions: Mutex<Vec<(String, Value)>>,
}

impl BridgeState {
    pub fn actions(&self) -> Vec<(String, Value)> {
        self.actions.lock().unwrap().clone()
    }
}

pub struct MockBridge {
    pub addr: SocketAddr,
    pub state: Arc<BridgeState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl MockBridge {
    pub async fn start(state: Arc<BridgeState>) -> Self {
        let router = Router::new()
            .route("/forms", get(list_forms))
            .route("/forms/{handle}/controls", get(form_controls))
            .route("/activeform/controls", get(active_controls))
            .route("/click", post(click))
            .route("/settext", post(set_text))
            .with_state(state.clone());
        serve(router, state).await
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stops accepting, closes idle connections and waits until the port is released.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

async fn serve(router: Router, state: Arc<BridgeState>) -> MockBridge {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = rx.await;
            })
            .await
            .unwrap();
    });
    MockBridge {
        addr,
        state,
        shutdown: Some(tx),
        task: Some(task),
    }
}

async fn list_forms(State(state): State<Arc<BridgeState>>) -> Json<Value> {
    Json(Value::Array(state.forms.lock().unwrap().clone()))
}

async fn form_controls(
    State(state): State<Arc<BridgeState>>,
    Path(handle): Path<i64>,
) -> std::result::Result<Json<Value>, StatusCode> {
    state
        .controls
        .lock()
        .unwrap()
        .get(&handle)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn active_controls(State(state): State<Arc<BridgeState>>) -> Json<Value> {
    Json(state.active_controls.lock().unwrap().clone())
}

async fn click(State(state): State<Arc<BridgeState>>, Json(body): Json<Value>) -> &'static str {
    state.actions.lock().unwrap().push(("click".to_string(), body));
    "OK"
}

async fn set_text(State(state): State<Arc<BridgeState>>, Json(body): Json<Value>) -> Json<Value> {
    state.actions.lock().unwrap().push(("settext".to_string(), body));
    Json(json!({"ok": true}))
}

/// An HTTP server on a loopback port that is not the bridge.
pub async fn start_impostor() -> MockBridge {
    let router = Router::new().route("/forms", get(|| async { Json(json!({"status": "ok"})) }));
    serve(router, Arc::new(BridgeState::default())).await
}

/// Accepts TCP connections and never answers.
pub async fn start_silent_listener() -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let task = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    (port, task)
}

pub fn control(name: &str, class_name: &str, text: &str, left: i32, top: i32) -> Value {
    json!({
        "name": name,
        "className": class_name,
        "text": text,
        "left": left,
        "top": top,
        "width": 100,
        "height": 50
    })
}

/// Two forms: the active order form (handle 1001) and a customer form (1002)
/// that also has a `btnSave`.
pub fn two_form_state() -> Arc<BridgeState> {
    let state = BridgeState::default();
    *state.forms.lock().unwrap() = vec![
        json!({"handle": 1001, "name": "frmOrder", "caption": "Order", "active": true}),
        json!({"handle": 1002, "name": "frmCustomer", "caption": "Customer", "active": false}),
    ];
    state.controls.lock().unwrap().insert(
        1001,
        json!([
            {
                "name": "pnlMain",
                "className": "TPanel",
                "left": 0, "top": 0, "width": 800, "height": 600,
                "children": [
                    control("lblCustomer", "TcxLabel", "Customer", 10, 10),
                    control("edtCustomer", "TcxTextEdit", "", 120, 10),
                    control("btnSave", "TcxButton", "&Save", 10, 10)
                ]
            }
        ]),
    );
    state.controls.lock().unwrap().insert(
        1002,
        json!({"controls": [
            control("btnSave", "TcxButton", "Save", 300, 300),
            control("edtEmail", "TcxTextEdit", "", 300, 360)
        ]}),
    );
    Arc::new(state)
}

/// Socket table backed by a mutable list.
#[derive(Default)]
pub struct FakeListeners {
    pub sockets: Mutex<Vec<ListeningSocket>>,
}

impl FakeListeners {
    pub fn with_ports(ports: &[(u16, u32)]) -> Arc<Self> {
        let listeners = Arc::new(Self::default());
        listeners.set(ports);
        listeners
    }

    pub fn set(&self, ports: &[(u16, u32)]) {
        *self.sockets.lock().unwrap() = ports
            .iter()
            .map(|(port, pid)| ListeningSocket {
                address: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port: *port,
                pid: *pid,
            })
            .collect();
    }
}

#[async_trait]
impl ListenerSource for FakeListeners {
    async fn listening_sockets(&self) -> Result<Vec<ListeningSocket>> {
        Ok(self.sockets.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeTree {
    pub active: Option<AccessibleNode>,
}

#[async_trait]
impl AccessibilityTree for FakeTree {
    async fn active_window(&self, _pid: Option<u32>) -> Result<Option<AccessibleNode>> {
        Ok(self.active.clone())
    }

    async fn top_level_windows(&self, _pid: Option<u32>) -> Result<Vec<AccessibleNode>> {
        Ok(self.active.clone().into_iter().collect())
    }
}

/// A single accessible window with one button, used as the fallback source.
pub fn accessible_window() -> AccessibleNode {
    let button = AccessibleNode {
        window_id: "42.7".to_string(),
        process_id: PID,
        name: "Save".to_string(),
        class_name: "TcxButton".to_string(),
        automation_id: "btnSave".to_string(),
        control_type: "Button".to_string(),
        control_id: None,
        bounds: Some(Rect::new(500, 500, 600, 540)),
        is_offscreen: false,
        is_enabled: true,
        children: Vec::new(),
    };
    AccessibleNode {
        window_id: "42.7".to_string(),
        process_id: PID,
        name: "Order".to_string(),
        class_name: "TfrmOrder".to_string(),
        control_type: "Window".to_string(),
        children: vec![button],
        ..Default::default()
    }
}

#[derive(Default)]
pub struct FakeWindows {
    pub top_level: Vec<TopLevelWindow>,
    pub children: Vec<ChildWindow>,
}

impl FakeWindows {
    /// A visible "Warning" message box owned by [`PID`] with an OK button and a message.
    pub fn with_message_box() -> Self {
        Self {
            top_level: vec![TopLevelWindow {
                handle: 0x5000,
                class_name: "#32770".to_string(),
                process_id: PID,
                title: "Warning".to_string(),
                rect: Rect::new(300, 200, 600, 350),
                visible: true,
            }],
            children: vec![
                ChildWindow {
                    handle: 0x5001,
                    parent: 0x5000,
                    class_name: "Button".to_string(),
                    text: "OK".to_string(),
                    control_id: 1,
                    rect: Rect::new(400, 300, 480, 325),
                    visible: true,
                    enabled: true,
                },
                ChildWindow {
                    handle: 0x5002,
                    parent: 0x5000,
                    class_name: "Static".to_string(),
                    text: "Customer is required".to_string(),
                    control_id: 65535,
                    rect: Rect::new(320, 230, 580, 260),
                    visible: true,
                    enabled: true,
                },
            ],
        }
    }
}

#[async_trait]
impl WindowEnumerator for FakeWindows {
    async fn top_level_windows(&self) -> Result<Vec<TopLevelWindow>> {
        Ok(self.top_level.clone())
    }

    async fn child_windows(&self, parent: isize) -> Result<Vec<ChildWindow>> {
        Ok(self
            .children
            .iter()
            .filter(|c| c.parent == parent)
            .cloned()
            .collect())
    }

    async fn foreground_process_id(&self) -> Result<Option<u32>> {
        Ok(Some(PID))
    }
}

#[derive(Default)]
pub struct RecordingInput {
    pub clicks: Mutex<Vec<(Point, MouseButton, u32)>>,
    pub typed: Mutex<Vec<String>>,
}

impl RecordingInput {
    pub fn clicks(&self) -> Vec<(Point, MouseButton, u32)> {
        self.clicks.lock().unwrap().clone()
    }
}

#[async_trait]
impl InputDriver for RecordingInput {
    async fn click(&self, point: Point, button: MouseButton, count: u32) -> Result<()> {
        self.clicks.lock().unwrap().push((point, button, count));
        Ok(())
    }

    async fn move_to(&self, _point: Point) -> Result<()> {
        Ok(())
    }

    async fn replace_text(&self, text: &str) -> Result<()> {
        self.typed.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Config with short timeouts and no per-step wait.
pub fn fast_config() -> FormlinkConfig {
    let mut config = FormlinkConfig::default();
    config.bridge.probe_timeout_ms = 300;
    config.bridge.discovery_timeout_ms = 1_500;
    config.bridge.request_timeout_ms = 1_000;
    config.bridge.rediscovery_cooldown_ms = 200;
    config.input.default_wait_ms = 0;
    config.input.focus_settle_ms = 0;
    config
}

pub struct Fixture {
    pub session: Session,
    pub listeners: Arc<FakeListeners>,
    pub input: Arc<RecordingInput>,
}

pub fn session_with(
    listeners: Arc<FakeListeners>,
    tree: FakeTree,
    windows: FakeWindows,
    config: FormlinkConfig,
) -> Fixture {
    let input = Arc::new(RecordingInput::default());
    let platform = Platform {
        listeners: listeners.clone(),
        tree: Arc::new(tree),
        windows: Arc::new(windows),
        input: input.clone(),
    };
    let session = Session::with_platform(ProcessTarget::Pid(PID), config, platform).unwrap();
    Fixture {
        session,
        listeners,
        input,
    }
}

/// Session whose socket table lists `bridge` as owned by [`PID`].
pub fn session_for(bridge: &MockBridge) -> Fixture {
    session_with(
        FakeListeners::with_ports(&[(bridge.port(), PID)]),
        FakeTree::default(),
        FakeWindows::default(),
        fast_config(),
    )
}
