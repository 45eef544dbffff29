//! In-memory platform collaborators for unit tests.

use crate::errors::{AutomationError, Result};
use crate::geometry::{Point, Rect};
use crate::platforms::{
    AccessibilityTree, AccessibleNode, ChildWindow, InputDriver, MouseButton, TopLevelWindow,
    WindowEnumerator,
};
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Default)]
pub struct FakeTree {
    pub active: Option<AccessibleNode>,
    pub windows: Vec<AccessibleNode>,
    pub fail: bool,
}

#[async_trait]
impl AccessibilityTree for FakeTree {
    async fn active_window(&self, pid: Option<u32>) -> Result<Option<AccessibleNode>> {
        if self.fail {
            return Err(AutomationError::PlatformError("tree unavailable".to_string()));
        }
        Ok(self
            .active
            .clone()
            .filter(|w| pid.is_none_or(|p| p == w.process_id)))
    }

    async fn top_level_windows(&self, pid: Option<u32>) -> Result<Vec<AccessibleNode>> {
        if self.fail {
            return Err(AutomationError::PlatformError("tree unavailable".to_string()));
        }
        Ok(self
            .windows
            .iter()
            .filter(|w| pid.is_none_or(|p| p == w.process_id))
            .cloned()
            .collect())
    }
}

pub fn node(automation_id: &str, name: &str, class_name: &str, control_type: &str) -> AccessibleNode {
    AccessibleNode {
        window_id: String::new(),
        process_id: 0,
        name: name.to_string(),
        class_name: class_name.to_string(),
        automation_id: automation_id.to_string(),
        control_type: control_type.to_string(),
        control_id: None,
        bounds: Some(Rect::from_xywh(10, 10, 100, 20)),
        is_offscreen: false,
        is_enabled: true,
        children: Vec::new(),
    }
}

pub fn window(window_id: &str, pid: u32, mut children: Vec<AccessibleNode>) -> AccessibleNode {
    for child in &mut children {
        child.window_id = window_id.to_string();
        child.process_id = pid;
    }
    AccessibleNode {
        window_id: window_id.to_string(),
        process_id: pid,
        name: format!("Window {window_id}"),
        class_name: "TfrmMain".to_string(),
        control_type: "Window".to_string(),
        children,
        ..node("", "", "", "")
    }
}

#[derive(Default)]
pub struct FakeWindows {
    pub top_level: Vec<TopLevelWindow>,
    pub children: Vec<ChildWindow>,
    pub foreground: Option<u32>,
}

#[async_trait]
impl WindowEnumerator for FakeWindows {
    async fn top_level_windows(&self) -> Result<Vec<TopLevelWindow>> {
        Ok(self.top_level.clone())
    }

    async fn child_windows(&self, parent: isize) -> Result<Vec<ChildWindow>> {
        // a real enumerator returns grandchildren too when asked recursively
        Ok(self
            .children
            .iter()
            .filter(|c| c.parent == parent || self.is_descendant(c.parent, parent))
            .cloned()
            .collect())
    }

    async fn foreground_process_id(&self) -> Result<Option<u32>> {
        Ok(self.foreground)
    }
}

impl FakeWindows {
    fn is_descendant(&self, handle: isize, ancestor: isize) -> bool {
        let mut current = handle;
        for _ in 0..16 {
            match self.children.iter().find(|c| c.handle == current) {
                Some(c) if c.parent == ancestor => return true,
                Some(c) => current = c.parent,
                None => return false,
            }
        }
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Click(Point, MouseButton, u32),
    Move(Point),
    Text(String),
}

#[derive(Default)]
pub struct RecordingInput {
    pub events: Mutex<Vec<InputEvent>>,
}

impl RecordingInput {
    pub fn events(&self) -> Vec<InputEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl InputDriver for RecordingInput {
    async fn click(&self, point: Point, button: MouseButton, count: u32) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(InputEvent::Click(point, button, count));
        Ok(())
    }

    async fn move_to(&self, point: Point) -> Result<()> {
        self.events.lock().unwrap().push(InputEvent::Move(point));
        Ok(())
    }

    async fn replace_text(&self, text: &str) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(InputEvent::Text(text.to_string()));
        Ok(())
    }
}

fn child(handle: isize, parent: isize, class_name: &str, text: &str, rect: Rect) -> ChildWindow {
    ChildWindow {
        handle,
        parent,
        class_name: class_name.to_string(),
        text: text.to_string(),
        control_id: handle as i64,
        rect,
        visible: true,
        enabled: true,
    }
}

/// A "Confirm" message box of `pid` with Yes/No buttons, a message, a hidden
/// button and a grandchild that must not be reported.
pub fn confirm_dialog(pid: u32) -> FakeWindows {
    let mut hidden = child(504, 500, "Button", "Hidden", Rect::new(0, 0, 10, 10));
    hidden.visible = false;
    FakeWindows {
        top_level: vec![
            TopLevelWindow {
                handle: 400,
                class_name: "TfrmMain".to_string(),
                process_id: pid,
                title: "Main".to_string(),
                rect: Rect::new(0, 0, 800, 600),
                visible: true,
            },
            TopLevelWindow {
                handle: 500,
                class_name: "#32770".to_string(),
                process_id: pid,
                title: "Confirm".to_string(),
                rect: Rect::new(80, 60, 400, 200),
                visible: true,
            },
        ],
        children: vec![
            child(501, 500, "Button", "&Yes", Rect::new(100, 150, 180, 175)),
            child(502, 500, "Button", "&No", Rect::new(200, 150, 280, 175)),
            child(503, 500, "Static", "Delete this record?", Rect::new(100, 80, 380, 100)),
            hidden,
            child(505, 502, "Static", "inner", Rect::new(200, 150, 210, 160)),
            child(506, 500, "SysLink", "details", Rect::new(100, 120, 150, 130)),
        ],
        foreground: Some(pid),
    }
}
