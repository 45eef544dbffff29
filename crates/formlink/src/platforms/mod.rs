//! OS collaborators behind traits: listening sockets, the accessibility tree,
//! top-level windows and physical input.

use crate::errors::{AutomationError, Result};
use crate::geometry::{Point, Rect};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;

pub mod listeners;

#[cfg(target_os = "windows")]
pub mod windows;

/// One row of the local listening-socket table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListeningSocket {
    pub address: IpAddr,
    pub port: u16,
    pub pid: u32,
}

#[async_trait]
pub trait ListenerSource: Send + Sync {
    async fn listening_sockets(&self) -> Result<Vec<ListeningSocket>>;
}

/// Accessibility-tree node as reported by the OS.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessibleNode {
    /// Stable id of the top-level window this node came from.
    pub window_id: String,
    pub process_id: u32,
    pub name: String,
    pub class_name: String,
    pub automation_id: String,
    pub control_type: String,
    pub control_id: Option<i64>,
    pub bounds: Option<Rect>,
    pub is_offscreen: bool,
    pub is_enabled: bool,
    pub children: Vec<AccessibleNode>,
}

#[async_trait]
pub trait AccessibilityTree: Send + Sync {
    /// Foreground top-level window, restricted to `pid` when given.
    async fn active_window(&self, pid: Option<u32>) -> Result<Option<AccessibleNode>>;

    /// All top-level windows of `pid` (or of the foreground process when `None`).
    async fn top_level_windows(&self, pid: Option<u32>) -> Result<Vec<AccessibleNode>>;
}

/// Top-level window snapshot. Children are fetched separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopLevelWindow {
    pub handle: isize,
    pub class_name: String,
    pub process_id: u32,
    pub title: String,
    pub rect: Rect,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildWindow {
    pub handle: isize,
    /// Direct parent; descendants deeper than one level have another window here.
    pub parent: isize,
    pub class_name: String,
    pub text: String,
    pub control_id: i64,
    pub rect: Rect,
    pub visible: bool,
    pub enabled: bool,
}

#[async_trait]
pub trait WindowEnumerator: Send + Sync {
    async fn top_level_windows(&self) -> Result<Vec<TopLevelWindow>>;
    async fn child_windows(&self, parent: isize) -> Result<Vec<ChildWindow>>;
    async fn foreground_process_id(&self) -> Result<Option<u32>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

#[async_trait]
pub trait InputDriver: Send + Sync {
    async fn click(&self, point: Point, button: MouseButton, count: u32) -> Result<()>;
    async fn move_to(&self, point: Point) -> Result<()>;
    /// Select-all, delete, then type `text` into the focused control.
    async fn replace_text(&self, text: &str) -> Result<()>;
}

/// The set of collaborators a session runs against.
#[derive(Clone)]
pub struct Platform {
    pub listeners: Arc<dyn ListenerSource>,
    pub tree: Arc<dyn AccessibilityTree>,
    pub windows: Arc<dyn WindowEnumerator>,
    pub input: Arc<dyn InputDriver>,
}

impl Platform {
    /// Native implementations for the current OS.
    pub fn native() -> Result<Self> {
        #[cfg(target_os = "windows")]
        {
            windows::platform()
        }
        #[cfg(not(target_os = "windows"))]
        {
            Ok(Self {
                listeners: Arc::new(listeners::SystemListeners),
                tree: Arc::new(Unsupported),
                windows: Arc::new(Unsupported),
                input: Arc::new(Unsupported),
            })
        }
    }
}

/// Stand-in where the OS has no implementation: the tree and window list are
/// empty and input synthesis fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unsupported;

#[async_trait]
impl AccessibilityTree for Unsupported {
    async fn active_window(&self, _pid: Option<u32>) -> Result<Option<AccessibleNode>> {
        Ok(None)
    }

    async fn top_level_windows(&self, _pid: Option<u32>) -> Result<Vec<AccessibleNode>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl WindowEnumerator for Unsupported {
    async fn top_level_windows(&self) -> Result<Vec<TopLevelWindow>> {
        Ok(Vec::new())
    }

    async fn child_windows(&self, _parent: isize) -> Result<Vec<ChildWindow>> {
        Ok(Vec::new())
    }

    async fn foreground_process_id(&self) -> Result<Option<u32>> {
        Ok(None)
    }
}

#[async_trait]
impl InputDriver for Unsupported {
    async fn click(&self, _point: Point, _button: MouseButton, _count: u32) -> Result<()> {
        Err(AutomationError::UnsupportedOperation(
            "input synthesis is only available on Windows".to_string(),
        ))
    }

    async fn move_to(&self, _point: Point) -> Result<()> {
        Err(AutomationError::UnsupportedOperation(
            "input synthesis is only available on Windows".to_string(),
        ))
    }

    async fn replace_text(&self, _text: &str) -> Result<()> {
        Err(AutomationError::UnsupportedOperation(
            "input synthesis is only available on Windows".to_string(),
        ))
    }
}
