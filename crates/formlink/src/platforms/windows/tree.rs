//! Accessibility tree via UI Automation.
//!
//! Each snapshot fetches a window subtree with one cache request, so property
//! reads during the walk do not cross the process boundary.

use crate::errors::{AutomationError, Result};
use crate::geometry::Rect;
use crate::platforms::{AccessibilityTree, AccessibleNode};
use async_trait::async_trait;
use tracing::debug;
use uiautomation::controls::ControlType;
use uiautomation::types::{TreeScope, UIProperty};
use uiautomation::{UIAutomation, UIElement};

const MAX_PARENT_HOPS: usize = 64;

pub struct UiaTree {
    max_depth: usize,
}

impl UiaTree {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }
}

impl Default for UiaTree {
    fn default() -> Self {
        Self::new(32)
    }
}

#[async_trait]
impl AccessibilityTree for UiaTree {
    async fn active_window(&self, pid: Option<u32>) -> Result<Option<AccessibleNode>> {
        let max_depth = self.max_depth;
        tokio::task::spawn_blocking(move || active_window_blocking(pid, max_depth))
            .await
            .map_err(|e| AutomationError::PlatformError(format!("UIA task failed: {e}")))?
    }

    async fn top_level_windows(&self, pid: Option<u32>) -> Result<Vec<AccessibleNode>> {
        let max_depth = self.max_depth;
        tokio::task::spawn_blocking(move || top_level_windows_blocking(pid, max_depth))
            .await
            .map_err(|e| AutomationError::PlatformError(format!("UIA task failed: {e}")))?
    }
}

fn uia_err(context: &'static str) -> impl Fn(uiautomation::Error) -> AutomationError {
    move |e| AutomationError::PlatformError(format!("{context}: {e}"))
}

fn active_window_blocking(pid: Option<u32>, max_depth: usize) -> Result<Option<AccessibleNode>> {
    let automation = UIAutomation::new().map_err(uia_err("Failed to create UIAutomation"))?;
    let focused = automation
        .get_focused_element()
        .map_err(uia_err("Failed to get focused element"))?;
    let focused_pid = focused
        .get_process_id()
        .map_err(uia_err("Failed to get process id of focused element"))?;
    if pid.is_some_and(|p| p != focused_pid) {
        debug!(focused_pid, ?pid, "foreground window belongs to another process");
        return Ok(None);
    }

    let root = automation
        .get_root_element()
        .map_err(uia_err("Failed to get root element"))?;
    let root_id = root.get_runtime_id().unwrap_or_default();
    let walker = automation
        .get_control_view_walker()
        .map_err(uia_err("Failed to get tree walker"))?;

    // climb to the child of the desktop root
    let mut current = focused;
    for _ in 0..MAX_PARENT_HOPS {
        let parent = match walker.get_parent(&current) {
            Ok(parent) => parent,
            Err(_) => break,
        };
        let parent_id = parent.get_runtime_id().unwrap_or_default();
        if parent_id == root_id || parent_id == current.get_runtime_id().unwrap_or_default() {
            break;
        }
        current = parent;
    }

    if current.get_control_type().ok() != Some(ControlType::Window) {
        debug!("top-level ancestor of the focused element is not a Window");
    }
    snapshot(&automation, &current, max_depth).map(Some)
}

fn top_level_windows_blocking(pid: Option<u32>, max_depth: usize) -> Result<Vec<AccessibleNode>> {
    let automation = UIAutomation::new().map_err(uia_err("Failed to create UIAutomation"))?;
    let pid = match pid {
        Some(pid) => pid,
        None => automation
            .get_focused_element()
            .and_then(|e| e.get_process_id())
            .map_err(uia_err("Failed to get foreground process"))?,
    };
    let root = automation
        .get_root_element()
        .map_err(uia_err("Failed to get root element"))?;
    let condition = automation
        .create_true_condition()
        .map_err(uia_err("Failed to create true condition"))?;
    let windows = root
        .find_all(TreeScope::Children, &condition)
        .map_err(uia_err("Failed to enumerate top-level windows"))?;

    let mut nodes = Vec::new();
    for window in windows {
        if window.get_process_id().ok() != Some(pid) {
            continue;
        }
        match snapshot(&automation, &window, max_depth) {
            Ok(node) => nodes.push(node),
            Err(e) => debug!(error = %e, "skipping window that vanished during snapshot"),
        }
    }
    Ok(nodes)
}

fn snapshot(automation: &UIAutomation, window: &UIElement, max_depth: usize) -> Result<AccessibleNode> {
    let cache_request = automation
        .create_cache_request()
        .map_err(uia_err("Failed to create cache request"))?;
    for prop in [
        UIProperty::ControlType,
        UIProperty::Name,
        UIProperty::ClassName,
        UIProperty::AutomationId,
        UIProperty::BoundingRectangle,
        UIProperty::IsEnabled,
        UIProperty::IsOffscreen,
        UIProperty::ProcessId,
    ] {
        cache_request
            .add_property(prop)
            .map_err(uia_err("Failed to add cached property"))?;
    }
    cache_request
        .set_tree_scope(TreeScope::Subtree)
        .map_err(uia_err("Failed to set tree scope"))?;
    let condition = automation
        .create_true_condition()
        .map_err(uia_err("Failed to create true condition"))?;
    let cached = window
        .find_first_build_cache(TreeScope::Element, &condition, &cache_request)
        .map_err(uia_err("Failed to build cache for window"))?;

    let window_id = window
        .get_runtime_id()
        .map(|id| id.iter().map(|p| p.to_string()).collect::<Vec<_>>().join("."))
        .unwrap_or_default();
    Ok(cached_node(&cached, &window_id, 0, max_depth))
}

fn cached_node(element: &UIElement, window_id: &str, depth: usize, max_depth: usize) -> AccessibleNode {
    let automation_id = element.get_cached_automation_id().unwrap_or_default();
    let mut node = AccessibleNode {
        window_id: window_id.to_string(),
        process_id: element.get_cached_process_id().unwrap_or_default() as u32,
        name: element.get_cached_name().unwrap_or_default(),
        class_name: element.get_cached_classname().unwrap_or_default(),
        control_id: automation_id.parse::<i64>().ok(),
        automation_id,
        control_type: element
            .get_cached_control_type()
            .map(|ct| format!("{:?}", ct))
            .unwrap_or_default(),
        bounds: element.get_cached_bounding_rectangle().ok().map(|r| {
            Rect::from_xywh(r.get_left(), r.get_top(), r.get_width(), r.get_height())
        }),
        is_offscreen: element.is_cached_offscreen().unwrap_or(false),
        is_enabled: element.is_cached_enabled().unwrap_or(true),
        children: Vec::new(),
    };

    if depth < max_depth {
        if let Ok(children) = element.get_cached_children() {
            node.children = children
                .iter()
                .map(|child| cached_node(child, window_id, depth + 1, max_depth))
                .collect();
        }
    }
    node
}
