//! Wire types of the in-process introspection bridge.

use crate::errors::{AutomationError, Result};
use crate::geometry::{Point, Rect};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Path whose response identifies a listener as the bridge.
pub const SIGNATURE_PATH: &str = "/forms";

/// Form id used when the bridge does not mark any form as active.
pub const ACTIVE_FORM_FALLBACK_ID: &str = "activeform";

fn default_true() -> bool {
    true
}

/// Entry of `GET /forms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeForm {
    pub handle: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub active: bool,
}

/// One control in a form snapshot. Coordinates are screen pixels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlNode {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub left: Option<i32>,
    #[serde(default)]
    pub top: Option<i32>,
    #[serde(default)]
    pub width: Option<i32>,
    #[serde(default)]
    pub height: Option<i32>,
    #[serde(default)]
    pub children: Vec<ControlNode>,
}

impl ControlNode {
    pub fn rect(&self) -> Rect {
        let (x, y, w, h) = self.xywh();
        Rect::from_xywh(x, y, w, h)
    }

    fn xywh(&self) -> (i32, i32, i32, i32) {
        (
            self.left.unwrap_or(0),
            self.top.unwrap_or(0),
            self.width.unwrap_or(0),
            self.height.unwrap_or(0),
        )
    }

    /// Rejects a node, or any descendant, whose right or bottom edge overflows.
    fn check_geometry(&self) -> Result<()> {
        let (x, y, w, h) = self.xywh();
        if Rect::checked_from_xywh(x, y, w, h).is_none() {
            return Err(AutomationError::BridgeProtocol(format!(
                "control '{}' reports geometry that overflows screen coordinates \
                 (left {x}, top {y}, width {w}, height {h})",
                self.name
            )));
        }
        self.children.iter().try_for_each(ControlNode::check_geometry)
    }
}

/// Reply of `GET /controls/{name}/geometry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlGeometry {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl TryFrom<ControlGeometry> for Rect {
    type Error = AutomationError;

    fn try_from(g: ControlGeometry) -> Result<Self> {
        Rect::checked_from_xywh(g.left, g.top, g.width, g.height).ok_or_else(|| {
            AutomationError::BridgeProtocol(format!(
                "geometry overflows screen coordinates: {g:?}"
            ))
        })
    }
}

/// Filters of the flat control query. Empty fields are omitted from the query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlQuery {
    pub class: Option<String>,
    pub name: Option<String>,
    pub caption: Option<String>,
}

/// What a bridge click lands on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickTarget {
    Named(String),
    At(Point),
}

/// Every request the bridge understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeRequest {
    ListForms,
    ActiveFormControls,
    FormControls { handle: i64 },
    Controls(ControlQuery),
    Click(ClickTarget),
    SetText { name: String, text: String },
    Geometry { name: String },
}

impl BridgeRequest {
    pub fn method(&self) -> Method {
        match self {
            BridgeRequest::Click(_) | BridgeRequest::SetText { .. } => Method::POST,
            _ => Method::GET,
        }
    }

    pub fn path(&self) -> String {
        match self {
            BridgeRequest::ListForms => SIGNATURE_PATH.to_string(),
            BridgeRequest::ActiveFormControls => "/activeform/controls".to_string(),
            BridgeRequest::FormControls { handle } => format!("/forms/{handle}/controls"),
            BridgeRequest::Controls(_) => "/controls".to_string(),
            BridgeRequest::Click(_) => "/click".to_string(),
            BridgeRequest::SetText { .. } => "/settext".to_string(),
            BridgeRequest::Geometry { name } => format!("/controls/{}/geometry", urlencoding::encode(name)),
        }
    }

    pub fn query(&self) -> Vec<(&'static str, String)> {
        let BridgeRequest::Controls(q) = self else {
            return Vec::new();
        };
        [("class", &q.class), ("name", &q.name), ("caption", &q.caption)]
            .into_iter()
            .filter_map(|(k, v)| v.as_ref().filter(|v| !v.is_empty()).map(|v| (k, v.clone())))
            .collect()
    }

    pub fn body(&self) -> Option<Value> {
        match self {
            BridgeRequest::Click(ClickTarget::Named(name)) => Some(json!({ "name": name })),
            BridgeRequest::Click(ClickTarget::At(p)) => Some(json!({ "x": p.x, "y": p.y })),
            BridgeRequest::SetText { name, text } => Some(json!({ "name": name, "text": text })),
            _ => None,
        }
    }

    /// Short operation name for logs.
    pub fn operation(&self) -> &'static str {
        match self {
            BridgeRequest::ListForms => "list_forms",
            BridgeRequest::ActiveFormControls => "active_form_controls",
            BridgeRequest::FormControls { .. } => "form_controls",
            BridgeRequest::Controls(_) => "controls",
            BridgeRequest::Click(_) => "click",
            BridgeRequest::SetText { .. } => "set_text",
            BridgeRequest::Geometry { .. } => "geometry",
        }
    }
}

/// A listener answers like the bridge: a JSON array, empty or starting with a form handle.
pub fn is_signature_body(value: &Value) -> bool {
    match value.as_array() {
        Some(items) => items
            .first()
            .map(|first| first.get("handle").is_some())
            .unwrap_or(true),
        None => false,
    }
}

/// Extracts the control list from a snapshot reply, which is either a bare array or
/// an object carrying `controls`.
pub fn parse_controls(value: Value) -> Result<Vec<ControlNode>> {
    let nodes: Vec<ControlNode> = match value {
        Value::Object(mut map) if map.contains_key("controls") => {
            serde_json::from_value(map.remove("controls").unwrap_or(Value::Null))?
        }
        other => serde_json::from_value(other)?,
    };
    nodes.iter().try_for_each(ControlNode::check_geometry)?;
    Ok(nodes)
}
