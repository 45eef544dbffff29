use crate::element::ElementDescriptor;
use crate::errors::AutomationError;
use crate::geometry::Point;
use crate::utils::{normalize, text_matches};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Conjunctive element query. Every populated field must match.
///
/// A `point` selector bypasses tree search and cannot be combined with the other fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selector {
    #[serde(default, alias = "id")]
    pub automation_id: Option<String>,
    #[serde(default, alias = "title", alias = "caption")]
    pub text: Option<String>,
    #[serde(default, alias = "class")]
    pub class_name: Option<String>,
    #[serde(default)]
    pub control_type: Option<String>,
    #[serde(default)]
    pub control_id: Option<i64>,
    #[serde(default)]
    pub point: Option<Point>,
    /// Exact caption comparison; `false` switches to substring matching.
    #[serde(default = "default_exact")]
    pub exact: bool,
}

fn default_exact() -> bool {
    true
}

impl Default for Selector {
    fn default() -> Self {
        Self {
            automation_id: None,
            text: None,
            class_name: None,
            control_type: None,
            control_id: None,
            point: None,
            exact: true,
        }
    }
}

impl Selector {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            automation_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn by_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn at(x: i32, y: i32) -> Self {
        Self {
            point: Some(Point::new(x, y)),
            ..Default::default()
        }
    }

    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    pub fn with_control_type(mut self, control_type: impl Into<String>) -> Self {
        self.control_type = Some(control_type.into());
        self
    }

    pub fn with_control_id(mut self, control_id: i64) -> Self {
        self.control_id = Some(control_id);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Caption matching by substring instead of equality.
    pub fn contains(mut self) -> Self {
        self.exact = false;
        self
    }

    pub fn is_coordinate(&self) -> bool {
        self.point.is_some()
    }

    fn has_tree_fields(&self) -> bool {
        self.automation_id.is_some()
            || self.text.is_some()
            || self.class_name.is_some()
            || self.control_type.is_some()
            || self.control_id.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_tree_fields() && self.point.is_none()
    }

    /// Rejects empty selectors and coordinates mixed with tree fields.
    pub fn validate(&self) -> Result<(), AutomationError> {
        if self.is_empty() {
            return Err(AutomationError::InvalidSelector(
                "selector needs at least one of id, text, class, type, ctrl or at".to_string(),
            ));
        }
        if self.point.is_some() && self.has_tree_fields() {
            return Err(AutomationError::InvalidSelector(
                "'at:' coordinates cannot be combined with other selector fields".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `element` satisfies every populated field.
    pub fn matches(&self, element: &ElementDescriptor) -> bool {
        if let Some(id) = &self.automation_id {
            match &element.automation_id {
                Some(actual) if actual.eq_ignore_ascii_case(id) => {}
                _ => return false,
            }
        }
        if let Some(text) = &self.text {
            if !text_matches(&element.display_text, text, self.exact) {
                return false;
            }
        }
        if let Some(class) = &self.class_name {
            if !element.class_name.eq_ignore_ascii_case(class) {
                return false;
            }
        }
        if let Some(control_type) = &self.control_type {
            match &element.control_type {
                Some(actual) if normalize(actual) == normalize(control_type) => {}
                _ => return false,
            }
        }
        if let Some(control_id) = self.control_id {
            if element.control_id != Some(control_id) {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(id) = &self.automation_id {
            parts.push(format!("automation_id='{id}'"));
        }
        if let Some(text) = &self.text {
            let op = if self.exact { "text" } else { "text~" };
            parts.push(format!("{op}='{text}'"));
        }
        if let Some(class) = &self.class_name {
            parts.push(format!("class_name='{class}'"));
        }
        if let Some(control_type) = &self.control_type {
            parts.push(format!("control_type='{control_type}'"));
        }
        if let Some(control_id) = self.control_id {
            parts.push(format!("control_id={control_id}"));
        }
        if let Some(point) = self.point {
            parts.push(format!("at={point}"));
        }
        if parts.is_empty() {
            f.write_str("<empty selector>")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

/// Parses `id:btnSave && text:Save`, `class:TcxButton`, `type:Button`, `ctrl:1`,
/// `contains:Sav`, `at:120,340` and the `#btnSave` shorthand. A bare string is a caption.
impl FromStr for Selector {
    type Err = AutomationError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut selector = Selector::default();
        for raw in input.split("&&") {
            let segment = raw.trim();
            if segment.is_empty() {
                return Err(AutomationError::InvalidSelector(format!(
                    "empty segment in '{input}'"
                )));
            }
            apply_segment(&mut selector, segment)?;
        }
        selector.validate()?;
        Ok(selector)
    }
}

impl TryFrom<&str> for Selector {
    type Error = AutomationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

fn apply_segment(selector: &mut Selector, segment: &str) -> Result<(), AutomationError> {
    if let Some(id) = segment.strip_prefix('#') {
        return set_once(&mut selector.automation_id, "id", id.trim().to_string());
    }
    let Some((prefix, value)) = segment.split_once(':') else {
        return set_once(&mut selector.text, "text", segment.to_string());
    };
    let value = value.trim();
    match prefix.trim().to_ascii_lowercase().as_str() {
        "id" | "nativeid" => set_once(&mut selector.automation_id, "id", value.to_string()),
        "text" | "name" | "caption" | "title" => {
            set_once(&mut selector.text, "text", value.to_string())
        }
        "contains" => {
            selector.exact = false;
            set_once(&mut selector.text, "text", value.to_string())
        }
        "class" | "classname" => set_once(&mut selector.class_name, "class", value.to_string()),
        "type" | "role" => set_once(&mut selector.control_type, "type", value.to_string()),
        "ctrl" | "controlid" => {
            let id = value.parse::<i64>().map_err(|_| {
                AutomationError::InvalidSelector(format!("invalid control id '{value}'"))
            })?;
            set_once(&mut selector.control_id, "ctrl", id)
        }
        "at" => {
            let point = parse_point(value)?;
            set_once(&mut selector.point, "at", point)
        }
        other => Err(AutomationError::InvalidSelector(format!(
            "unknown selector prefix '{other}:', expected id, text, contains, class, type, ctrl or at"
        ))),
    }
}

fn set_once<T>(slot: &mut Option<T>, name: &str, value: T) -> Result<(), AutomationError> {
    if slot.is_some() {
        return Err(AutomationError::InvalidSelector(format!(
            "'{name}:' given more than once"
        )));
    }
    *slot = Some(value);
    Ok(())
}

fn parse_point(value: &str) -> Result<Point, AutomationError> {
    let invalid = || AutomationError::InvalidSelector(format!("invalid coordinates '{value}', expected x,y"));
    let (x, y) = value.split_once(',').ok_or_else(invalid)?;
    let x = x.trim().parse::<i32>().map_err(|_| invalid())?;
    let y = y.trim().parse::<i32>().map_err(|_| invalid())?;
    Ok(Point::new(x, y))
}

/// How far a query looks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Only the currently focused top-level form.
    #[default]
    #[serde(alias = "active")]
    ActiveForm,
    /// Every form the source can see.
    Global,
}

impl FromStr for Scope {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" | "active_form" | "activeform" => Ok(Scope::ActiveForm),
            "global" | "all" => Ok(Scope::Global),
            other => Err(AutomationError::InvalidArgument(format!(
                "unknown scope '{other}', expected active or global"
            ))),
        }
    }
}

/// Which sources a resolution may consult, in order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePreference {
    #[default]
    BridgeFirst,
    BridgeOnly,
    AccessibilityOnly,
}

impl FromStr for SourcePreference {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "bridge_first" | "bridge-first" => Ok(SourcePreference::BridgeFirst),
            "bridge" | "bridge_only" | "bridge-only" => Ok(SourcePreference::BridgeOnly),
            "accessibility" | "uia" | "accessibility_only" | "accessibility-only" => {
                Ok(SourcePreference::AccessibilityOnly)
            }
            other => Err(AutomationError::InvalidArgument(format!(
                "unknown source '{other}', expected auto, bridge or accessibility"
            ))),
        }
    }
}

/// What `resolve_one` does when several elements match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    #[default]
    Unique,
    First,
    Nth(usize),
}

impl FromStr for MatchPolicy {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "unique" => Ok(MatchPolicy::Unique),
            "first" => Ok(MatchPolicy::First),
            _ => s
                .strip_prefix("nth:")
                .or_else(|| s.strip_prefix("nth="))
                .and_then(|n| n.trim().parse::<usize>().ok())
                .map(MatchPolicy::Nth)
                .ok_or_else(|| {
                    AutomationError::InvalidArgument(format!(
                        "unknown match policy '{s}', expected unique, first or nth:N"
                    ))
                }),
        }
    }
}
