//! Decides which raw controls become targetable [`ElementDescriptor`]s.
//!
//! Both sources produce nested trees; flattening walks them depth-first so the
//! resulting order is the document order of the snapshot.

use crate::bridge::protocol::ControlNode;
use crate::element::{infer_control_type, ElementDescriptor, ElementSource};
use crate::platforms::AccessibleNode;
use crate::utils::truncate_chars;
use serde::{Deserialize, Serialize};

/// Editor parts owned by a composite control; targeting them directly breaks focus handling.
pub const INNER_CLASSES: &[&str] = &[
    "TcxCustomDropDownInnerEdit",
    "TDBrosGridFieldEditor",
    "TcxCustomRadioGroupButton",
];

/// Bridge captions longer than this are cut, in characters. Memo and grid
/// controls report their whole content as text.
pub const MAX_CONTROL_TEXT: usize = 80;

pub const LABEL_CLASSES: &[&str] = &["TLabel", "TcxLabel"];

pub const CONTAINER_CLASSES: &[&str] = &[
    "TPanel",
    "TcxScrollBox",
    "TShape",
    "TPageControl",
    "TScrollBox",
];

const LABEL_CONTROL_TYPES: &[&str] = &["Text"];
const CONTAINER_CONTROL_TYPES: &[&str] = &["Group", "ScrollBar", "Separator", "TitleBar", "Thumb"];

/// Inclusion flags; everything defaults to excluded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementFilter {
    pub include_hidden: bool,
    pub include_labels: bool,
    pub include_containers: bool,
    pub include_inner: bool,
}

impl ElementFilter {
    /// Everything, for inspection dumps.
    pub fn all() -> Self {
        Self {
            include_hidden: true,
            include_labels: true,
            include_containers: true,
            include_inner: true,
        }
    }
}

/// Coarse role of a control for filtering purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRole {
    Interactive,
    Label,
    Container,
    Inner,
}

pub fn classify(class_name: &str, control_type: Option<&str>) -> ControlRole {
    let in_set = |set: &[&str]| set.iter().any(|c| c.eq_ignore_ascii_case(class_name));
    if in_set(INNER_CLASSES) {
        return ControlRole::Inner;
    }
    if in_set(LABEL_CLASSES) {
        return ControlRole::Label;
    }
    if in_set(CONTAINER_CLASSES) {
        return ControlRole::Container;
    }
    match control_type {
        Some(t) if LABEL_CONTROL_TYPES.contains(&t) => ControlRole::Label,
        Some(t) if CONTAINER_CONTROL_TYPES.contains(&t) => ControlRole::Container,
        _ => ControlRole::Interactive,
    }
}

impl ElementFilter {
    fn admits(&self, role: ControlRole) -> bool {
        match role {
            ControlRole::Interactive => true,
            ControlRole::Label => self.include_labels,
            ControlRole::Container => self.include_containers,
            ControlRole::Inner => self.include_inner,
        }
    }
}

/// Flattens a bridge control tree. Nodes without a name cannot be targeted and are
/// skipped; hidden nodes are skipped but their children are still visited; inner
/// editor parts are skipped together with their subtree.
pub fn flatten_bridge_nodes(
    nodes: &[ControlNode],
    form_id: &str,
    filter: &ElementFilter,
) -> Vec<ElementDescriptor> {
    let mut out = Vec::new();
    for node in nodes {
        walk_bridge(node, form_id, filter, &mut out);
    }
    out
}

fn walk_bridge(
    node: &ControlNode,
    form_id: &str,
    filter: &ElementFilter,
    out: &mut Vec<ElementDescriptor>,
) {
    let control_type = infer_control_type(&node.class_name);
    let role = classify(&node.class_name, Some(control_type));
    if role == ControlRole::Inner && !filter.include_inner {
        return;
    }

    let visible_ok = node.visible || filter.include_hidden;
    if visible_ok && !node.name.is_empty() && filter.admits(role) {
        out.push(ElementDescriptor {
            automation_id: Some(node.name.clone()),
            class_name: node.class_name.clone(),
            control_type: Some(control_type.to_string()),
            control_id: None,
            display_text: truncate_chars(&node.text, MAX_CONTROL_TEXT),
            bounding_rect: node.rect(),
            is_visible: node.visible,
            is_enabled: node.enabled,
            is_interactive: role == ControlRole::Interactive,
            source: ElementSource::Bridge,
            owning_form_id: form_id.to_string(),
        });
    }

    for child in &node.children {
        walk_bridge(child, form_id, filter, out);
    }
}

/// Flattens an accessibility subtree. The root (the window itself) is not emitted.
pub fn flatten_accessible(
    root: &AccessibleNode,
    form_id: &str,
    filter: &ElementFilter,
) -> Vec<ElementDescriptor> {
    let mut out = Vec::new();
    for child in &root.children {
        walk_accessible(child, form_id, filter, &mut out);
    }
    out
}

fn walk_accessible(
    node: &AccessibleNode,
    form_id: &str,
    filter: &ElementFilter,
    out: &mut Vec<ElementDescriptor>,
) {
    let role = classify(&node.class_name, Some(node.control_type.as_str()));
    if role == ControlRole::Inner && !filter.include_inner {
        return;
    }

    let targetable = !node.automation_id.is_empty() || !node.name.is_empty() || node.control_id.is_some();
    if (!node.is_offscreen || filter.include_hidden) && targetable && filter.admits(role) {
        out.push(ElementDescriptor {
            automation_id: Some(node.automation_id.clone()).filter(|s| !s.is_empty()),
            class_name: node.class_name.clone(),
            control_type: Some(node.control_type.clone()).filter(|s| !s.is_empty()),
            control_id: node.control_id,
            display_text: node.name.clone(),
            bounding_rect: node.bounds.unwrap_or_default(),
            is_visible: !node.is_offscreen,
            is_enabled: node.is_enabled,
            is_interactive: role == ControlRole::Interactive,
            source: ElementSource::Accessibility,
            owning_form_id: form_id.to_string(),
        });
    }

    for child in &node.children {
        walk_accessible(child, form_id, filter, out);
    }
}
