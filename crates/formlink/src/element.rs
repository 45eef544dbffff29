use crate::geometry::{Point, Rect};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which source of truth produced a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementSource {
    Bridge,
    Accessibility,
    Coordinates,
}

impl fmt::Display for ElementSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementSource::Bridge => "bridge",
            ElementSource::Accessibility => "accessibility",
            ElementSource::Coordinates => "coordinates",
        };
        f.write_str(name)
    }
}

/// A control as seen by one source at one moment. Never cached across calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    /// Unique within its form, not globally.
    pub automation_id: Option<String>,
    pub class_name: String,
    pub control_type: Option<String>,
    pub control_id: Option<i64>,
    pub display_text: String,
    pub bounding_rect: Rect,
    pub is_visible: bool,
    pub is_enabled: bool,
    pub is_interactive: bool,
    pub source: ElementSource,
    pub owning_form_id: String,
}

impl ElementDescriptor {
    /// Descriptor for a raw screen coordinate; carries nothing but the point.
    pub fn synthetic_point(point: Point) -> Self {
        Self {
            automation_id: None,
            class_name: String::new(),
            control_type: None,
            control_id: None,
            display_text: String::new(),
            bounding_rect: Rect::at_point(point),
            is_visible: true,
            is_enabled: true,
            is_interactive: true,
            source: ElementSource::Coordinates,
            owning_form_id: String::new(),
        }
    }

    /// Short human label for logs and errors.
    pub fn label(&self) -> String {
        if let Some(id) = self.automation_id.as_deref().filter(|s| !s.is_empty()) {
            return format!("{} '{}'", self.class_name, id);
        }
        if !self.display_text.is_empty() {
            return format!("{} \"{}\"", self.class_name, self.display_text);
        }
        if self.source == ElementSource::Coordinates {
            return format!("point {}", self.bounding_rect.center());
        }
        self.class_name.clone()
    }
}

/// The focused (or one enumerated) top-level form as seen by a single source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormContext {
    pub form_id: String,
    pub source: ElementSource,
    pub elements: Vec<ElementDescriptor>,
}

/// Maps a VCL/DevExpress class name to the coarse control type the accessibility
/// tree would report for a similar control.
pub fn infer_control_type(class_name: &str) -> &'static str {
    let class = class_name.to_ascii_lowercase();
    let has = |needle: &str| class.contains(needle);

    if has("checkbox") {
        "CheckBox"
    } else if has("radio") {
        "RadioButton"
    } else if has("combo") || has("lookup") || has("dropdown") {
        "ComboBox"
    } else if has("grid") || has("listview") {
        "DataGrid"
    } else if has("button") || has("btn") {
        "Button"
    } else if has("edit") || has("memo") || has("spin") || has("dateedit") || has("maskedit") {
        "Edit"
    } else if has("tabsheet") || has("pagecontrol") || has("tab") {
        "Tab"
    } else if has("label") || has("statictext") {
        "Text"
    } else {
        "Pane"
    }
}
