//! Detection of modal native dialogs the bridge cannot see.
//!
//! Message boxes and common dialogs are plain Win32 windows of class `#32770`;
//! they live outside the form framework, so only window enumeration finds them.

use crate::element::{ElementDescriptor, ElementSource};
use crate::errors::Result;
use crate::geometry::Rect;
use crate::platforms::{ChildWindow, TopLevelWindow, WindowEnumerator};
use crate::utils::truncate_chars;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DIALOG_CLASS_SIGNATURE: &str = "#32770";

/// Child classes reported for a dialog. Composite internals are not walked.
pub const DIALOG_CHILD_CLASSES: &[&str] = &[
    "Button",
    "Edit",
    "ComboBox",
    "ComboBoxEx32",
    "Static",
    "CheckBox",
];

const MAX_CHILD_TEXT: usize = 120;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogDescriptor {
    pub window_class_signature: String,
    pub owner_process_id: u32,
    pub handle: isize,
    pub title: String,
    pub bounding_rect: Rect,
    pub children: Vec<ElementDescriptor>,
}

impl DialogDescriptor {
    /// Button children, in window order.
    pub fn buttons(&self) -> impl Iterator<Item = &ElementDescriptor> {
        self.children
            .iter()
            .filter(|c| c.control_type.as_deref() == Some("Button"))
    }

    /// Text of the static children joined with newlines; usually the message.
    pub fn message(&self) -> String {
        self.children
            .iter()
            .filter(|c| c.class_name.eq_ignore_ascii_case("Static") && !c.display_text.is_empty())
            .map(|c| c.display_text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub struct NativeDialogDetector {
    windows: Arc<dyn WindowEnumerator>,
}

impl NativeDialogDetector {
    pub fn new(windows: Arc<dyn WindowEnumerator>) -> Self {
        Self { windows }
    }

    /// Every visible `#32770` window of `owner` (the foreground process when `None`).
    #[tracing::instrument(skip(self))]
    pub async fn detect_all(&self, owner: Option<u32>) -> Result<Vec<DialogDescriptor>> {
        let owner = match owner {
            Some(pid) => pid,
            None => match self.windows.foreground_process_id().await? {
                Some(pid) => pid,
                None => return Ok(Vec::new()),
            },
        };

        let candidates: Vec<TopLevelWindow> = self
            .windows
            .top_level_windows()
            .await?
            .into_iter()
            .filter(|w| w.visible && w.process_id == owner && w.class_name == DIALOG_CLASS_SIGNATURE)
            .collect();

        let mut dialogs = Vec::with_capacity(candidates.len());
        for window in candidates {
            let children = self.windows.child_windows(window.handle).await?;
            let form_id = window.handle.to_string();
            let children = children
                .into_iter()
                .filter(|c| c.parent == window.handle && c.visible && is_reported_class(&c.class_name))
                .map(|c| child_descriptor(c, &form_id))
                .collect();
            tracing::info!(handle = window.handle, title = %window.title, pid = owner, "native dialog detected");
            dialogs.push(DialogDescriptor {
                window_class_signature: window.class_name,
                owner_process_id: window.process_id,
                handle: window.handle,
                title: window.title,
                bounding_rect: window.rect,
                children,
            });
        }
        Ok(dialogs)
    }

    /// First dialog found, if any.
    pub async fn detect_blocking_dialog(&self, owner: Option<u32>) -> Result<Option<DialogDescriptor>> {
        Ok(self.detect_all(owner).await?.into_iter().next())
    }
}

fn is_reported_class(class_name: &str) -> bool {
    DIALOG_CHILD_CLASSES
        .iter()
        .any(|c| c.eq_ignore_ascii_case(class_name))
}

fn child_control_type(class_name: &str) -> &'static str {
    match class_name.to_ascii_lowercase().as_str() {
        "button" => "Button",
        "checkbox" => "CheckBox",
        "edit" => "Edit",
        "combobox" | "comboboxex32" => "ComboBox",
        _ => "Text",
    }
}

fn child_descriptor(child: ChildWindow, form_id: &str) -> ElementDescriptor {
    let control_type = child_control_type(&child.class_name);
    ElementDescriptor {
        automation_id: Some(child.control_id.to_string()),
        control_type: Some(control_type.to_string()),
        control_id: Some(child.control_id),
        display_text: truncate_chars(&child.text, MAX_CHILD_TEXT),
        bounding_rect: child.rect,
        is_visible: child.visible,
        is_enabled: child.enabled,
        is_interactive: control_type != "Text",
        source: ElementSource::Accessibility,
        owning_form_id: form_id.to_string(),
        class_name: child.class_name,
    }
}
