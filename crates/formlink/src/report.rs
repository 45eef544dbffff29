//! Snapshot of what an operator can interact with right now.

use crate::dialog::DialogDescriptor;
use crate::element::{ElementDescriptor, ElementSource, FormContext};
use crate::resolver::{AttemptOutcome, SourceAttempt};
use serde::{Deserialize, Serialize};

/// Interactive controls of the active form plus any native dialog covering it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveFormReport {
    pub form_id: String,
    pub source: ElementSource,
    pub controls: Vec<ElementDescriptor>,
    pub attempts: Vec<SourceAttempt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_dialog: Option<DialogDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl ActiveFormReport {
    pub fn new(
        context: FormContext,
        attempts: Vec<SourceAttempt>,
        native_dialog: Option<DialogDescriptor>,
    ) -> Self {
        let warning = warning_for(&context, &attempts, native_dialog.as_ref());
        Self {
            form_id: context.form_id,
            source: context.source,
            controls: context.elements,
            attempts,
            native_dialog,
            warning,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.native_dialog.is_some()
    }
}

fn warning_for(
    context: &FormContext,
    attempts: &[SourceAttempt],
    dialog: Option<&DialogDescriptor>,
) -> Option<String> {
    if let Some(dialog) = dialog {
        let buttons: Vec<&str> = dialog.buttons().map(|b| b.display_text.as_str()).collect();
        return Some(format!(
            "native dialog '{}' is open and blocks input to the form; buttons: [{}]",
            dialog.title,
            buttons.join(", ")
        ));
    }
    if context.source == ElementSource::Accessibility {
        let bridge_error = attempts.iter().find_map(|a| match (&a.source, &a.outcome) {
            (ElementSource::Bridge, AttemptOutcome::Failed(e)) => Some(e.as_str()),
            _ => None,
        });
        if let Some(err) = bridge_error {
            return Some(format!(
                "bridge unavailable ({err}); controls come from the accessibility tree"
            ));
        }
    }
    if context.elements.is_empty() {
        return Some("the active form has no interactive controls".to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;

    fn context(source: ElementSource, elements: Vec<ElementDescriptor>) -> FormContext {
        FormContext {
            form_id: "42".to_string(),
            source,
            elements,
        }
    }

    fn button(text: &str) -> ElementDescriptor {
        ElementDescriptor {
            class_name: "Button".to_string(),
            control_type: Some("Button".to_string()),
            display_text: text.to_string(),
            ..ElementDescriptor::synthetic_point(crate::geometry::Point::new(0, 0))
        }
    }

    #[test]
    fn dialog_warning_lists_buttons() {
        let dialog = DialogDescriptor {
            window_class_signature: "#32770".to_string(),
            owner_process_id: 7,
            handle: 100,
            title: "Confirm".to_string(),
            bounding_rect: Rect::new(0, 0, 200, 100),
            children: vec![button("OK"), button("Cancel")],
        };
        let report = ActiveFormReport::new(
            context(ElementSource::Bridge, vec![button("Save")]),
            Vec::new(),
            Some(dialog),
        );
        assert!(report.is_blocked());
        let warning = report.warning.unwrap();
        assert!(warning.contains("'Confirm'"));
        assert!(warning.contains("[OK, Cancel]"));
    }

    #[test]
    fn fallback_warning_names_bridge_error() {
        let attempts = vec![
            SourceAttempt {
                source: ElementSource::Bridge,
                outcome: AttemptOutcome::Failed("connection refused".to_string()),
            },
            SourceAttempt {
                source: ElementSource::Accessibility,
                outcome: AttemptOutcome::Matched(1),
            },
        ];
        let report = ActiveFormReport::new(
            context(ElementSource::Accessibility, vec![button("Save")]),
            attempts,
            None,
        );
        assert!(report.warning.unwrap().contains("connection refused"));
    }

    #[test]
    fn clean_bridge_report_has_no_warning() {
        let report = ActiveFormReport::new(
            context(ElementSource::Bridge, vec![button("Save")]),
            Vec::new(),
            None,
        );
        assert_eq!(report.warning, None);
        assert_eq!(report.form_id, "42");
        assert_eq!(report.controls.len(), 1);
    }
}
