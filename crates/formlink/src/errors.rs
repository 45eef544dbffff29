//! Error types for formlink

use crate::dialog::DialogDescriptor;
use crate::element::ElementDescriptor;
use crate::resolver::SourceAttempt;
use thiserror::Error;

/// Result type alias for formlink operations
pub type Result<T> = std::result::Result<T, AutomationError>;

/// Every failure the library can report. None of them is fatal to the host process.
#[derive(Debug, Error)]
pub enum AutomationError {
    /// No listening port of the target answered the bridge signature in time
    #[error("Bridge discovery failed (pid {pid:?}, {candidates} candidate port(s)): {reason}")]
    DiscoveryFailure {
        pid: Option<u32>,
        candidates: usize,
        reason: String,
    },

    /// Connection refused, reset or timed out while talking to the bridge
    #[error("Bridge transport error on {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// The bridge answered with a 4xx/5xx status
    #[error("Bridge returned HTTP {status} for {path}")]
    BridgeStatus { status: u16, path: String },

    /// The bridge answered with something that is not the expected JSON
    #[error("Bridge protocol error: {0}")]
    BridgeProtocol(String),

    /// Discovery recently failed and the cool-down has not elapsed
    #[error("Bridge unavailable: {0}")]
    BridgeUnavailable(String),

    /// No source produced a matching element
    #[error("Element not found: {selector} (tried: {})", describe_attempts(.attempts))]
    ElementNotFound {
        selector: String,
        attempts: Vec<SourceAttempt>,
    },

    /// A unique match was required but several elements matched
    #[error("Ambiguous match: {selector} matched {} elements", .candidates.len())]
    AmbiguousMatch {
        selector: String,
        candidates: Vec<ElementDescriptor>,
    },

    /// A batch step failed; execution stopped there
    #[error("Batch step {index} ({operation}) failed: {source}")]
    BatchStepFailure {
        index: usize,
        operation: String,
        #[source]
        source: Box<AutomationError>,
    },

    /// A modal native dialog owned by the target blocks interaction
    #[error("Blocking native dialog detected: '{}' ({})", .0.title, .0.window_class_signature)]
    BlockingDialogDetected(Box<DialogDescriptor>),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Verification failed: expected {expected:?}, found {actual:?}")]
    VerificationFailed { expected: String, actual: String },

    #[error("Platform error: {0}")]
    PlatformError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl AutomationError {
    /// Stable snake_case tag used in structured outcomes.
    pub fn kind(&self) -> &'static str {
        match self {
            AutomationError::DiscoveryFailure { .. } => "discovery_failure",
            AutomationError::Transport { .. } => "transport",
            AutomationError::BridgeStatus { .. } => "bridge_status",
            AutomationError::BridgeProtocol(_) => "bridge_protocol",
            AutomationError::BridgeUnavailable(_) => "bridge_unavailable",
            AutomationError::ElementNotFound { .. } => "element_not_found",
            AutomationError::AmbiguousMatch { .. } => "ambiguous_match",
            AutomationError::BatchStepFailure { .. } => "batch_step_failure",
            AutomationError::BlockingDialogDetected(_) => "blocking_dialog_detected",
            AutomationError::InvalidSelector(_) => "invalid_selector",
            AutomationError::InvalidArgument(_) => "invalid_argument",
            AutomationError::VerificationFailed { .. } => "verification_failed",
            AutomationError::PlatformError(_) => "platform_error",
            AutomationError::UnsupportedOperation(_) => "unsupported_operation",
            AutomationError::Cancelled => "cancelled",
        }
    }

    /// Errors that count toward the bridge rediscovery threshold.
    pub fn is_transport(&self) -> bool {
        matches!(self, AutomationError::Transport { .. })
    }
}

fn describe_attempts(attempts: &[SourceAttempt]) -> String {
    if attempts.is_empty() {
        return "no sources".to_string();
    }
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<serde_json::Error> for AutomationError {
    fn from(err: serde_json::Error) -> Self {
        AutomationError::BridgeProtocol(err.to_string())
    }
}
