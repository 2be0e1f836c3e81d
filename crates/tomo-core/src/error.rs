//! Error types for the tomograph simulator.
//!
//! `TomoError` is the single error type flowing through the device, the
//! sequencer and the collaborator seams. It is `Clone` because a failure
//! recorded by a frame dispatch unit is stored once on the owning run and
//! re-raised, verbatim, by every later device call the run makes.
//!
//! ## Error Categories
//!
//! - **Caller errors** - `Validation`, `DeviceBusy`
//!   - Reported synchronously to whoever issued the command
//!   - Never touch the run's stop flag
//! - **Collaborator errors** - `Encode`, `Sink`
//!   - Raised inside frame dispatch units or while talking to storage
//!   - Recorded as the run's stop cause and surfaced on the next guard check
//! - **Contract errors** - `FrameFormat`, `Configuration`
//!   - A snapshot or configuration that cannot be used as-is

use thiserror::Error;

/// Error label used for every storage transport or protocol failure.
pub const STORAGE_ERROR: &str = "Problems with storage";

/// Error label used when a frame payload cannot be encoded.
pub const ENCODE_ERROR: &str = "Could not encode frame";

// =============================================================================
// Injected Faults
// =============================================================================

/// Category of a fault produced by the fault-injection framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Communication,
    Timeout,
    Hardware,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FaultKind::Communication => "communication",
            FaultKind::Timeout => "timeout",
            FaultKind::Hardware => "hardware",
        };
        write!(f, "{}", label)
    }
}

/// A simulated failure raised by a mock collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("'{component}' {kind} fault: {message}")]
pub struct InjectedFault {
    pub component: String,
    pub kind: FaultKind,
    pub message: String,
}

impl InjectedFault {
    pub fn new(component: impl Into<String>, kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias for results using [`TomoError`].
pub type TomoResult<T> = std::result::Result<T, TomoError>;

/// Primary error type for the tomograph simulator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TomoError {
    /// Caller supplied an invalid value or document.
    ///
    /// **Error Type**: Permanent for the request - the device is untouched.
    ///
    /// **Recovery Strategy**: Fix the input and resend.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An experiment currently owns the device.
    ///
    /// **Error Type**: Transient - clears when the running experiment
    /// reports its terminal event.
    #[error("On this tomograph experiment is running")]
    DeviceBusy,

    /// The frame encoder rejected its input.
    #[error("{error}: {detail}")]
    Encode { error: String, detail: String },

    /// The storage sink failed or answered outside its contract.
    ///
    /// Covers transport failures, non-JSON replies, replies without a
    /// `result` key and any `result` other than `"success"`.
    #[error("{error}: {detail}")]
    Sink { error: String, detail: String },

    /// A detector snapshot violated the frame contract.
    #[error("Malformed frame: {0}")]
    FrameFormat(String),

    /// Configuration parsed but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl TomoError {
    /// Build a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        TomoError::Validation(message.into())
    }

    /// Build a storage error with the standard label.
    pub fn sink(detail: impl Into<String>) -> Self {
        TomoError::Sink {
            error: STORAGE_ERROR.to_string(),
            detail: detail.into(),
        }
    }

    /// Build an encoder error with the standard label.
    pub fn encode(detail: impl Into<String>) -> Self {
        TomoError::Encode {
            error: ENCODE_ERROR.to_string(),
            detail: detail.into(),
        }
    }

    /// Short error label, as reported in the `error` field of a terminal event.
    pub fn error(&self) -> String {
        match self {
            TomoError::Encode { error, .. } | TomoError::Sink { error, .. } => error.clone(),
            TomoError::Validation(_) => "Validation error".to_string(),
            TomoError::DeviceBusy => "Device busy".to_string(),
            TomoError::FrameFormat(_) => "Malformed frame".to_string(),
            TomoError::Configuration(_) => "Configuration error".to_string(),
        }
    }

    /// Longer explanation, as reported in the `exception message` field.
    pub fn detail(&self) -> String {
        match self {
            TomoError::Encode { detail, .. } | TomoError::Sink { detail, .. } => detail.clone(),
            TomoError::Validation(msg)
            | TomoError::FrameFormat(msg)
            | TomoError::Configuration(msg) => msg.clone(),
            TomoError::DeviceBusy => self.to_string(),
        }
    }
}
