use thiserror::Error;

/// Errors that can occur while setting up or running a capture.
///
/// Construction-time variants are fatal to the capture session. Per-call
/// conditions inside intercepted render calls never surface as errors; they
/// are absorbed into engine state transitions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("failed to create {object}: {reason}")]
    ResourceCreation { object: String, reason: String },

    #[error("render client offsets are unresolved")]
    OffsetsUnresolved,

    #[error("module not loaded: {0}")]
    ModuleNotLoaded(String),

    #[error("failed to hook {name}: {reason}")]
    HookFailed { name: String, reason: String },

    #[error("invalid shared memory layout: {0}")]
    Layout(String),

    #[error("protocol version mismatch: expected {expected}.x, found {found_major}.{found_minor}")]
    VersionMismatch {
        expected: u32,
        found_major: u32,
        found_minor: u32,
    },

    #[error("offset probe failed: {0}")]
    Probe(String),

    #[error("hook exited")]
    HookExited,

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("timeout")]
    Timeout,

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("platform error: {0}")]
    Platform(String),
}

impl CaptureError {
    pub fn resource(object: impl Into<String>, reason: impl ToString) -> Self {
        Self::ResourceCreation {
            object: object.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the condition only means "not ready yet" and polling should
    /// keep retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::OffsetsUnresolved | Self::ModuleNotLoaded(_))
    }
}
