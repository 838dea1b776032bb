use super::error::CaptureError;
use super::recording_result::RecordingResult;

/// Lifecycle state of the capture engine inside the hooked process.
///
/// State transitions:
/// ```text
/// unstarted → waiting-for-init → polling → hooked(inactive) ↔ hooked(active)
///                    ↓              ↑            │
///             never-initialized     └────────────┘ (render module unloaded)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Unstarted,
    WaitingForInit,
    Polling,
    Hooked { active: bool },
    /// The init signal never arrived within the configured timeout.
    NeverInitialized,
}

impl EngineState {
    pub fn is_hooked(&self) -> bool {
        matches!(self, Self::Hooked { .. })
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Hooked { active: true })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NeverInitialized)
    }
}

/// Controller-side recording state machine.
///
/// State transitions:
/// ```text
/// idle → connecting → capturing → stopping → completed
///            ↓            ↓
///          failed ←───────┘ (hook exited, read error)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderState {
    Idle,
    Connecting,
    Capturing { duration_secs: f64 },
    Stopping,
    Completed(Box<RecordingResult>),
    Failed(CaptureError),
}

impl RecorderState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }

    /// Returns the current duration if in a state that tracks it.
    pub fn duration(&self) -> Option<f64> {
        match self {
            Self::Capturing { duration_secs } => Some(*duration_secs),
            Self::Completed(result) => Some(result.duration_secs),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_predicates() {
        assert!(EngineState::Hooked { active: false }.is_hooked());
        assert!(!EngineState::Hooked { active: false }.is_active());
        assert!(EngineState::Hooked { active: true }.is_active());
        assert!(!EngineState::Polling.is_hooked());
        assert!(EngineState::NeverInitialized.is_terminal());
        assert!(!EngineState::WaitingForInit.is_terminal());
    }

    #[test]
    fn recorder_state_predicates() {
        assert!(RecorderState::Idle.is_idle());
        assert!(RecorderState::Capturing { duration_secs: 1.0 }.is_capturing());
        assert!(RecorderState::Failed(CaptureError::HookExited).is_terminal());
        assert_eq!(RecorderState::Capturing { duration_secs: 2.5 }.duration(), Some(2.5));
        assert_eq!(RecorderState::Connecting.duration(), None);
    }
}
