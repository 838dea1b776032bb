use crate::models::error::CaptureError;
use crate::models::recording_result::RecordingResult;
use crate::models::state::RecorderState;

/// Event delegate for recorder notifications.
///
/// `on_block` and `on_error` are called from the pump thread, the rest from
/// the thread driving the recorder. Implementations should marshal to a UI
/// thread if needed.
pub trait CaptureDelegate: Send + Sync {
    /// Called when the recorder state changes.
    fn on_state_changed(&self, state: &RecorderState);

    /// Called for every block written to the recording.
    fn on_block(&self, bytes: usize);

    /// Called when an error ends the pump.
    fn on_error(&self, error: &CaptureError);

    /// Called when the recording is finalized.
    fn on_capture_finished(&self, result: &RecordingResult);
}
