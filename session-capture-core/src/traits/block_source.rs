use std::time::Duration;

use crate::models::audio_models::AudioFormat;
use crate::models::error::CaptureError;

/// Consumer end of the capture protocol with one hooked process.
///
/// Implemented by the Windows `HookConnection`; the recorder only sees this
/// trait.
pub trait BlockSource: Send {
    /// Requests a fresh capture and waits until the hook has published its
    /// data region. Returns the format of the blocks that will follow.
    fn start(&mut self, timeout: Duration) -> Result<AudioFormat, CaptureError>;

    /// Waits for the next published block and copies it into `out`.
    /// `Ok(false)` when nothing arrived within `timeout`.
    fn next_block(&mut self, out: &mut Vec<u8>, timeout: Duration) -> Result<bool, CaptureError>;

    /// Whether the hook's lifecycle thread has ended.
    fn hook_exited(&self) -> bool;

    /// Asks the hook to stop capturing and releases the data region view.
    fn stop(&mut self) -> Result<(), CaptureError>;

    /// Id of the data region currently read, 0 before `start`.
    fn map_id(&self) -> u32;
}
