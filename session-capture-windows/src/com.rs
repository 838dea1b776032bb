use windows::Win32::System::Com::{CoInitializeEx, CoUninitialize, COINIT_MULTITHREADED};

use session_capture_core::models::error::CaptureError;

/// Keeps COM initialized on the current thread until dropped.
pub struct ComGuard(());

impl ComGuard {
    pub fn initialize() -> Result<Self, CaptureError> {
        // SAFETY: paired with CoUninitialize in Drop on the same thread.
        unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) }
            .ok()
            .map_err(|e| CaptureError::Platform(format!("CoInitializeEx failed: {}", e)))?;
        Ok(Self(()))
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        unsafe {
            CoUninitialize();
        }
    }
}
