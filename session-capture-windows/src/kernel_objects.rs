//! Named events and mutexes shared between the hooked process and the
//! controller.

use std::time::Duration;

use windows::core::HSTRING;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::System::Threading::{
    CreateEventW, CreateMutexW, OpenEventW, SetEvent, WaitForSingleObject, EVENT_ALL_ACCESS, INFINITE,
};

use session_capture_core::models::error::CaptureError;
use session_capture_core::traits::platform::NamedSignal;

/// Owned kernel handle, closed on drop.
#[derive(Debug)]
pub struct OwnedHandle(HANDLE);

// SAFETY: kernel handles are process-wide and usable from any thread.
unsafe impl Send for OwnedHandle {}
unsafe impl Sync for OwnedHandle {}

impl OwnedHandle {
    pub(crate) fn from_raw(handle: HANDLE) -> Self {
        Self(handle)
    }

    pub fn raw(&self) -> HANDLE {
        self.0
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }
}

fn timeout_ms(timeout: Option<Duration>) -> u32 {
    match timeout {
        Some(t) => u32::try_from(t.as_millis()).unwrap_or(INFINITE - 1),
        None => INFINITE,
    }
}

/// Auto-reset named event.
#[derive(Debug)]
pub struct NamedEvent {
    name: String,
    handle: OwnedHandle,
}

impl NamedEvent {
    /// Creates the event unsignalled, or opens it if it already exists.
    pub fn create(name: &str) -> Result<Self, CaptureError> {
        let handle = unsafe { CreateEventW(None, false, false, &HSTRING::from(name)) }
            .map_err(|e| CaptureError::resource(name, e))?;
        Ok(Self {
            name: name.to_string(),
            handle: OwnedHandle(handle),
        })
    }

    /// Opens an event another process created.
    pub fn open(name: &str) -> Result<Self, CaptureError> {
        let handle = unsafe { OpenEventW(EVENT_ALL_ACCESS, false, &HSTRING::from(name)) }
            .map_err(|e| CaptureError::resource(name, e))?;
        Ok(Self {
            name: name.to_string(),
            handle: OwnedHandle(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl NamedSignal for NamedEvent {
    fn set(&self) -> Result<(), CaptureError> {
        unsafe { SetEvent(self.handle.raw()) }
            .map_err(|e| CaptureError::Platform(format!("SetEvent({}) failed: {}", self.name, e)))
    }

    fn try_wait(&self) -> bool {
        self.wait(Some(Duration::ZERO))
    }

    fn wait(&self, timeout: Option<Duration>) -> bool {
        unsafe { WaitForSingleObject(self.handle.raw(), timeout_ms(timeout)) == WAIT_OBJECT_0 }
    }
}

/// Named mutex. Only its existence matters; it is never acquired.
#[derive(Debug)]
pub struct NamedMutex {
    _handle: OwnedHandle,
}

impl NamedMutex {
    pub fn create(name: &str) -> Result<Self, CaptureError> {
        let handle = unsafe { CreateMutexW(None, false, &HSTRING::from(name)) }
            .map_err(|e| CaptureError::resource(name, e))?;
        Ok(Self {
            _handle: OwnedHandle(handle),
        })
    }
}
