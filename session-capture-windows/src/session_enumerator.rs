//! Audio session enumeration via the MMDevice and session manager APIs.
//!
//! Walks every active render endpoint, lists the sessions on it and
//! reports each one owned by a real process as an `AudioSessionInfo`.

use std::ffi::c_void;
use std::path::Path;

use windows::core::{Interface, PROPVARIANT, PWSTR};
use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
use windows::Win32::Foundation::S_OK;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
};

use crate::kernel_objects::OwnedHandle;
use session_capture_core::models::audio_models::AudioSessionInfo;
use session_capture_core::models::error::CaptureError;

/// Audio session enumerator.
pub struct SessionEnumerator {
    enumerator: IMMDeviceEnumerator,
}

impl SessionEnumerator {
    /// Requires COM to be initialized on the calling thread.
    pub fn new() -> Result<Self, CaptureError> {
        unsafe {
            let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(|e| CaptureError::Platform(format!("failed to create enumerator: {}", e)))?;
            Ok(Self { enumerator })
        }
    }

    /// Lists sessions on all active render endpoints. The system sounds
    /// session and sessions without an owning process are skipped, as are
    /// endpoints whose sessions cannot be listed. Enumeration failures are
    /// logged and yield an empty list.
    pub fn list_sessions(&self) -> Vec<AudioSessionInfo> {
        self.try_list_sessions().unwrap_or_else(|e| {
            log::warn!("session enumeration failed: {}", e);
            Vec::new()
        })
    }

    fn try_list_sessions(&self) -> Result<Vec<AudioSessionInfo>, CaptureError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(eRender, DEVICE_STATE_ACTIVE)
                .map_err(|e| CaptureError::Platform(format!("EnumAudioEndpoints failed: {}", e)))?;

            let count = collection
                .GetCount()
                .map_err(|e| CaptureError::Platform(format!("GetCount failed: {}", e)))?;

            let mut sessions = Vec::new();
            for i in 0..count {
                let Ok(device) = collection.Item(i) else {
                    continue;
                };
                let device_id = match device.GetId() {
                    Ok(id) => take_co_string(id),
                    Err(_) => continue,
                };
                let device_name = device_friendly_name(&device).unwrap_or_else(|| format!("Device {}", i));

                if let Err(e) = list_device_sessions(&device, &device_id, &device_name, &mut sessions) {
                    log::debug!("skipping sessions of {}: {}", device_name, e);
                }
            }
            Ok(sessions)
        }
    }

    /// Sessions owned by `pid`, on any endpoint.
    pub fn sessions_of(&self, pid: u32) -> Vec<AudioSessionInfo> {
        let mut sessions = self.list_sessions();
        sessions.retain(|s| s.process_id == pid);
        sessions
    }
}

fn list_device_sessions(
    device: &IMMDevice,
    device_id: &str,
    device_name: &str,
    out: &mut Vec<AudioSessionInfo>,
) -> windows::core::Result<()> {
    unsafe {
        let manager: IAudioSessionManager2 = device.Activate(CLSCTX_ALL, None)?;
        let sessions = manager.GetSessionEnumerator()?;
        for i in 0..sessions.GetCount()? {
            let control: IAudioSessionControl2 = match sessions.GetSession(i).and_then(|c| c.cast()) {
                Ok(c) => c,
                Err(_) => continue,
            };
            if control.IsSystemSoundsSession() == S_OK {
                continue;
            }
            let process_id = match control.GetProcessId() {
                Ok(pid) if pid != 0 => pid,
                _ => continue,
            };
            let session_id = match control.GetSessionIdentifier() {
                Ok(id) => take_co_string(id),
                Err(_) => continue,
            };
            let session_name = control.GetDisplayName().map(take_co_string).unwrap_or_default();
            let exe = process_image_name(process_id).unwrap_or_default();

            out.push(AudioSessionInfo {
                session_name,
                session_id,
                device_name: device_name.to_string(),
                device_id: device_id.to_string(),
                process_id,
                exe,
            });
        }
    }
    Ok(())
}

/// Converts and frees a string the callee allocated with the COM allocator.
fn take_co_string(value: PWSTR) -> String {
    if value.is_null() {
        return String::new();
    }
    unsafe {
        let text = value.to_string().unwrap_or_default();
        CoTaskMemFree(Some(value.0 as *const c_void));
        text
    }
}

fn device_friendly_name(device: &IMMDevice) -> Option<String> {
    unsafe {
        let store = device.OpenPropertyStore(STGM_READ).ok()?;
        let value: PROPVARIANT = store.GetValue(&PKEY_Device_FriendlyName).ok()?;
        let name = value.to_string();
        (!name.is_empty()).then_some(name)
    }
}

/// File name of the executable running as `pid`.
fn process_image_name(pid: u32) -> Option<String> {
    unsafe {
        let process = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid).ok()?;
        let process = OwnedHandle::from_raw(process);

        let mut buffer = [0u16; 1024];
        let mut len = buffer.len() as u32;
        QueryFullProcessImageNameW(process.raw(), PROCESS_NAME_WIN32, PWSTR(buffer.as_mut_ptr()), &mut len)
            .ok()?;

        let path = String::from_utf16_lossy(&buffer[..len as usize]);
        Path::new(&path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }
}
