//! Offset probe: finds where `IAudioRenderClient::GetBuffer` and
//! `ReleaseBuffer` live inside the render module of this process.
//!
//! Sequence:
//! 1. CoInitializeEx (MTA)
//! 2. Get default render endpoint
//! 3. Activate IAudioClient, initialize it in shared mode with the mix format
//! 4. Get IAudioRenderClient
//! 5. Read vtable slots 3 and 4, subtract the render module base
//!
//! The probe runs in its own short-lived process, once per bitness, because
//! offsets only hold for the module build and bitness that produced them.

use std::ffi::c_void;

use windows::core::{Interface, HSTRING};
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::LibraryLoader::GetModuleHandleW;

use crate::com::ComGuard;
use crate::wave_format::{WaveFormatFields, WAVE_FORMAT_EXTENSIBLE};
use session_capture_core::models::audio_models::AudioFormat;
use session_capture_core::models::error::CaptureError;
use session_capture_core::protocol::hook_info::RenderClientOffsets;

pub const RENDER_MODULE: &str = "audioses.dll";

/// Vtable slots after the three `IUnknown` methods.
const SLOT_GET_BUFFER: usize = 3;
const SLOT_RELEASE_BUFFER: usize = 4;

/// 1 ms in 100 ns units; the client only exists long enough to be probed.
const PROBE_BUFFER_DURATION: i64 = 10_000;

/// Mix format returned by `GetMixFormat`, freed with `CoTaskMemFree`.
struct MixFormat(*mut WAVEFORMATEX);

impl MixFormat {
    fn as_ptr(&self) -> *const WAVEFORMATEX {
        self.0
    }

    fn fields(&self) -> WaveFormatFields {
        // SAFETY: GetMixFormat returned a valid WAVEFORMATEX, extended to a
        // WAVEFORMATEXTENSIBLE when the tag says so.
        unsafe {
            let format = std::ptr::read_unaligned(self.0);
            let sub_format_tag = if format.wFormatTag == WAVE_FORMAT_EXTENSIBLE {
                let ext = std::ptr::read_unaligned(self.0.cast::<WAVEFORMATEXTENSIBLE>());
                Some(ext.SubFormat.data1 as u16)
            } else {
                None
            };
            WaveFormatFields {
                format_tag: format.wFormatTag,
                channels: format.nChannels,
                samples_per_sec: format.nSamplesPerSec,
                block_align: format.nBlockAlign,
                bits_per_sample: format.wBitsPerSample,
                sub_format_tag,
            }
        }
    }
}

impl Drop for MixFormat {
    fn drop(&mut self) {
        unsafe {
            CoTaskMemFree(Some(self.0 as *const c_void));
        }
    }
}

fn default_render_device() -> Result<IMMDevice, CaptureError> {
    unsafe {
        let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
            .map_err(|e| CaptureError::Probe(format!("failed to create enumerator: {}", e)))?;
        enumerator
            .GetDefaultAudioEndpoint(eRender, eConsole)
            .map_err(|e| CaptureError::Probe(format!("no default render endpoint: {}", e)))
    }
}

fn mix_format(client: &IAudioClient) -> Result<MixFormat, CaptureError> {
    let format = unsafe { client.GetMixFormat() }
        .map_err(|e| CaptureError::Probe(format!("GetMixFormat failed: {}", e)))?;
    if format.is_null() {
        return Err(CaptureError::Probe("GetMixFormat returned null".into()));
    }
    Ok(MixFormat(format))
}

/// Probes the render client method offsets. Any failure is logged and
/// yields zero offsets, which consumers treat as unresolved.
pub fn probe_offsets() -> RenderClientOffsets {
    match try_probe_offsets() {
        Ok(offsets) => offsets,
        Err(e) => {
            log::warn!("{}", e);
            RenderClientOffsets::default()
        }
    }
}

fn try_probe_offsets() -> Result<RenderClientOffsets, CaptureError> {
    let _com = ComGuard::initialize()?;
    let device = default_render_device()?;

    unsafe {
        let audio_client: IAudioClient = device
            .Activate(CLSCTX_ALL, None)
            .map_err(|e| CaptureError::Probe(format!("Activate failed: {}", e)))?;

        let format = mix_format(&audio_client)?;
        audio_client
            .Initialize(AUDCLNT_SHAREMODE_SHARED, 0, PROBE_BUFFER_DURATION, 0, format.as_ptr(), None)
            .map_err(|e| CaptureError::Probe(format!("IAudioClient::Initialize failed: {}", e)))?;

        let render_client: IAudioRenderClient = audio_client
            .GetService()
            .map_err(|e| CaptureError::Probe(format!("GetService failed: {}", e)))?;

        let module = GetModuleHandleW(&HSTRING::from(RENDER_MODULE))
            .map_err(|e| CaptureError::Probe(format!("{} not loaded: {}", RENDER_MODULE, e)))?;

        // SAFETY: a COM interface pointer points at its vtable pointer.
        let vtable = *(render_client.as_raw() as *const *const usize);
        let get_buffer = *vtable.add(SLOT_GET_BUFFER);
        let release_buffer = *vtable.add(SLOT_RELEASE_BUFFER);

        let offsets = RenderClientOffsets::from_addresses(module.0 as usize, get_buffer, release_buffer);
        log::debug!(
            "render client at {:#x}: GetBuffer {:#x}, ReleaseBuffer {:#x}",
            module.0 as usize,
            offsets.get_buffer,
            offsets.release_buffer
        );
        if !offsets.is_resolved() {
            return Err(CaptureError::Probe("render client methods lie outside the render module".into()));
        }
        Ok(offsets)
    }
}

/// Mix format of the render endpoint `device_id`, or of the default render
/// endpoint when None. This is the format hooked render clients write in.
///
/// Requires COM to be initialized on the calling thread.
pub fn render_mix_format(device_id: Option<&str>) -> Result<AudioFormat, CaptureError> {
    let device = match device_id {
        Some(id) => unsafe {
            let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(|e| CaptureError::Platform(format!("failed to create enumerator: {}", e)))?;
            enumerator
                .GetDevice(&HSTRING::from(id))
                .map_err(|e| CaptureError::Platform(format!("render endpoint {} not found: {}", id, e)))?
        },
        None => default_render_device()?,
    };
    let audio_client: IAudioClient = unsafe { device.Activate(CLSCTX_ALL, None) }
        .map_err(|e| CaptureError::Platform(format!("Activate failed: {}", e)))?;
    Ok(mix_format(&audio_client)?.fields().to_audio_format())
}
