//! `CapturePlatform` over Win32 kernel objects and `retour` detours.

use std::ffi::c_void;

use windows::core::{HRESULT, HSTRING};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Threading::GetCurrentProcessId;

use crate::inline_patch::DetourPatch;
use crate::kernel_objects::{NamedEvent, NamedMutex};
use crate::shared_memory::MappedRegion;
use session_capture_core::models::error::CaptureError;
use session_capture_core::traits::platform::CapturePlatform;

/// `IAudioRenderClient::GetBuffer` as it appears in the vtable.
pub type GetBufferFn = unsafe extern "system" fn(this: *mut c_void, frames: u32, data: *mut *mut u8) -> HRESULT;

/// `IAudioRenderClient::ReleaseBuffer` as it appears in the vtable.
pub type ReleaseBufferFn = unsafe extern "system" fn(this: *mut c_void, frames: u32, flags: u32) -> HRESULT;

/// Platform services of the hooked process. Holds the replacement
/// functions the render client methods are redirected to.
pub struct WindowsPlatform {
    get_buffer_replacement: GetBufferFn,
    release_buffer_replacement: ReleaseBufferFn,
}

impl WindowsPlatform {
    pub fn new(get_buffer_replacement: GetBufferFn, release_buffer_replacement: ReleaseBufferFn) -> Self {
        Self {
            get_buffer_replacement,
            release_buffer_replacement,
        }
    }
}

impl CapturePlatform for WindowsPlatform {
    type Signal = NamedEvent;
    type Mutex = NamedMutex;
    type Region = MappedRegion;
    type GetBufferPatch = DetourPatch<GetBufferFn>;
    type ReleaseBufferPatch = DetourPatch<ReleaseBufferFn>;

    fn process_id(&self) -> u32 {
        unsafe { GetCurrentProcessId() }
    }

    fn create_signal(&self, name: &str) -> Result<NamedEvent, CaptureError> {
        NamedEvent::create(name)
    }

    fn create_mutex(&self, name: &str) -> Result<NamedMutex, CaptureError> {
        NamedMutex::create(name)
    }

    fn create_region(&self, name: &str, size: usize) -> Result<MappedRegion, CaptureError> {
        MappedRegion::create(name, size)
    }

    fn module_base(&self, module: &str) -> Option<usize> {
        let handle = unsafe { GetModuleHandleW(&HSTRING::from(module)) }.ok()?;
        let base = handle.0 as usize;
        (base != 0).then_some(base)
    }

    fn patch_get_buffer(&self, target: usize) -> Result<DetourPatch<GetBufferFn>, CaptureError> {
        // SAFETY: targets come from `RenderClientOffsets::resolve`, i.e. the
        // probed GetBuffer entry relocated into the loaded render module.
        unsafe { DetourPatch::new("IAudioRenderClient::GetBuffer", target, self.get_buffer_replacement) }
    }

    fn patch_release_buffer(&self, target: usize) -> Result<DetourPatch<ReleaseBufferFn>, CaptureError> {
        // SAFETY: as above, for ReleaseBuffer.
        unsafe {
            DetourPatch::new(
                "IAudioRenderClient::ReleaseBuffer",
                target,
                self.release_buffer_replacement,
            )
        }
    }
}
