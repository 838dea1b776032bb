//! # audio_session_hook
//!
//! Module injected into the target process. On attach it starts the
//! capture engine on its own thread; the engine redirects
//! `IAudioRenderClient::GetBuffer` and `ReleaseBuffer` to the functions
//! below once the controller has supplied offsets.

#[cfg(target_os = "windows")]
mod hook {
    use std::ffi::c_void;
    use std::sync::{Arc, OnceLock};
    use std::thread;

    use windows::core::{BOOL, HRESULT, PCWSTR};
    use windows::Win32::Foundation::{E_FAIL, HINSTANCE, HMODULE};
    use windows::Win32::System::LibraryLoader::{
        DisableThreadLibraryCalls, GetModuleHandleExW, GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS,
        GET_MODULE_HANDLE_EX_FLAG_PIN,
    };
    use windows::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};

    use session_capture_core::engine::capture_data::ClientId;
    use session_capture_core::engine::capture_engine::CaptureEngine;
    use session_capture_core::models::config::EngineConfig;
    use session_capture_windows::platform::WindowsPlatform;

    static ENGINE: OnceLock<Arc<CaptureEngine<WindowsPlatform>>> = OnceLock::new();

    unsafe extern "system" fn get_buffer_hook(this: *mut c_void, frames: u32, data: *mut *mut u8) -> HRESULT {
        let Some(engine) = ENGINE.get() else {
            return E_FAIL;
        };
        let hr = engine
            .forward_get_buffer(|original| unsafe { original(this, frames, data) })
            .unwrap_or(E_FAIL);
        if hr.is_ok() && !data.is_null() {
            // SAFETY: the render client keeps the buffer valid until the
            // matching ReleaseBuffer.
            unsafe { engine.on_buffer_obtained(ClientId(this as usize), *data) };
        }
        hr
    }

    unsafe extern "system" fn release_buffer_hook(this: *mut c_void, frames: u32, flags: u32) -> HRESULT {
        let Some(engine) = ENGINE.get() else {
            return E_FAIL;
        };
        // The block is still readable until the original release returns.
        engine.on_buffer_released(ClientId(this as usize), frames, flags);
        engine
            .forward_release_buffer(|original| unsafe { original(this, frames, flags) })
            .unwrap_or(E_FAIL)
    }

    fn run_engine() {
        let platform = WindowsPlatform::new(get_buffer_hook, release_buffer_hook);
        let engine = match CaptureEngine::new(platform, EngineConfig::default()) {
            Ok(engine) => Arc::new(engine),
            Err(e) => {
                log::error!("capture engine unavailable: {}", e);
                return;
            }
        };
        if ENGINE.set(Arc::clone(&engine)).is_err() {
            return;
        }
        engine.run();
    }

    /// Keeps this module loaded for the life of the process: patched entry
    /// points may still jump into it after a FreeLibrary.
    unsafe fn pin_module(module: HINSTANCE) {
        let mut pinned = HMODULE::default();
        let result = unsafe {
            GetModuleHandleExW(
                GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS | GET_MODULE_HANDLE_EX_FLAG_PIN,
                PCWSTR(module.0 as *const u16),
                &mut pinned,
            )
        };
        if let Err(e) = result {
            log::warn!("failed to pin hook module: {}", e);
        }
    }

    #[unsafe(no_mangle)]
    pub unsafe extern "system" fn DllMain(module: HINSTANCE, reason: u32, _reserved: *mut c_void) -> BOOL {
        match reason {
            DLL_PROCESS_ATTACH => unsafe {
                let _ = DisableThreadLibraryCalls(HMODULE(module.0));
                pin_module(module);

                // Loader lock is held here; everything else happens on the
                // engine thread.
                let spawned = thread::Builder::new()
                    .name("session-capture-hook".into())
                    .spawn(run_engine);
                if let Err(e) = spawned {
                    log::error!("failed to spawn capture engine thread: {}", e);
                }
            },
            DLL_PROCESS_DETACH => {
                if let Some(engine) = ENGINE.get() {
                    engine.shutdown();
                }
            }
            _ => {}
        }
        BOOL::from(true)
    }
}

#[cfg(target_os = "windows")]
pub use hook::DllMain;
