//! Prints the offsets of `IAudioRenderClient::GetBuffer` and `ReleaseBuffer`
//! inside `audioses.dll` for the bitness of this build.
//!
//! Built once per bitness (`get-audio-offsets32.exe`, `get-audio-offsets64.exe`)
//! and run by the controller, which parses the printed section. Offsets are
//! zero when probing fails.

#[cfg(target_os = "windows")]
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let offsets = session_capture_windows::probe_offsets();
    print!("{}", session_capture_core::protocol::offsets::format_offsets(&offsets));
}

#[cfg(not(target_os = "windows"))]
fn main() {
    let offsets = session_capture_core::RenderClientOffsets::default();
    print!("{}", session_capture_core::protocol::offsets::format_offsets(&offsets));
}
