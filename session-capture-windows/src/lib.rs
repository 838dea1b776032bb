//! # session-capture-windows
//!
//! Windows backend for session-capture.
//!
//! Provides:
//! - `WindowsPlatform`: `CapturePlatform` over named events, file mappings
//!   and `retour` detours, used by the hook module
//! - `probe_offsets`: locates the render client methods in `audioses.dll`
//! - `SessionEnumerator`: audio sessions on all render endpoints
//! - `HookConnection`: controller end of the protocol, a `BlockSource`
//! - `OffsetLoader` / `CommandInjector`: helper processes the controller drives
//!
//! ## Platform Requirements
//! - Windows 10 or later
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use session_capture_windows::{HookConnection, OffsetLoader};
//! use session_capture_core::SessionRecorder;
//!
//! let offsets = OffsetLoader::spawn(dir)?.wait().for_process(pid)?;
//! let mut connection = HookConnection::connect(pid, timeout)?;
//! connection.initialize(offsets, format, HookRate::Normal)?;
//! let mut recorder = SessionRecorder::new(connection, session, config);
//! recorder.start(path)?;
//! ```

pub mod wave_format;

#[cfg(target_os = "windows")]
pub mod com;
#[cfg(target_os = "windows")]
pub mod controller;
#[cfg(target_os = "windows")]
pub mod inline_patch;
#[cfg(target_os = "windows")]
pub mod kernel_objects;
#[cfg(target_os = "windows")]
pub mod offset_probe;
#[cfg(target_os = "windows")]
pub mod platform;
#[cfg(target_os = "windows")]
pub mod session_enumerator;
#[cfg(target_os = "windows")]
pub mod shared_memory;

#[cfg(target_os = "windows")]
pub use com::ComGuard;
#[cfg(target_os = "windows")]
pub use controller::{CommandInjector, HookConnection, Injector, OffsetLoader, ProbedOffsets};
#[cfg(target_os = "windows")]
pub use offset_probe::{probe_offsets, render_mix_format};
#[cfg(target_os = "windows")]
pub use platform::{GetBufferFn, ReleaseBufferFn, WindowsPlatform};
#[cfg(target_os = "windows")]
pub use session_enumerator::SessionEnumerator;
