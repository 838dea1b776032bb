//! # session-capture-core
//!
//! Platform-agnostic core of per-process audio session capture.
//!
//! A capture engine injected into a target process hooks the render
//! client's get-buffer/release-buffer pair and copies every released block
//! into a named shared memory region. A controller in another process
//! coordinates it through named signals and reads the blocks back.
//! Operating system services sit behind the `CapturePlatform` trait, so
//! everything here runs against in-memory fakes in tests; the Windows
//! backend lives in `session-capture-windows`.
//!
//! ## Architecture
//!
//! ```text
//! session-capture-core (this crate)
//! ├── traits/       ← CapturePlatform, NamedSignal, SharedRegion, InlinePatch, BlockSource, CaptureDelegate
//! ├── models/       ← CaptureError, EngineState, RecorderState, EngineConfig, AudioFormat, etc.
//! ├── protocol/     ← HookInfo record, kernel object names, offsets text format
//! ├── transport/    ← data region layout, producer/consumer views
//! ├── hooking/      ← FunctionHook (rehook / unhook / call)
//! ├── engine/       ← CaptureEngine (in-process state machine)
//! ├── session/      ← SessionRecorder (controller-side pump)
//! ├── processing/   ← WAV header generation
//! └── storage/      ← WavFileWriter, metadata sidecar
//! ```

pub mod engine;
pub mod hooking;
pub mod models;
pub mod processing;
pub mod protocol;
pub mod session;
pub mod storage;
pub mod traits;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types at crate root for convenience.
pub use engine::capture_data::ClientId;
pub use engine::capture_engine::{CaptureEngine, BUFFER_FLAGS_SILENT};
pub use hooking::function_hook::FunctionHook;
pub use models::audio_models::{AudioFormat, AudioSessionInfo, EngineStats, SessionKey};
pub use models::config::{CaptureConfiguration, EngineConfig, HookRate};
pub use models::error::CaptureError;
pub use models::recording_result::{RecordingMetadata, RecordingResult};
pub use models::state::{EngineState, RecorderState};
pub use protocol::hook_info::{HookInfo, HookInfoView, RenderClientOffsets, HOOK_INFO_SIZE};
pub use protocol::names::Signal;
pub use session::recorder::SessionRecorder;
pub use storage::wav_writer::WavFileWriter;
pub use traits::block_source::BlockSource;
pub use traits::capture_delegate::CaptureDelegate;
pub use traits::inline_patch::InlinePatch;
pub use traits::platform::{CapturePlatform, NamedSignal, SharedRegion};
pub use transport::region::{DataRegion, DataRegionReader};
