use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::audio_models::{AudioFormat, AudioSessionInfo};

/// Result returned when a capture completes.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub file_path: PathBuf,
    pub duration_secs: f64,
    pub metadata: RecordingMetadata,
}

/// Metadata stored alongside a captured recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub session: AudioSessionInfo,
    pub format: AudioFormat,
    pub file_path: String,
    pub duration_secs: f64,
    pub bytes: u64,
    pub blocks: u64,
    /// Data region mapping the capture was read from.
    pub map_id: u32,
    /// Seconds since the Unix epoch at which the capture started.
    pub started_at: u64,
}
