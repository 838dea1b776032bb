use std::fmt;

use serde::{Deserialize, Serialize};

/// Composite key identifying a capturable audio session.
///
/// Session identifiers are only unique per rendering device, so the device
/// identifier is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub device_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(device_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.device_id, self.session_id)
    }
}

/// An audio session currently rendering on some output device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSessionInfo {
    pub session_name: String,
    pub session_id: String,
    pub device_name: String,
    pub device_id: String,
    pub process_id: u32,
    pub exe: String,
}

impl AudioSessionInfo {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.device_id.clone(), self.session_id.clone())
    }

    /// Label for a selection list: the session name when it has one, the
    /// executable otherwise.
    pub fn display_name(&self) -> String {
        let name = if self.session_name.is_empty() {
            &self.exe
        } else {
            &self.session_name
        };
        if self.device_name.is_empty() {
            name.clone()
        } else {
            format!("{} ({})", name, self.device_name)
        }
    }
}

/// Format of the frames a render endpoint mixes, as reported by the device.
///
/// Frames are never converted; this only describes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub is_float: bool,
}

impl AudioFormat {
    /// Byte length of `frames` frames.
    pub fn bytes_for_frames(&self, frames: u32) -> usize {
        frames as usize * self.block_align as usize
    }

    /// Playback duration of `bytes` bytes of frames.
    pub fn duration_secs(&self, bytes: u64) -> f64 {
        let bytes_per_sec = self.sample_rate as u64 * self.block_align as u64;
        if bytes_per_sec == 0 {
            return 0.0;
        }
        bytes as f64 / bytes_per_sec as f64
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            block_align: 8,
            bits_per_sample: 32,
            is_float: true,
        }
    }
}

/// Counters describing what the engine has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub hook_installs: u64,
    pub activations: u64,
    pub published_blocks: u64,
    pub published_bytes: u64,
    pub copy_buffer_capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn session() -> AudioSessionInfo {
        AudioSessionInfo {
            session_name: String::new(),
            session_id: "{0.0.0.00000000}|game.exe%b1234".into(),
            device_name: "Speakers".into(),
            device_id: "{0.0.0.00000000}.{abcd}".into(),
            process_id: 1234,
            exe: "game.exe".into(),
        }
    }

    #[test]
    fn key_combines_device_and_session() {
        let key = session().key();
        assert_eq!(key.device_id, "{0.0.0.00000000}.{abcd}");
        assert_eq!(key.to_string(), "{0.0.0.00000000}.{abcd}|{0.0.0.00000000}|game.exe%b1234");
    }

    #[test]
    fn display_name_falls_back_to_exe() {
        let mut info = session();
        assert_eq!(info.display_name(), "game.exe (Speakers)");
        info.session_name = "Game".into();
        info.device_name.clear();
        assert_eq!(info.display_name(), "Game");
    }

    #[test]
    fn format_byte_math() {
        let format = AudioFormat {
            sample_rate: 48000,
            channels: 2,
            block_align: 4,
            bits_per_sample: 16,
            is_float: false,
        };
        assert_eq!(format.bytes_for_frames(960), 3840);
        assert_relative_eq!(format.duration_secs(3840), 0.02);
        assert_relative_eq!(format.duration_secs(384_000), 2.0);
    }

    #[test]
    fn zero_rate_has_no_duration() {
        let format = AudioFormat {
            sample_rate: 0,
            ..AudioFormat::default()
        };
        assert_eq!(format.duration_secs(1024), 0.0);
    }
}
