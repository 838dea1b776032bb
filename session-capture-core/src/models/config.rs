use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::audio_models::SessionKey;

/// Base polling interval of the hook thread at `HookRate::Normal`.
const BASE_POLL_INTERVAL: Duration = Duration::from_millis(40);

/// How aggressively the hook thread polls for hookability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookRate {
    Slow,
    #[default]
    Normal,
    Fast,
    Fastest,
}

impl HookRate {
    /// Interval between hook attempts: 80, 40, 20 and 4 ms.
    pub fn poll_interval(self) -> Duration {
        match self {
            Self::Slow => BASE_POLL_INTERVAL * 2,
            Self::Normal => BASE_POLL_INTERVAL,
            Self::Fast => BASE_POLL_INTERVAL / 2,
            Self::Fastest => BASE_POLL_INTERVAL / 10,
        }
    }

    /// Wire value stored in `HookInfo::hook_rate`.
    pub fn to_raw(self) -> u32 {
        match self {
            Self::Slow => 0,
            Self::Normal => 1,
            Self::Fast => 2,
            Self::Fastest => 3,
        }
    }

    /// Unknown values fall back to `Normal`.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Slow,
            2 => Self::Fast,
            3 => Self::Fastest,
            _ => Self::Normal,
        }
    }
}

/// Configuration of the capture engine inside the hooked process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Sleep between hook attempts and between re-check ticks.
    pub poll_interval: Duration,

    /// Once hooked, re-check the render module every this many ticks
    /// (100 ticks at 40 ms is roughly every four seconds).
    pub recheck_ticks: u32,

    /// Seconds of audio the data region is sized for.
    ///
    /// The true allocation size of the target's render buffer is not
    /// observable from the render client, so this is an approximation and
    /// not a guaranteed bound.
    pub buffer_seconds: f64,

    /// How long to wait for the controller's init signal (None = forever).
    pub init_timeout: Option<Duration>,

    /// Module that implements the render client.
    pub render_module: String,
}

impl EngineConfig {
    pub fn with_hook_rate(mut self, rate: HookRate) -> Self {
        self.poll_interval = rate.poll_interval();
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval.is_zero() {
            return Err("poll interval must be positive".into());
        }
        if self.recheck_ticks == 0 {
            return Err("re-check period must be at least one tick".into());
        }
        if !(self.buffer_seconds > 0.0 && self.buffer_seconds.is_finite()) {
            return Err(format!("invalid buffer duration: {}", self.buffer_seconds));
        }
        if self.render_module.is_empty() {
            return Err("render module name is empty".into());
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: HookRate::Normal.poll_interval(),
            recheck_ticks: 100,
            buffer_seconds: 2.0,
            init_timeout: None,
            render_module: "audioses.dll".into(),
        }
    }
}

/// Controller-side capture settings, as persisted by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfiguration {
    /// Audio session to capture, or None when nothing is selected.
    pub session: Option<SessionKey>,

    /// Ask the external loader for its anti-cheat compatible injection path.
    pub anticheat_hook: bool,

    pub hook_rate: HookRate,

    /// Directory holding `get-audio-offsets32.exe` and `get-audio-offsets64.exe`.
    pub offsets_directory: PathBuf,

    /// How long to wait for the hook to publish its data region.
    pub ready_timeout: Duration,

    /// How long a single wait for a published block may take.
    pub data_timeout: Duration,
}

impl CaptureConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if self.ready_timeout.is_zero() {
            return Err("ready timeout must be positive".into());
        }
        if self.data_timeout.is_zero() {
            return Err("data timeout must be positive".into());
        }
        Ok(())
    }
}

impl Default for CaptureConfiguration {
    fn default() -> Self {
        Self {
            session: None,
            anticheat_hook: true,
            hook_rate: HookRate::Normal,
            offsets_directory: PathBuf::from("."),
            ready_timeout: Duration::from_secs(10),
            data_timeout: Duration::from_millis(500),
        }
    }
}
