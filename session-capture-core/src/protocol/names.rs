//! Names of the kernel objects shared by one hooked process and its
//! controller. Every name carries the hooked process id so concurrent
//! captures of different processes never collide.

pub const EVENT_CAPTURE_RESTART: &str = "SessionCaptureHook_Restart";
pub const EVENT_CAPTURE_STOP: &str = "SessionCaptureHook_Stop";
pub const EVENT_CAPTURE_RECEIVE: &str = "SessionCaptureHook_DataReceived";

pub const EVENT_HOOK_READY: &str = "SessionCaptureHook_HookReady";
pub const EVENT_HOOK_EXIT: &str = "SessionCaptureHook_Exit";
pub const EVENT_HOOK_INIT: &str = "SessionCaptureHook_Initialize";

pub const MUTEX_AUDIO: &str = "SessionCaptureHook_AudioMutex";

pub const SHMEM_HOOK_INFO: &str = "SessionCaptureHook_HookInfo";
pub const SHMEM_BUFFER: &str = "SessionCaptureHook_Buffer";

/// Reserved for a log transport; nothing opens it yet.
pub const LOG_PIPE: &str = "SessionCaptureHook_LogPipe";

/// Logical signals of the capture protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Restart,
    Stop,
    DataReceived,
    Ready,
    Exit,
    Init,
}

impl Signal {
    pub const ALL: [Signal; 6] = [
        Signal::Restart,
        Signal::Stop,
        Signal::DataReceived,
        Signal::Ready,
        Signal::Exit,
        Signal::Init,
    ];

    pub fn base_name(self) -> &'static str {
        match self {
            Self::Restart => EVENT_CAPTURE_RESTART,
            Self::Stop => EVENT_CAPTURE_STOP,
            Self::DataReceived => EVENT_CAPTURE_RECEIVE,
            Self::Ready => EVENT_HOOK_READY,
            Self::Exit => EVENT_HOOK_EXIT,
            Self::Init => EVENT_HOOK_INIT,
        }
    }

    pub fn name(self, pid: u32) -> String {
        object_name(self.base_name(), pid)
    }
}

pub fn object_name(base: &str, pid: u32) -> String {
    format!("{base}{pid}")
}

pub fn audio_mutex_name(pid: u32) -> String {
    object_name(MUTEX_AUDIO, pid)
}

pub fn hook_info_name(pid: u32) -> String {
    object_name(SHMEM_HOOK_INFO, pid)
}

/// Data region of capture session `map_id`. Ids start at 1 and only grow,
/// so a new session never reuses a stale name.
pub fn data_region_name(pid: u32, map_id: u32) -> String {
    format!("{SHMEM_BUFFER}_{pid}_{map_id}")
}
