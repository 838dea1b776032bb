//! Controller side of the capture protocol: offset loading, injection and
//! the connection to a hooked process.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use windows::core::BOOL;
use windows::Win32::System::Threading::{IsWow64Process, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

use crate::kernel_objects::{NamedEvent, OwnedHandle};
use crate::shared_memory::MappedRegion;
use session_capture_core::models::audio_models::AudioFormat;
use session_capture_core::models::config::HookRate;
use session_capture_core::models::error::CaptureError;
use session_capture_core::protocol::hook_info::{HookInfoView, RenderClientOffsets, HOOK_INFO_SIZE};
use session_capture_core::protocol::names::{data_region_name, hook_info_name, Signal};
use session_capture_core::protocol::offsets::parse_offsets;
use session_capture_core::traits::block_source::BlockSource;
use session_capture_core::traits::platform::{NamedSignal, SharedRegion};
use session_capture_core::transport::region::DataRegionReader;

pub const OFFSETS_HELPER_32: &str = "get-audio-offsets32.exe";
pub const OFFSETS_HELPER_64: &str = "get-audio-offsets64.exe";

/// Interval between attempts to open the hook info mapping.
const CONNECT_POLL: Duration = Duration::from_millis(50);

/// Slice of the ready wait between checks of the exit signal.
const READY_POLL: Duration = Duration::from_millis(100);

// ---- Offsets ----

/// Offsets probed for both bitnesses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbedOffsets {
    pub x86: RenderClientOffsets,
    pub x64: RenderClientOffsets,
}

impl ProbedOffsets {
    pub fn for_bitness(&self, is_32bit: bool) -> RenderClientOffsets {
        if is_32bit {
            self.x86
        } else {
            self.x64
        }
    }

    /// Offsets matching the bitness of process `pid`.
    pub fn for_process(&self, pid: u32) -> Result<RenderClientOffsets, CaptureError> {
        Ok(self.for_bitness(process_is_32bit(pid)?))
    }
}

/// Runs both offset helpers on a background thread.
pub struct OffsetLoader {
    handle: thread::JoinHandle<ProbedOffsets>,
}

impl OffsetLoader {
    pub fn spawn(directory: PathBuf) -> Result<Self, CaptureError> {
        let handle = thread::Builder::new()
            .name("offset-loader".into())
            .spawn(move || ProbedOffsets {
                x86: run_offsets_helper(&directory.join(OFFSETS_HELPER_32)),
                x64: run_offsets_helper(&directory.join(OFFSETS_HELPER_64)),
            })
            .map_err(|e| CaptureError::Platform(format!("failed to spawn offset loader: {}", e)))?;
        Ok(Self { handle })
    }

    /// Waits for both helpers. A panicked loader reads as unresolved.
    pub fn wait(self) -> ProbedOffsets {
        self.handle.join().unwrap_or_else(|_| {
            log::error!("offset loader panicked");
            ProbedOffsets::default()
        })
    }
}

/// Runs one helper and parses its output. Failures read as unresolved.
fn run_offsets_helper(exe: &Path) -> RenderClientOffsets {
    let output = match Command::new(exe).output() {
        Ok(output) => output,
        Err(e) => {
            log::warn!("failed to run {}: {}", exe.display(), e);
            return RenderClientOffsets::default();
        }
    };
    if !output.status.success() {
        log::warn!("{} exited with {}", exe.display(), output.status);
    }
    let offsets = parse_offsets(&String::from_utf8_lossy(&output.stdout));
    if !offsets.is_resolved() {
        log::warn!("{} reported no usable offsets", exe.display());
    }
    offsets
}

/// Whether `pid` runs under WOW64, i.e. is a 32-bit process on a 64-bit OS.
pub fn process_is_32bit(pid: u32) -> Result<bool, CaptureError> {
    unsafe {
        let process = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid)
            .map_err(|e| CaptureError::Platform(format!("failed to open process {}: {}", pid, e)))?;
        let process = OwnedHandle::from_raw(process);
        let mut wow64 = BOOL::default();
        IsWow64Process(process.raw(), &mut wow64)
            .map_err(|e| CaptureError::Platform(format!("IsWow64Process({}) failed: {}", pid, e)))?;
        Ok(wow64.as_bool())
    }
}

// ---- Injection ----

/// Loads the hook module into a target process.
pub trait Injector {
    fn inject(&self, pid: u32, hook_module: &Path, anticheat: bool) -> Result<(), CaptureError>;
}

/// Delegates injection to an external loader executable, invoked as
/// `loader <module> <anticheat 0|1> <pid>`.
#[derive(Debug, Clone)]
pub struct CommandInjector {
    loader: PathBuf,
}

impl CommandInjector {
    pub fn new(loader: impl Into<PathBuf>) -> Self {
        Self { loader: loader.into() }
    }
}

impl Injector for CommandInjector {
    fn inject(&self, pid: u32, hook_module: &Path, anticheat: bool) -> Result<(), CaptureError> {
        let status = Command::new(&self.loader)
            .arg(hook_module)
            .arg(if anticheat { "1" } else { "0" })
            .arg(pid.to_string())
            .status()
            .map_err(|e| CaptureError::Platform(format!("failed to run {}: {}", self.loader.display(), e)))?;
        if !status.success() {
            return Err(CaptureError::Platform(format!(
                "injection into {} failed: {}",
                pid, status
            )));
        }
        log::info!("injected {} into process {}", hook_module.display(), pid);
        Ok(())
    }
}

// ---- Connection ----

/// Consumer view of the current data region.
struct CaptureView {
    reader: DataRegionReader,
    _region: MappedRegion,
}

/// Connection to the capture engine of one hooked process.
///
/// `connect` waits for the engine's hook info mapping, `initialize` writes
/// the capture request and releases the engine's init wait, and the
/// `BlockSource` methods drive individual capture sessions.
pub struct HookConnection {
    pid: u32,
    restart: NamedEvent,
    stop: NamedEvent,
    data_received: NamedEvent,
    ready: NamedEvent,
    exit: NamedEvent,
    init: NamedEvent,
    hook_info: HookInfoView,
    _hook_info_region: MappedRegion,
    format: AudioFormat,
    capture: Option<CaptureView>,
    map_id: u32,
    exited: AtomicBool,
}

impl HookConnection {
    /// Polls until the engine in `pid` has created its objects.
    pub fn connect(pid: u32, timeout: Duration) -> Result<Self, CaptureError> {
        let deadline = Instant::now() + timeout;
        let region = loop {
            match MappedRegion::open(&hook_info_name(pid), HOOK_INFO_SIZE) {
                Ok(region) => break region,
                Err(e) if Instant::now() >= deadline => {
                    log::warn!("hook in process {} did not appear: {}", pid, e);
                    return Err(CaptureError::Timeout);
                }
                Err(_) => thread::sleep(CONNECT_POLL),
            }
        };
        // SAFETY: the view lives next to the mapping it points into.
        let hook_info = unsafe { HookInfoView::from_raw(region.as_mut_ptr(), region.len()) }?;

        let open = |s: Signal| NamedEvent::open(&s.name(pid));
        let connection = Self {
            pid,
            restart: open(Signal::Restart)?,
            stop: open(Signal::Stop)?,
            data_received: open(Signal::DataReceived)?,
            ready: open(Signal::Ready)?,
            exit: open(Signal::Exit)?,
            init: open(Signal::Init)?,
            hook_info,
            _hook_info_region: region,
            format: AudioFormat::default(),
            capture: None,
            map_id: 0,
            exited: AtomicBool::new(false),
        };

        // The engine announces itself on restart before it creates the hook
        // info mapping, so the announcement is already set here. Captures are
        // requested explicitly by `start`, so it is dropped.
        connection.restart.try_wait();
        connection.ready.try_wait();
        log::info!("connected to hook in process {}", pid);
        Ok(connection)
    }

    /// Writes the capture request and releases the engine's init wait.
    pub fn initialize(
        &mut self,
        offsets: RenderClientOffsets,
        format: AudioFormat,
        rate: HookRate,
    ) -> Result<(), CaptureError> {
        if !offsets.is_resolved() {
            return Err(CaptureError::OffsetsUnresolved);
        }
        self.hook_info.write_request(offsets, &format, rate);
        self.format = format;
        self.init.set()
    }

    pub fn process_id(&self) -> u32 {
        self.pid
    }

    fn check_exit(&self) -> bool {
        if self.exited.load(Ordering::SeqCst) {
            return true;
        }
        if self.exit.try_wait() {
            log::info!("hook in process {} exited", self.pid);
            self.exited.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }

    fn wait_ready(&self, timeout: Duration) -> Result<(), CaptureError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.check_exit() {
                return Err(CaptureError::HookExited);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CaptureError::Timeout);
            }
            if self.ready.wait(Some(READY_POLL.min(deadline - now))) {
                return Ok(());
            }
        }
    }
}

impl BlockSource for HookConnection {
    fn start(&mut self, timeout: Duration) -> Result<AudioFormat, CaptureError> {
        self.capture = None;
        self.ready.try_wait();
        // A stop left over from an earlier capture must not end this one.
        self.stop.try_wait();
        self.restart.set()?;
        self.wait_ready(timeout)?;

        let info = self.hook_info.read();
        info.check_version()?;
        if info.map_id == 0 {
            return Err(CaptureError::Layout("hook signalled ready without a data region".into()));
        }

        let name = data_region_name(self.pid, info.map_id);
        let region = MappedRegion::open(&name, info.map_size as usize)?;
        // SAFETY: the reader is dropped before the region it points into.
        let reader = unsafe { DataRegionReader::from_raw(region.as_mut_ptr(), region.len()) }?;
        log::debug!("reading {} ({} bytes)", name, region.len());

        self.capture = Some(CaptureView { reader, _region: region });
        self.map_id = info.map_id;

        Ok(AudioFormat {
            sample_rate: info.samples_per_sec,
            channels: info.channels as u16,
            block_align: info.block_align as u16,
            ..self.format
        })
    }

    fn next_block(&mut self, out: &mut Vec<u8>, timeout: Duration) -> Result<bool, CaptureError> {
        let Some(capture) = self.capture.as_ref() else {
            return Err(CaptureError::ConfigurationFailed("capture not started".into()));
        };
        if !self.data_received.wait(Some(timeout)) {
            return Ok(false);
        }
        capture.reader.read_into(out);
        Ok(true)
    }

    fn hook_exited(&self) -> bool {
        self.check_exit()
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.stop.set()?;
        self.capture = None;
        // An announcement that arrived while capturing would otherwise
        // restart the capture right after the stop.
        self.restart.try_wait();
        Ok(())
    }

    fn map_id(&self) -> u32 {
        self.map_id
    }
}
