use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::capture_data::{CaptureData, ClientId, Leech};
use crate::hooking::function_hook::FunctionHook;
use crate::models::audio_models::EngineStats;
use crate::models::config::EngineConfig;
use crate::models::error::CaptureError;
use crate::models::state::EngineState;
use crate::protocol::hook_info::{HookInfo, HookInfoView, HOOK_INFO_SIZE};
use crate::protocol::names::{audio_mutex_name, data_region_name, hook_info_name, Signal};
use crate::traits::inline_patch::InlinePatch;
use crate::traits::platform::{CapturePlatform, NamedSignal, SharedRegion};
use crate::transport::layout::region_size;
use crate::transport::region::DataRegion;

/// Release flag telling that the released block is silence and its bytes
/// must not be read.
pub const BUFFER_FLAGS_SILENT: u32 = 0x2;

pub type GetBufferTarget<P> = <<P as CapturePlatform>::GetBufferPatch as InlinePatch>::Target;
pub type ReleaseBufferTarget<P> = <<P as CapturePlatform>::ReleaseBufferPatch as InlinePatch>::Target;

struct Signals<S> {
    restart: S,
    stop: S,
    data_received: S,
    ready: S,
    exit: S,
    init: S,
}

/// The two render client hooks, installed against one load of the render
/// module.
struct RenderHooks<P: CapturePlatform> {
    module_base: usize,
    get_buffer: FunctionHook<P::GetBufferPatch>,
    release_buffer: FunctionHook<P::ReleaseBufferPatch>,
}

#[derive(Default)]
struct Counters {
    hook_installs: AtomicU64,
    activations: AtomicU64,
    published_blocks: AtomicU64,
    published_bytes: AtomicU64,
}

/// Capture engine living inside the hooked process.
///
/// A lifecycle thread (`run`) announces the engine, waits for the
/// controller's init signal, then polls until the render client functions
/// can be hooked. From then on the replacement functions call
/// `on_buffer_obtained` / `on_buffer_released`, and every released block of
/// the adopted client is copied into the current data region:
/// ```text
/// [GetBuffer] → leech pointer ─┐
///                              ├→ [CopyBuffer] → [DataRegion] → "data received"
/// [ReleaseBuffer] → frames ────┘
/// ```
///
/// The controller starts a capture with the restart signal and ends it
/// with the stop signal; both are observed on the render thread inside
/// `on_buffer_released`.
pub struct CaptureEngine<P: CapturePlatform> {
    platform: P,
    config: EngineConfig,
    pid: u32,
    signals: Signals<P::Signal>,
    _audio_mutex: P::Mutex,
    hook_info: HookInfoView,
    // Owns the mapping `hook_info` points into; declared after it.
    _hook_info_region: P::Region,
    hooks: RwLock<Option<Arc<RenderHooks<P>>>>,
    data: Mutex<CaptureData<P::Region>>,
    active: AtomicBool,
    lifecycle: Mutex<EngineState>,
    poll_interval: Mutex<Duration>,
    running: AtomicBool,
    counters: Counters,
}

impl<P: CapturePlatform> CaptureEngine<P> {
    /// Creates the named kernel objects and the hook info mapping.
    ///
    /// The engine announces itself on the restart signal before the hook
    /// info mapping exists, so a controller that has opened the mapping can
    /// drop the announcement without racing it.
    ///
    /// Fails when any of them cannot be created; the engine is then unusable
    /// and the host should stay inert.
    pub fn new(platform: P, config: EngineConfig) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::ConfigurationFailed)?;

        let pid = platform.process_id();
        let signal = |s: Signal| platform.create_signal(&s.name(pid));
        let signals = Signals {
            restart: signal(Signal::Restart)?,
            stop: signal(Signal::Stop)?,
            data_received: signal(Signal::DataReceived)?,
            ready: signal(Signal::Ready)?,
            exit: signal(Signal::Exit)?,
            init: signal(Signal::Init)?,
        };
        let audio_mutex = platform.create_mutex(&audio_mutex_name(pid))?;
        if let Err(e) = signals.restart.set() {
            log::warn!("failed to announce capture engine: {}", e);
        }
        let region = platform.create_region(&hook_info_name(pid), HOOK_INFO_SIZE)?;
        // SAFETY: the mapping is owned by the engine for as long as the view.
        let hook_info = unsafe { HookInfoView::from_raw(region.as_mut_ptr(), region.len()) }?;

        log::info!("capture engine created for process {}", pid);

        Ok(Self {
            poll_interval: Mutex::new(config.poll_interval),
            platform,
            config,
            pid,
            signals,
            _audio_mutex: audio_mutex,
            hook_info,
            _hook_info_region: region,
            hooks: RwLock::new(None),
            data: Mutex::new(CaptureData::default()),
            active: AtomicBool::new(false),
            lifecycle: Mutex::new(EngineState::Unstarted),
            running: AtomicBool::new(true),
            counters: Counters::default(),
        })
    }

    pub fn state(&self) -> EngineState {
        if self.hooks.read().is_some() {
            EngineState::Hooked {
                active: self.is_active(),
            }
        } else {
            *self.lifecycle.lock()
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            hook_installs: self.counters.hook_installs.load(Ordering::Relaxed),
            activations: self.counters.activations.load(Ordering::Relaxed),
            published_blocks: self.counters.published_blocks.load(Ordering::Relaxed),
            published_bytes: self.counters.published_bytes.load(Ordering::Relaxed),
            copy_buffer_capacity: self.data.lock().buffer.capacity(),
        }
    }

    /// Snapshot of the shared hook info record.
    pub fn hook_info(&self) -> HookInfo {
        self.hook_info.read()
    }

    pub fn poll_interval(&self) -> Duration {
        *self.poll_interval.lock()
    }

    fn set_lifecycle(&self, state: EngineState) {
        *self.lifecycle.lock() = state;
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ---- Lifecycle thread ----

    /// Starts the lifecycle thread.
    pub fn spawn(self: &Arc<Self>) -> Result<thread::JoinHandle<()>, CaptureError> {
        let engine = Arc::clone(self);
        thread::Builder::new()
            .name("session-capture-hook".into())
            .spawn(move || engine.run())
            .map_err(|e| CaptureError::Platform(format!("failed to spawn hook thread: {}", e)))
    }

    /// Body of the lifecycle thread. Returns once `shutdown` is called or
    /// the init signal never arrives; the exit signal is set either way.
    pub fn run(&self) {
        if self.wait_for_init() {
            self.poll_until_hooked();
            self.watch_render_module();
        }

        if let Err(e) = self.signals.exit.set() {
            log::warn!("failed to signal hook exit: {}", e);
        }
        log::info!("hook thread finished");
    }

    /// Ends the lifecycle thread at its next tick.
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            // Wake a thread still blocked on init; it re-checks `running`.
            if let Err(e) = self.signals.init.set() {
                log::debug!("{}", e);
            }
        }
    }

    /// Blocks until the controller has written its request and set init.
    fn wait_for_init(&self) -> bool {
        self.set_lifecycle(EngineState::WaitingForInit);
        let initialized = self.signals.init.wait(self.config.init_timeout);
        if !self.is_running() {
            return false;
        }
        if !initialized {
            log::warn!("no init signal within {:?}, giving up", self.config.init_timeout);
            self.set_lifecycle(EngineState::NeverInitialized);
            return false;
        }

        let info = self.hook_info.read();
        let rate = info.hook_rate();
        *self.poll_interval.lock() = rate.poll_interval();
        self.set_lifecycle(EngineState::Polling);
        log::info!(
            "initialized: {} Hz, block align {}, hook rate {:?}",
            info.samples_per_sec,
            info.block_align,
            rate
        );
        true
    }

    fn poll_until_hooked(&self) {
        let mut last_error: Option<CaptureError> = None;
        while self.is_running() {
            match self.try_hook() {
                Ok(()) => return,
                Err(e) if e.is_transient() => log::trace!("not hookable yet: {}", e),
                Err(e) => {
                    if last_error.as_ref() != Some(&e) {
                        log::warn!("{}", e);
                        last_error = Some(e);
                    }
                }
            }
            thread::sleep(self.poll_interval());
        }
    }

    fn watch_render_module(&self) {
        let mut ticks = 0u32;
        while self.is_running() {
            thread::sleep(self.poll_interval());
            ticks += 1;
            if ticks >= self.config.recheck_ticks {
                ticks = 0;
                self.recheck_hooks();
            }
        }
    }

    // ---- Hook installation ----

    /// Installs both render client hooks if offsets and the render module
    /// allow it. Does nothing when already hooked.
    pub fn try_hook(&self) -> Result<(), CaptureError> {
        if self.hooks.read().is_some() {
            return Ok(());
        }

        let module = &self.config.render_module;
        let offsets = self.hook_info.offsets();
        let module_base = self.platform.module_base(module).unwrap_or(0);
        let targets = offsets.resolve(module_base, module)?;

        let hooks = Arc::new(RenderHooks {
            module_base,
            get_buffer: FunctionHook::new(
                self.platform.patch_get_buffer(targets.get_buffer)?,
                "IAudioRenderClient::GetBuffer",
            ),
            release_buffer: FunctionHook::new(
                self.platform.patch_release_buffer(targets.release_buffer)?,
                "IAudioRenderClient::ReleaseBuffer",
            ),
        });

        // Published before enabling so a replacement that runs immediately
        // can already reach the original.
        *self.hooks.write() = Some(Arc::clone(&hooks));
        let installed = hooks
            .get_buffer
            .rehook()
            .and_then(|()| hooks.release_buffer.rehook());
        if let Err(e) = installed {
            self.hooks.write().take();
            return Err(e);
        }

        self.counters.hook_installs.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "hooked {} at {:#x} (GetBuffer {:#x}, ReleaseBuffer {:#x})",
            module,
            module_base,
            targets.get_buffer,
            targets.release_buffer
        );
        Ok(())
    }

    /// Periodic check once hooked: follows the render module across
    /// unload/reload, and retries hooking when not hooked.
    pub fn recheck_hooks(&self) {
        let module_base = self.platform.module_base(&self.config.render_module);
        let hooked_base = self.hooks.read().as_ref().map(|h| h.module_base);

        match (hooked_base, module_base) {
            (Some(old), Some(new)) if old == new => return,
            (Some(old), new) => {
                log::info!(
                    "{} moved from {:#x} to {:?}, dropping hooks",
                    self.config.render_module,
                    old,
                    new
                );
                self.abandon_hooks();
            }
            (None, _) => {}
        }

        if let Err(e) = self.try_hook() {
            if !e.is_transient() {
                log::warn!("{}", e);
            }
        }
    }

    fn abandon_hooks(&self) {
        let Some(hooks) = self.hooks.write().take() else {
            return;
        };
        // The patched code went away with the old module image; restoring
        // its bytes would write into unmapped memory.
        std::mem::forget(hooks);

        let mut data = self.data.lock();
        self.deactivate(&mut data);
        data.client = None;
        self.set_lifecycle(EngineState::Polling);
    }

    // ---- Intercepted calls ----

    /// Runs `f` with the original get-buffer entry while its hook is
    /// removed. None when not hooked.
    pub fn forward_get_buffer<R>(&self, f: impl FnOnce(GetBufferTarget<P>) -> R) -> Option<R> {
        let hooks = self.hooks.read().clone()?;
        Some(hooks.get_buffer.forward(f))
    }

    /// Runs `f` with the original release-buffer entry while its hook is
    /// removed. None when not hooked.
    pub fn forward_release_buffer<R>(&self, f: impl FnOnce(ReleaseBufferTarget<P>) -> R) -> Option<R> {
        let hooks = self.hooks.read().clone()?;
        Some(hooks.release_buffer.forward(f))
    }

    /// Called after a successful get-buffer on `client`.
    ///
    /// The first client seen while no capture is active and none is adopted
    /// becomes the adopted client; only its blocks are captured.
    ///
    /// # Safety
    /// `buffer` must stay readable for the requested frames until the
    /// matching `on_buffer_released` call on the same thread returns.
    pub unsafe fn on_buffer_obtained(&self, client: ClientId, buffer: *mut u8) {
        let mut data = self.data.lock();
        if data.client.is_none() && !self.is_active() {
            log::debug!("adopted render client {:#x}", client.0);
            data.client = Some(client);
        }
        if data.client == Some(client) {
            data.leech = Leech::new(buffer);
        }
    }

    /// Called before the original release-buffer runs on `client`.
    ///
    /// Handles the stop and restart signals, then copies the released block
    /// of the adopted client into the data region.
    pub fn on_buffer_released(&self, client: ClientId, frames: u32, flags: u32) {
        let mut data = self.data.lock();
        if data.client != Some(client) {
            return;
        }
        let leech = data.leech.take();

        if self.is_active() {
            if self.signals.stop.try_wait() {
                log::info!("capture stopped");
                self.deactivate(&mut data);
                data.client = None;
                return;
            }
        } else {
            // A stop withdraws a request whose activation has not succeeded.
            if self.signals.stop.try_wait() {
                data.restart_pending = false;
            }
            if self.signals.restart.try_wait() {
                data.restart_pending = true;
            }
            if !data.restart_pending {
                return;
            }
            if let Err(e) = self.initialize_capture(&mut data) {
                log::warn!("failed to start capture: {}", e);
                return;
            }
        }

        if frames == 0 {
            return;
        }

        let size = frames as usize * data.block_align as usize;
        let data = &mut *data;
        let block = if flags & BUFFER_FLAGS_SILENT != 0 {
            data.buffer.zeroed(size)
        } else if let Some(leech) = leech {
            // SAFETY: guaranteed by the caller of `on_buffer_obtained`; the
            // original get-buffer handed out at least `frames` frames.
            let source = unsafe { std::slice::from_raw_parts(leech.as_ptr(), size) };
            data.buffer.copy_from(source)
        } else {
            log::trace!("released {} frames without an obtained buffer", frames);
            return;
        };

        let Some(region) = data.region.as_ref() else {
            return;
        };
        let mut len = block.len();
        if len > region.capacity() {
            let align = data.block_align as usize;
            len = region.capacity() / align * align;
            if !data.truncation_warned {
                log::warn!(
                    "render block of {} bytes exceeds data region capacity {}, truncating",
                    block.len(),
                    region.capacity()
                );
                data.truncation_warned = true;
            }
        }
        let published = region.publish(&block[..len]);

        self.counters.published_blocks.fetch_add(1, Ordering::Relaxed);
        self.counters
            .published_bytes
            .fetch_add(published as u64, Ordering::Relaxed);
        if let Err(e) = self.signals.data_received.set() {
            log::debug!("{}", e);
        }
    }

    /// Creates a fresh data region sized from the controller's format and
    /// announces it through hook info and the ready signal.
    fn initialize_capture(&self, data: &mut CaptureData<P::Region>) -> Result<(), CaptureError> {
        let info = self.hook_info.read();
        data.samples_per_sec = info.samples_per_sec;
        data.block_align = info.block_align;
        let size = region_size(info.samples_per_sec, info.block_align, self.config.buffer_seconds)?;

        data.map_counter += 1;
        let map_id = data.map_counter;
        let name = data_region_name(self.pid, map_id);
        let region = DataRegion::create(self.platform.create_region(&name, size.total)?, map_id)?;

        // The previous mapping, if any, is released here.
        data.region = Some(region);
        self.hook_info.publish_mapping(map_id, size.total as u32);
        // A stop that raced this activation does not end it.
        self.signals.stop.try_wait();
        if let Err(e) = self.signals.ready.set() {
            data.region = None;
            return Err(e);
        }

        data.restart_pending = false;
        data.truncation_warned = false;
        self.active.store(true, Ordering::SeqCst);
        self.counters.activations.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "capture started: {} ({} bytes, {} Hz, block align {})",
            name,
            size.total,
            data.samples_per_sec,
            data.block_align
        );
        Ok(())
    }

    fn deactivate(&self, data: &mut CaptureData<P::Region>) {
        self.active.store(false, Ordering::SeqCst);
        data.region = None;
        data.leech = None;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::models::audio_models::AudioFormat;
    use crate::models::config::HookRate;
    use crate::protocol::hook_info::{RenderClientOffsets, HOOK_VERSION_MAJOR, HOOK_VERSION_MINOR};
    use crate::testing::FakePlatform;
    use crate::transport::region::DataRegionReader;

    const PID: u32 = 4242;
    const BASE: usize = 0x7ff8_1000_0000;
    const CLIENT_A: ClientId = ClientId(0xA000);
    const CLIENT_B: ClientId = ClientId(0xB000);

    fn format() -> AudioFormat {
        AudioFormat {
            sample_rate: 48000,
            channels: 2,
            block_align: 4,
            bits_per_sample: 16,
            is_float: false,
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            init_timeout: Some(Duration::from_millis(100)),
            ..EngineConfig::default()
        }
        .with_hook_rate(HookRate::Fastest)
    }

    fn write_request(platform: &FakePlatform, offsets: RenderClientOffsets) {
        let region = platform.region(&hook_info_name(PID)).unwrap();
        let view = unsafe { HookInfoView::from_raw(region.as_mut_ptr(), region.len()) }.unwrap();
        view.write_request(offsets, &format(), HookRate::Fastest);
    }

    fn engine(config: EngineConfig) -> (CaptureEngine<FakePlatform>, FakePlatform) {
        let platform = FakePlatform::new(PID);
        platform.set_module_base(Some(BASE));
        let engine = CaptureEngine::new(platform.clone(), config).unwrap();
        // A connected controller drops the announcement.
        platform.signal(Signal::Restart).try_wait();
        write_request(&platform, RenderClientOffsets::new(0x1000, 0x1050));
        (engine, platform)
    }

    fn hooked_engine() -> (CaptureEngine<FakePlatform>, FakePlatform) {
        let (engine, platform) = engine(config());
        engine.try_hook().unwrap();
        (engine, platform)
    }

    /// One get-buffer/release-buffer pair as the render thread performs it.
    fn render(engine: &CaptureEngine<FakePlatform>, client: ClientId, block: &mut [u8], flags: u32) {
        let frames = (block.len() / 4) as u32;
        unsafe { engine.on_buffer_obtained(client, block.as_mut_ptr()) };
        engine.on_buffer_released(client, frames, flags);
    }

    fn reader(platform: &FakePlatform, map_id: u32) -> DataRegionReader {
        let region = platform.region(&data_region_name(PID, map_id)).unwrap();
        unsafe { DataRegionReader::from_raw(region.as_mut_ptr(), region.len()) }.unwrap()
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn new_creates_named_objects() {
        let platform = FakePlatform::new(PID);
        let engine = CaptureEngine::new(platform.clone(), config()).unwrap();
        assert_eq!(engine.state(), EngineState::Unstarted);

        let region = platform.region("SessionCaptureHook_HookInfo4242").unwrap();
        assert_eq!(region.len(), HOOK_INFO_SIZE);
        assert!(region.bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn announcement_is_set_before_hook_info_exists() {
        let platform = FakePlatform::new(PID);
        platform.fail_regions(true);
        assert!(CaptureEngine::new(platform.clone(), config()).is_err());
        // Set even though the mapping was never created.
        assert!(platform.signal(Signal::Restart).peek());
        assert!(platform.region(&hook_info_name(PID)).is_none());

        platform.signal(Signal::Restart).try_wait();
        platform.fail_regions(false);
        let engine = CaptureEngine::new(platform.clone(), config()).unwrap();
        engine.shutdown();
        engine.run();
        // Running the lifecycle does not announce a second time.
        assert_eq!(platform.signal(Signal::Restart).sets(), 2);
    }

    #[test]
    fn creation_failure_is_reported() {
        let platform = FakePlatform::new(PID);
        platform.fail_signal(Signal::Stop);
        let result = CaptureEngine::new(platform, config());
        assert!(matches!(result, Err(CaptureError::ResourceCreation { .. })));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = config();
        config.buffer_seconds = -1.0;
        let result = CaptureEngine::new(FakePlatform::new(PID), config);
        assert!(matches!(result, Err(CaptureError::ConfigurationFailed(_))));
    }

    #[test]
    fn unresolved_offsets_never_hook() {
        let (engine, platform) = engine(config());
        write_request(&platform, RenderClientOffsets::new(0, 0));

        for _ in 0..10 {
            assert_eq!(engine.try_hook(), Err(CaptureError::OffsetsUnresolved));
        }
        assert!(!engine.state().is_hooked());
        assert!(platform.get_buffer_patches().is_empty());
        assert!(platform.release_buffer_patches().is_empty());
    }

    #[test]
    fn missing_render_module_is_transient() {
        let (engine, platform) = engine(config());
        platform.set_module_base(None);
        let err = engine.try_hook().unwrap_err();
        assert!(matches!(err, CaptureError::ModuleNotLoaded(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn try_hook_patches_both_functions_once() {
        let (engine, platform) = hooked_engine();
        assert_eq!(engine.state(), EngineState::Hooked { active: false });

        engine.try_hook().unwrap();
        let get = platform.get_buffer_patches();
        let release = platform.release_buffer_patches();
        assert_eq!(get.len(), 1);
        assert_eq!(release.len(), 1);
        assert_eq!(get[0].target(), BASE + 0x1000);
        assert_eq!(release[0].target(), BASE + 0x1050);
        assert!(get[0].is_enabled());
        assert!(release[0].is_enabled());
        assert_eq!(engine.stats().hook_installs, 1);
    }

    #[test]
    fn forward_runs_original_with_hook_removed() {
        let (engine, platform) = hooked_engine();
        let patch = platform.get_buffer_patches().remove(0);

        let status = engine.forward_get_buffer(|original| {
            assert!(!patch.is_enabled());
            original(CLIENT_A.0, 960)
        });
        assert_eq!(status, Some(0));
        assert!(patch.is_enabled());
    }

    #[test]
    fn forward_without_hooks_is_none() {
        let (engine, _platform) = engine(config());
        assert_eq!(engine.forward_release_buffer(|original| original(0, 0, 0)), None);
    }

    #[test]
    fn restart_activates_and_publishes_block() {
        let (engine, platform) = hooked_engine();
        platform.signal(Signal::Restart).set().unwrap();

        let mut block = pattern(960 * 4);
        render(&engine, CLIENT_A, &mut block, 0);

        assert_eq!(engine.state(), EngineState::Hooked { active: true });
        assert_eq!(platform.signal(Signal::Ready).sets(), 1);
        assert_eq!(platform.signal(Signal::DataReceived).sets(), 1);

        let info = engine.hook_info();
        assert_eq!(info.map_id, 1);
        assert_eq!(info.map_size, 384_064);
        assert_eq!(
            (info.version_major, info.version_minor),
            (HOOK_VERSION_MAJOR, HOOK_VERSION_MINOR)
        );
        assert!(platform.region("SessionCaptureHook_Buffer_4242_1").is_some());

        let reader = reader(&platform, 1);
        let mut out = Vec::new();
        assert_eq!(reader.read_into(&mut out), 3840);
        assert_eq!(out, block);
        assert_eq!(engine.stats().copy_buffer_capacity, 3840);
    }

    #[test]
    fn silent_block_is_published_as_zeros() {
        let (engine, platform) = hooked_engine();
        platform.signal(Signal::Restart).set().unwrap();
        render(&engine, CLIENT_A, &mut pattern(3840), 0);

        let mut block = pattern(3840);
        render(&engine, CLIENT_A, &mut block, BUFFER_FLAGS_SILENT);

        let mut out = Vec::new();
        assert_eq!(reader(&platform, 1).read_into(&mut out), 3840);
        assert!(out.iter().all(|&b| b == 0));
        // The source buffer is never touched.
        assert_eq!(block, pattern(3840));
    }

    #[test]
    fn nothing_is_published_before_restart() {
        let (engine, platform) = hooked_engine();
        render(&engine, CLIENT_A, &mut pattern(3840), 0);

        assert!(!engine.is_active());
        assert_eq!(engine.stats().published_blocks, 0);
        assert!(platform.region(&data_region_name(PID, 1)).is_none());
    }

    #[test]
    fn only_adopted_client_is_captured() {
        let (engine, platform) = hooked_engine();
        platform.signal(Signal::Restart).set().unwrap();
        render(&engine, CLIENT_A, &mut pattern(3840), 0);

        let mut other = vec![0x55; 1920];
        render(&engine, CLIENT_B, &mut other, 0);
        render(&engine, CLIENT_B, &mut other, 0);

        let mut out = Vec::new();
        reader(&platform, 1).read_into(&mut out);
        assert_eq!(out, pattern(3840));
        assert_eq!(engine.stats().published_blocks, 1);
    }

    #[test]
    fn every_release_publishes_one_block() {
        let (engine, platform) = hooked_engine();
        platform.signal(Signal::Restart).set().unwrap();
        for frames in [960usize, 480, 441, 960] {
            render(&engine, CLIENT_A, &mut pattern(frames * 4), 0);
        }

        let stats = engine.stats();
        assert_eq!(stats.published_blocks, 4);
        assert_eq!(stats.published_bytes, (960 + 480 + 441 + 960) * 4);
        assert_eq!(stats.copy_buffer_capacity, 3840);
        assert_eq!(platform.signal(Signal::DataReceived).sets(), 4);
        assert_eq!(reader(&platform, 1).valid_len(), 3840);
    }

    #[test]
    fn release_without_obtained_buffer_is_skipped() {
        let (engine, platform) = hooked_engine();
        platform.signal(Signal::Restart).set().unwrap();
        render(&engine, CLIENT_A, &mut pattern(3840), 0);

        engine.on_buffer_released(CLIENT_A, 960, 0);
        assert_eq!(engine.stats().published_blocks, 1);

        engine.on_buffer_released(CLIENT_A, 960, BUFFER_FLAGS_SILENT);
        assert_eq!(engine.stats().published_blocks, 2);
    }

    #[test]
    fn stop_then_restart_uses_new_mapping() {
        let (engine, platform) = hooked_engine();
        platform.signal(Signal::Restart).set().unwrap();
        render(&engine, CLIENT_A, &mut pattern(3840), 0);

        platform.signal(Signal::Stop).set().unwrap();
        render(&engine, CLIENT_A, &mut pattern(3840), 0);
        assert_eq!(engine.state(), EngineState::Hooked { active: false });
        assert_eq!(engine.stats().published_blocks, 1);

        // Client adoption is released, so another client may take over.
        platform.signal(Signal::Restart).set().unwrap();
        let mut block = vec![0x11; 1920];
        render(&engine, CLIENT_B, &mut block, 0);
        assert!(engine.is_active());
        assert_eq!(engine.hook_info().map_id, 2);

        let mut out = Vec::new();
        reader(&platform, 2).read_into(&mut out);
        assert_eq!(out, block);
    }

    #[test]
    fn failed_activation_is_retried() {
        let (engine, platform) = hooked_engine();
        platform.fail_regions(true);
        platform.signal(Signal::Restart).set().unwrap();
        render(&engine, CLIENT_A, &mut pattern(3840), 0);
        assert!(!engine.is_active());
        assert!(!platform.signal(Signal::Restart).peek());

        platform.fail_regions(false);
        render(&engine, CLIENT_A, &mut pattern(3840), 0);
        assert!(engine.is_active());
        assert_eq!(engine.stats().activations, 1);
        // Ids are never reused, even for failed attempts.
        assert_eq!(engine.hook_info().map_id, 2);
    }

    #[test]
    fn stale_stop_does_not_end_next_capture() {
        let (engine, platform) = hooked_engine();
        platform.signal(Signal::Stop).set().unwrap();
        platform.signal(Signal::Restart).set().unwrap();

        render(&engine, CLIENT_A, &mut pattern(3840), 0);
        render(&engine, CLIENT_A, &mut pattern(3840), 0);

        assert!(engine.is_active());
        assert!(!platform.signal(Signal::Stop).peek());
        assert_eq!(engine.stats().published_blocks, 2);
        assert_eq!(engine.hook_info().map_id, 1);
    }

    #[test]
    fn stop_withdraws_pending_activation() {
        let (engine, platform) = hooked_engine();
        platform.fail_regions(true);
        platform.signal(Signal::Restart).set().unwrap();
        render(&engine, CLIENT_A, &mut pattern(3840), 0);

        platform.fail_regions(false);
        platform.signal(Signal::Stop).set().unwrap();
        render(&engine, CLIENT_A, &mut pattern(3840), 0);
        assert!(!engine.is_active());
        assert_eq!(platform.signal(Signal::Ready).sets(), 0);

        platform.signal(Signal::Restart).set().unwrap();
        render(&engine, CLIENT_A, &mut pattern(3840), 0);
        assert!(engine.is_active());
        assert_eq!(engine.stats().published_blocks, 1);
    }

    #[test]
    fn oversized_block_is_truncated_to_whole_frames() {
        let config = EngineConfig {
            buffer_seconds: 0.001,
            ..config()
        };
        let (engine, platform) = engine(config);
        engine.try_hook().unwrap();
        platform.signal(Signal::Restart).set().unwrap();

        let mut block = pattern(960 * 4);
        render(&engine, CLIENT_A, &mut block, 0);

        let reader = reader(&platform, 1);
        let mut out = Vec::new();
        let len = reader.read_into(&mut out);
        assert_eq!(len % 4, 0);
        assert!(len <= reader.capacity());
        assert_eq!(out, &block[..len]);
    }

    #[test]
    fn render_module_reload_rehooks() {
        let (engine, platform) = hooked_engine();
        platform.signal(Signal::Restart).set().unwrap();
        render(&engine, CLIENT_A, &mut pattern(3840), 0);

        engine.recheck_hooks();
        assert_eq!(platform.get_buffer_patches().len(), 1);

        platform.set_module_base(Some(BASE + 0x10_0000));
        engine.recheck_hooks();
        let patches = platform.get_buffer_patches();
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[1].target(), BASE + 0x10_0000 + 0x1000);
        assert_eq!(engine.state(), EngineState::Hooked { active: false });
        assert_eq!(engine.stats().hook_installs, 2);
    }

    #[test]
    fn render_module_unload_drops_hooks() {
        let (engine, platform) = hooked_engine();
        platform.set_module_base(None);
        engine.recheck_hooks();
        assert_eq!(engine.state(), EngineState::Polling);
        assert_eq!(engine.forward_get_buffer(|original| original(0, 0)), None);
    }

    fn wait_until(deadline: Duration, mut f: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if f() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn lifecycle_thread_hooks_after_init() {
        let platform = FakePlatform::new(PID);
        platform.set_module_base(Some(BASE));
        let config = EngineConfig {
            init_timeout: None,
            ..config()
        };
        let engine = Arc::new(CaptureEngine::new(platform.clone(), config).unwrap());
        let handle = engine.spawn().unwrap();

        let restart = platform.signal(Signal::Restart);
        assert!(wait_until(Duration::from_secs(2), || {
            engine.state() == EngineState::WaitingForInit
        }));
        assert!(restart.peek());

        write_request(&platform, RenderClientOffsets::new(0x1000, 0x1050));
        platform.signal(Signal::Init).set().unwrap();
        assert!(wait_until(Duration::from_secs(2), || engine.state().is_hooked()));
        assert_eq!(engine.poll_interval(), Duration::from_millis(4));

        engine.shutdown();
        handle.join().unwrap();
        assert_eq!(platform.signal(Signal::Exit).sets(), 1);
    }

    #[test]
    fn missing_init_ends_lifecycle() {
        let (engine, platform) = engine(config());
        engine.run();
        assert_eq!(engine.state(), EngineState::NeverInitialized);
        assert!(engine.state().is_terminal());
        assert_eq!(platform.signal(Signal::Exit).sets(), 1);
    }

    #[test]
    fn shutdown_wakes_thread_waiting_for_init() {
        let platform = FakePlatform::new(PID);
        let config = EngineConfig {
            init_timeout: None,
            ..config()
        };
        let engine = Arc::new(CaptureEngine::new(platform.clone(), config).unwrap());
        let handle = engine.spawn().unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            engine.state() == EngineState::WaitingForInit
        }));

        engine.shutdown();
        handle.join().unwrap();
        assert!(!engine.state().is_hooked());
        assert_eq!(platform.signal(Signal::Exit).sets(), 1);
    }
}
