use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::models::audio_models::{AudioFormat, AudioSessionInfo};
use crate::models::config::CaptureConfiguration;
use crate::models::error::CaptureError;
use crate::models::recording_result::{RecordingMetadata, RecordingResult};
use crate::models::state::RecorderState;
use crate::storage::metadata;
use crate::storage::wav_writer::WavFileWriter;
use crate::traits::block_source::BlockSource;
use crate::traits::capture_delegate::CaptureDelegate;

/// Internal mutable recorder state, protected by `parking_lot::Mutex`.
struct RecorderShared {
    state: RecorderState,
    blocks: u64,
    bytes: u64,
}

impl RecorderShared {
    fn new() -> Self {
        Self {
            state: RecorderState::Idle,
            blocks: 0,
            bytes: 0,
        }
    }
}

/// Records one audio session to a WAV file.
///
/// Generic over the block source so the pump and file handling run the
/// same way against a real hook connection and a test double:
/// ```text
/// [BlockSource] → next_block → [WavFileWriter] → recording.wav
///                                               + recording.metadata.json
/// ```
pub struct SessionRecorder<S: BlockSource + 'static> {
    source: Arc<Mutex<S>>,
    session: AudioSessionInfo,
    config: CaptureConfiguration,
    shared: Arc<Mutex<RecorderShared>>,
    delegate: Option<Arc<dyn CaptureDelegate>>,
    writer: Arc<Mutex<Option<WavFileWriter>>>,
    format: Option<AudioFormat>,
    started_at: u64,

    pump_running: Arc<AtomicBool>,
    pump_handle: Option<thread::JoinHandle<()>>,
}

impl<S: BlockSource + 'static> SessionRecorder<S> {
    pub fn new(source: S, session: AudioSessionInfo, config: CaptureConfiguration) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            session,
            config,
            shared: Arc::new(Mutex::new(RecorderShared::new())),
            delegate: None,
            writer: Arc::new(Mutex::new(None)),
            format: None,
            started_at: 0,
            pump_running: Arc::new(AtomicBool::new(false)),
            pump_handle: None,
        }
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn CaptureDelegate>) {
        self.delegate = Some(delegate);
    }

    pub fn state(&self) -> RecorderState {
        self.shared.lock().state.clone()
    }

    /// Blocks written so far.
    pub fn blocks(&self) -> u64 {
        self.shared.lock().blocks
    }

    /// Start capture into `file_path`. Transitions: idle → connecting → capturing.
    ///
    /// A recorder whose start failed holds no file and may be started again.
    pub fn start(&mut self, file_path: PathBuf) -> Result<(), CaptureError> {
        {
            let s = self.shared.lock();
            let retry = matches!(s.state, RecorderState::Failed(_)) && self.writer.lock().is_none();
            if !s.state.is_idle() && !retry {
                return Err(CaptureError::ConfigurationFailed("can only start from idle state".into()));
            }
        }
        self.config.validate().map_err(CaptureError::ConfigurationFailed)?;

        self.set_state(RecorderState::Connecting);

        let format = match self.source.lock().start(self.config.ready_timeout) {
            Ok(format) => format,
            Err(e) => {
                // Withdraw the capture request.
                if let Err(stop_err) = self.source.lock().stop() {
                    log::warn!("failed to stop hook capture: {}", stop_err);
                }
                self.set_state(RecorderState::Failed(e.clone()));
                return Err(e);
            }
        };

        let mut writer = WavFileWriter::new(file_path, format);
        if let Err(e) = writer.open() {
            if let Err(stop_err) = self.source.lock().stop() {
                log::warn!("failed to stop hook capture: {}", stop_err);
            }
            self.set_state(RecorderState::Failed(e.clone()));
            return Err(e);
        }
        *self.writer.lock() = Some(writer);
        self.format = Some(format);
        self.started_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        log::info!(
            "recording {} at {} Hz, {} channels",
            self.session.display_name(),
            format.sample_rate,
            format.channels
        );
        self.set_state(RecorderState::Capturing { duration_secs: 0.0 });
        self.start_pump(format)
    }

    /// Stop capture and finalize the recording.
    /// Transitions: capturing/failed → stopping → completed → idle.
    pub fn stop(&mut self) -> Result<RecordingResult, CaptureError> {
        {
            let s = self.shared.lock();
            let stoppable = s.state.is_capturing() || matches!(s.state, RecorderState::Failed(_));
            if !stoppable || self.writer.lock().is_none() {
                return Err(CaptureError::ConfigurationFailed(
                    "can only stop a started recording".into(),
                ));
            }
        }

        self.set_state(RecorderState::Stopping);

        self.pump_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.pump_handle.take() {
            let _ = handle.join();
        }

        if let Err(e) = self.source.lock().stop() {
            log::warn!("failed to stop hook capture: {}", e);
        }

        let (file_path, bytes, duration_secs) = {
            let mut writer_guard = self.writer.lock();
            let Some(mut writer) = writer_guard.take() else {
                return Err(CaptureError::StorageError("file writer not available".into()));
            };
            let bytes = writer.close()?;
            (writer.file_path().to_path_buf(), bytes, writer.duration_secs())
        };

        let metadata = RecordingMetadata {
            session: self.session.clone(),
            format: self.format.unwrap_or_default(),
            file_path: file_path.to_string_lossy().into_owned(),
            duration_secs,
            bytes,
            blocks: self.shared.lock().blocks,
            map_id: self.source.lock().map_id(),
            started_at: self.started_at,
        };
        metadata::write_metadata(&metadata, &file_path)?;

        let result = RecordingResult {
            file_path,
            duration_secs,
            metadata,
        };

        self.set_state(RecorderState::Completed(Box::new(result.clone())));
        if let Some(ref delegate) = self.delegate {
            delegate.on_capture_finished(&result);
        }

        // Reset for the next recording.
        *self.shared.lock() = RecorderShared::new();
        Ok(result)
    }

    pub fn output_path(&self) -> Option<PathBuf> {
        self.writer.lock().as_ref().map(|w| w.file_path().to_path_buf())
    }

    // --- Internal helpers ---

    fn set_state(&self, new_state: RecorderState) {
        set_shared_state(&self.shared, self.delegate.as_deref(), new_state);
    }

    fn start_pump(&mut self, format: AudioFormat) -> Result<(), CaptureError> {
        self.pump_running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.pump_running);
        let source = Arc::clone(&self.source);
        let writer = Arc::clone(&self.writer);
        let shared = Arc::clone(&self.shared);
        let delegate = self.delegate.clone();
        let timeout = self.config.data_timeout;

        let handle = thread::Builder::new()
            .name("capture-pump".into())
            .spawn(move || {
                let mut block = Vec::new();
                while running.load(Ordering::SeqCst) {
                    let received = source.lock().next_block(&mut block, timeout);
                    let error = match received {
                        Ok(true) => match write_block(&writer, &block) {
                            Ok(()) => {
                                {
                                    let mut s = shared.lock();
                                    s.blocks += 1;
                                    s.bytes += block.len() as u64;
                                    if s.state.is_capturing() {
                                        let duration_secs = format.duration_secs(s.bytes);
                                        s.state = RecorderState::Capturing { duration_secs };
                                    }
                                }
                                if let Some(ref d) = delegate {
                                    d.on_block(block.len());
                                }
                                continue;
                            }
                            Err(e) => e,
                        },
                        Ok(false) if source.lock().hook_exited() => CaptureError::HookExited,
                        Ok(false) => continue,
                        Err(e) => e,
                    };

                    log::error!("Capture pump stopped: {}", error);
                    if let Some(ref d) = delegate {
                        d.on_error(&error);
                    }
                    set_shared_state(&shared, delegate.as_deref(), RecorderState::Failed(error));
                    break;
                }
            })
            .map_err(|e| CaptureError::Platform(format!("failed to spawn pump thread: {}", e)))?;

        self.pump_handle = Some(handle);
        Ok(())
    }
}

impl<S: BlockSource + 'static> Drop for SessionRecorder<S> {
    fn drop(&mut self) {
        self.pump_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.pump_handle.take() {
            let _ = handle.join();
        }
    }
}

fn set_shared_state(shared: &Mutex<RecorderShared>, delegate: Option<&dyn CaptureDelegate>, state: RecorderState) {
    shared.lock().state = state.clone();
    if let Some(d) = delegate {
        d.on_state_changed(&state);
    }
}

fn write_block(writer: &Mutex<Option<WavFileWriter>>, block: &[u8]) -> Result<(), CaptureError> {
    match writer.lock().as_mut() {
        Some(w) => w.write(block),
        None => Err(CaptureError::StorageError("file writer not available".into())),
    }
}

/// Default file name for a recording of `session` inside `directory`.
pub fn recording_path(directory: &Path, session: &AudioSessionInfo) -> PathBuf {
    let stem: String = session
        .exe
        .trim_end_matches(".exe")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let stem = if stem.is_empty() { "session".to_string() } else { stem };
    directory.join(format!("{}_{}.wav", stem, session.process_id))
}
