//! session-capture: list audio sessions and record one hooked process.

#[cfg(target_os = "windows")]
mod app {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use clap::{Parser, Subcommand};
    use serde::Serialize;

    use session_capture_core::models::audio_models::AudioSessionInfo;
    use session_capture_core::models::config::{CaptureConfiguration, HookRate};
    use session_capture_core::models::error::CaptureError;
    use session_capture_core::models::recording_result::RecordingResult;
    use session_capture_core::models::state::RecorderState;
    use session_capture_core::session::recorder::{recording_path, SessionRecorder};
    use session_capture_core::traits::capture_delegate::CaptureDelegate;
    use session_capture_core::RenderClientOffsets;
    use session_capture_windows::{
        render_mix_format, ComGuard, CommandInjector, HookConnection, Injector, OffsetLoader, SessionEnumerator,
    };

    #[derive(Parser)]
    #[command(name = "session-capture")]
    #[command(version, about = "Record the audio a single process renders", long_about = None)]
    struct Cli {
        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,

        #[command(subcommand)]
        command: Commands,
    }

    #[derive(Subcommand)]
    enum Commands {
        /// List audio sessions on all render endpoints as JSON
        Sessions,

        /// Run both offset helpers and print what they report
        Offsets {
            /// Directory holding the offset helpers
            #[arg(long, default_value = ".")]
            dir: PathBuf,
        },

        /// Record the audio process PID renders
        Capture {
            /// Target process id
            #[arg(long)]
            pid: u32,

            /// Output WAV file [default: <exe>_<pid>.wav]
            #[arg(short, long)]
            output: Option<PathBuf>,

            /// Seconds to record
            #[arg(long, default_value_t = 10)]
            seconds: u64,

            /// Capture settings as JSON
            #[arg(long, value_name = "FILE")]
            config: Option<PathBuf>,

            /// Hook polling rate: slow, normal, fast or fastest
            #[arg(long, value_parser = parse_hook_rate)]
            hook_rate: Option<HookRate>,

            /// Directory holding the offset helpers
            #[arg(long)]
            offsets_dir: Option<PathBuf>,

            /// Loader used to inject the hook module first
            #[arg(long, requires = "hook")]
            loader: Option<PathBuf>,

            /// Hook module to inject
            #[arg(long)]
            hook: Option<PathBuf>,
        },
    }

    fn parse_hook_rate(value: &str) -> Result<HookRate, String> {
        serde_json::from_value(serde_json::Value::String(value.to_lowercase()))
            .map_err(|_| format!("unknown hook rate: {}", value))
    }

    #[derive(Serialize)]
    struct OffsetsReport {
        get_buffer: String,
        release_buffer: String,
        resolved: bool,
    }

    impl From<RenderClientOffsets> for OffsetsReport {
        fn from(offsets: RenderClientOffsets) -> Self {
            Self {
                get_buffer: format!("{:#x}", offsets.get_buffer),
                release_buffer: format!("{:#x}", offsets.release_buffer),
                resolved: offsets.is_resolved(),
            }
        }
    }

    /// Logs recorder progress.
    struct LogDelegate;

    impl CaptureDelegate for LogDelegate {
        fn on_state_changed(&self, state: &RecorderState) {
            log::debug!("recorder state: {:?}", state);
        }

        fn on_block(&self, bytes: usize) {
            log::trace!("block of {} bytes", bytes);
        }

        fn on_error(&self, error: &CaptureError) {
            log::error!("capture failed: {}", error);
        }

        fn on_capture_finished(&self, result: &RecordingResult) {
            log::info!(
                "wrote {:.1}s to {}",
                result.duration_secs,
                result.file_path.display()
            );
        }
    }

    fn to_json<T: Serialize>(value: &T) -> Result<String, CaptureError> {
        serde_json::to_string_pretty(value).map_err(|e| CaptureError::StorageError(e.to_string()))
    }

    fn load_config(path: &Path) -> Result<CaptureConfiguration, CaptureError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CaptureError::ConfigurationFailed(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| CaptureError::ConfigurationFailed(format!("{}: {}", path.display(), e)))
    }

    /// The configured session when it belongs to `pid`, else any session of
    /// `pid`, else a placeholder carrying only the pid.
    fn find_session(pid: u32, config: &CaptureConfiguration) -> Result<AudioSessionInfo, CaptureError> {
        let sessions = SessionEnumerator::new()?.sessions_of(pid);
        let selected = config
            .session
            .as_ref()
            .and_then(|key| sessions.iter().find(|s| &s.key() == key))
            .or_else(|| sessions.first())
            .cloned();
        Ok(selected.unwrap_or_else(|| {
            log::warn!("process {} has no audio session yet", pid);
            AudioSessionInfo {
                session_name: String::new(),
                session_id: String::new(),
                device_name: String::new(),
                device_id: String::new(),
                process_id: pid,
                exe: String::new(),
            }
        }))
    }

    fn list_sessions() -> Result<(), CaptureError> {
        let _com = ComGuard::initialize()?;
        let sessions = SessionEnumerator::new()?.list_sessions();
        println!("{}", to_json(&sessions)?);
        Ok(())
    }

    fn print_offsets(dir: PathBuf) -> Result<(), CaptureError> {
        let probed = OffsetLoader::spawn(dir)?.wait();
        let report = serde_json::json!({
            "x86": OffsetsReport::from(probed.x86),
            "x64": OffsetsReport::from(probed.x64),
        });
        println!("{}", to_json(&report)?);
        Ok(())
    }

    struct CaptureArgs {
        pid: u32,
        output: Option<PathBuf>,
        seconds: u64,
        config: Option<PathBuf>,
        hook_rate: Option<HookRate>,
        offsets_dir: Option<PathBuf>,
        loader: Option<PathBuf>,
        hook: Option<PathBuf>,
    }

    fn capture(args: CaptureArgs) -> Result<(), CaptureError> {
        let mut config = match args.config {
            Some(ref path) => load_config(path)?,
            None => CaptureConfiguration::default(),
        };
        if let Some(rate) = args.hook_rate {
            config.hook_rate = rate;
        }
        if let Some(dir) = args.offsets_dir {
            config.offsets_directory = dir;
        }
        config.validate().map_err(CaptureError::ConfigurationFailed)?;

        let loader = OffsetLoader::spawn(config.offsets_directory.clone())?;

        let _com = ComGuard::initialize()?;
        let session = find_session(args.pid, &config)?;
        let device_id = (!session.device_id.is_empty()).then_some(session.device_id.as_str());
        let format = render_mix_format(device_id).or_else(|e| {
            log::warn!("falling back to the default render endpoint: {}", e);
            render_mix_format(None)
        })?;

        if let (Some(loader_exe), Some(hook)) = (args.loader, args.hook) {
            CommandInjector::new(loader_exe).inject(args.pid, &hook, config.anticheat_hook)?;
        }

        let offsets = loader.wait().for_process(args.pid)?;
        let mut connection = HookConnection::connect(args.pid, config.ready_timeout)?;
        connection.initialize(offsets, format, config.hook_rate)?;

        let output = args
            .output
            .unwrap_or_else(|| recording_path(Path::new("."), &session));
        let mut recorder = SessionRecorder::new(connection, session, config);
        recorder.set_delegate(Arc::new(LogDelegate));
        recorder.start(output)?;

        let deadline = Instant::now() + Duration::from_secs(args.seconds);
        while Instant::now() < deadline && recorder.state().is_capturing() {
            thread::sleep(Duration::from_millis(100));
        }

        let result = recorder.stop()?;
        println!("{}", to_json(&result.metadata)?);
        Ok(())
    }

    pub fn main() -> Result<(), CaptureError> {
        let cli = Cli::parse();

        let log_level = if cli.verbose { "debug" } else { "info" };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

        match cli.command {
            Commands::Sessions => list_sessions(),
            Commands::Offsets { dir } => print_offsets(dir),
            Commands::Capture {
                pid,
                output,
                seconds,
                config,
                hook_rate,
                offsets_dir,
                loader,
                hook,
            } => capture(CaptureArgs {
                pid,
                output,
                seconds,
                config,
                hook_rate,
                offsets_dir,
                loader,
                hook,
            }),
        }
    }
}

#[cfg(target_os = "windows")]
fn main() -> Result<(), session_capture_core::CaptureError> {
    app::main()
}

#[cfg(not(target_os = "windows"))]
fn main() {
    eprintln!("session-capture only runs on Windows");
    std::process::exit(1);
}
