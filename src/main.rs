mod application;
mod domain;
mod infrastructure;
mod logging;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, OnceLock};

use anyhow::Context;

use crate::application::control_loop::{Backoff, PlayLoop, RecordLoop, TickClock};
use crate::application::governor::{SafetyGovernor, TimeDilationGate};
use crate::application::adapter::KmAdapter;
use crate::application::picker::{names_match, parse_spec, ProcessSpec};
use crate::application::recording::{RecordingPipeline, RunInfo};
use crate::domain::config::AppConfig;
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::ports::{DispatchPort, FramePort, GamepadPort, ProcessQueryPort, RawInputPort};
use crate::domain::types::{ControllerMode, ProcessInfo};
use crate::infrastructure::console_picker::{run_picker, PickedTarget};
use crate::infrastructure::inference_client::HttpPolicyClient;
use crate::infrastructure::mocks::{MockFrameSource, MockGamepad};
use crate::logging::init_logging;

fn main() {
    // ログシステムの初期化（非同期ファイル出力）
    let log_dir = PathBuf::from("logs");
    let _guard = init_logging("info", false, Some(log_dir));
    // 注意: _guardはmain終了まで保持する必要がある（Dropでログスレッドが終了）

    tracing::info!("Marionette starting...");

    match run() {
        Ok(_) => {
            tracing::info!("Marionette terminated gracefully.");
        }
        Err(e) => {
            tracing::error!("Fatal error: {:?}", e);
            std::process::exit(1);
        }
    }
}

/// アプリケーションのメイン処理
fn run() -> anyhow::Result<()> {
    // 設定ファイルの読み込み（存在しない場合はデフォルト設定を使用）
    let config = match AppConfig::from_file("config.toml") {
        Ok(config) => {
            tracing::info!("Loaded configuration from config.toml");
            config
        }
        Err(e) => {
            tracing::warn!("Failed to load config.toml: {:?}, using defaults", e);
            AppConfig::default()
        }
    };
    config.validate().context("Invalid configuration")?;

    tracing::info!(
        "Safety: dry_run={}, stop_file={}, rate={}",
        config.safety.dry_run,
        config.safety.stop_file,
        config.safety.rate_capacity
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = args.first().map(String::as_str).unwrap_or("play");

    match mode {
        "play" => {
            let record = args.iter().any(|a| a == "--record");
            run_play(&config, record)?;
        }
        "record" => run_record(&config)?,
        "pick" => {
            let target = resolve_target(&config, true)?;
            match target {
                Target::Process(proc) => println!("{} (pid:{})", proc.name, proc.pid),
                Target::Name(name) => println!("{} (not running)", name),
            }
        }
        "init" => {
            AppConfig::write_default("config.toml").context("Failed to write config.toml")?;
            println!("Wrote default config.toml");
        }
        other => {
            eprintln!("Unknown mode: {}", other);
            eprintln!("Usage: marionette [play [--record] | record | pick | init]");
            std::process::exit(2);
        }
    }
    Ok(())
}

/// 停止フラグ（Ctrl-Cで立てる）
static STOP_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

fn install_stop_handler() -> Arc<AtomicBool> {
    let flag = STOP_FLAG
        .get_or_init(|| Arc::new(AtomicBool::new(false)))
        .clone();

    #[cfg(windows)]
    unsafe {
        use windows::Win32::Foundation::BOOL;
        use windows::Win32::System::Console::SetConsoleCtrlHandler;

        unsafe extern "system" fn handler(_ctrl_type: u32) -> BOOL {
            if let Some(flag) = STOP_FLAG.get() {
                flag.store(true, std::sync::atomic::Ordering::Relaxed);
            }
            BOOL(1)
        }

        if SetConsoleCtrlHandler(Some(handler), true).is_err() {
            tracing::warn!("Failed to install Ctrl-C handler, use the stop file to halt");
        }
    }
    #[cfg(not(windows))]
    tracing::warn!("No console handler on this platform, use the stop file to halt");

    flag
}

/// 解決済みの対象
enum Target {
    Process(ProcessInfo),
    Name(String),
}

impl Target {
    fn name(&self) -> &str {
        match self {
            Target::Process(proc) => &proc.name,
            Target::Name(name) => name,
        }
    }

    fn pid(&self) -> Option<u32> {
        match self {
            Target::Process(proc) => Some(proc.pid),
            Target::Name(_) => None,
        }
    }
}

fn process_query() -> DomainResult<Box<dyn ProcessQueryPort>> {
    #[cfg(windows)]
    {
        Ok(Box::new(
            crate::infrastructure::process_query::WindowsProcessQuery::new(),
        ))
    }
    #[cfg(not(windows))]
    {
        Err(DomainError::Other(
            "Process enumeration requires Windows".to_string(),
        ))
    }
}

/// 設定とピッカーから対象プロセスを決める
fn resolve_target(config: &AppConfig, allow_picker: bool) -> DomainResult<Target> {
    let query = process_query()?;
    let configured = config.target.process.trim().to_string();

    if !configured.is_empty() {
        let processes = query.enumerate()?;
        match parse_spec(&configured) {
            ProcessSpec::Pid(pid) => {
                if let Some(proc) = processes.iter().find(|p| p.pid == pid) {
                    return Ok(Target::Process(proc.clone()));
                }
                return Err(DomainError::TargetNotFound(format!("pid:{}", pid)));
            }
            ProcessSpec::Name(name) => {
                let matched: Vec<&ProcessInfo> = processes
                    .iter()
                    .filter(|p| names_match(&name, &p.name))
                    .collect();
                // 同名プロセスはウィンドウ持ちを優先
                if let Some(proc) = matched
                    .iter()
                    .find(|p| p.has_window())
                    .or_else(|| matched.first())
                {
                    return Ok(Target::Process((*proc).clone()));
                }
                tracing::warn!(name = %name, "Configured target not running");
            }
        }
    }

    if allow_picker && config.picker.auto_open {
        let default = (!configured.is_empty()).then_some(configured);
        return match run_picker(query.as_ref(), &config.picker, default)? {
            PickedTarget::Process(proc) => Ok(Target::Process(proc)),
            PickedTarget::Name(name) => Ok(Target::Name(name)),
        };
    }

    if configured.is_empty() {
        return Err(DomainError::Configuration(
            "No target process configured ([target] process)".to_string(),
        ));
    }
    Err(DomainError::TargetNotFound(configured))
}

fn build_dispatcher() -> Box<dyn DispatchPort> {
    #[cfg(windows)]
    {
        Box::new(crate::infrastructure::send_input::SendInputDispatcher::new())
    }
    #[cfg(not(windows))]
    {
        tracing::warn!("SendInput unavailable on this platform, using mock dispatcher");
        Box::new(crate::infrastructure::mocks::MockDispatcher::new())
    }
}

fn build_raw_input(config: &AppConfig, focus_pid: Option<u32>) -> DomainResult<Box<dyn RawInputPort>> {
    #[cfg(windows)]
    {
        if config.capture.raw_mouse {
            match crate::infrastructure::raw_input::RawInputCapture::new(focus_pid) {
                Ok(capture) => return Ok(Box::new(capture)),
                Err(e) => {
                    tracing::error!(error = %e, "Raw input hook failed, falling back to polling");
                }
            }
        }
        Ok(Box::new(
            crate::infrastructure::raw_input::CursorPollCapture::new(focus_pid),
        ))
    }
    #[cfg(not(windows))]
    {
        let _ = (config, focus_pid);
        Err(DomainError::CaptureHookFailure(
            "Input capture requires Windows".to_string(),
        ))
    }
}

/// 再生モード: 推論サーバーの出力を入力へ変換する
fn run_play(config: &AppConfig, record: bool) -> DomainResult<()> {
    let _dilation = if config.safety.time_dilation_factor != 1.0 {
        Some(TimeDilationGate::acquire(&config.safety)?)
    } else {
        None
    };

    let target = resolve_target(config, true)?;
    tracing::info!(target = %target.name(), pid = ?target.pid(), "Play target resolved");

    if config.safety.dry_run {
        tracing::info!("Dry-run enabled: actions will be logged, never injected");
    }

    let frames: Box<dyn FramePort> = Box::new(MockFrameSource::default());
    let policy = HttpPolicyClient::new(&config.inference)?;
    let dispatcher = build_dispatcher();
    let gamepad: Option<Box<dyn GamepadPort>> = match config.controller.mode {
        ControllerMode::Gamepad => Some(Box::new(MockGamepad::new())),
        ControllerMode::Km => None,
    };

    let recording = if record {
        Some(RecordingPipeline::begin_run(
            &config.recording,
            RunInfo {
                process: target.name().to_string(),
                fps: config.capture.fps,
                controller_mode: config.controller.mode,
                raw_mouse: false,
                focus_only: config.capture.focus_only,
            },
        )?)
    } else {
        None
    };

    let stop_flag = install_stop_handler();
    let mut looper = PlayLoop::new(
        frames,
        Box::new(policy),
        dispatcher,
        gamepad,
        KmAdapter::new(config.adapter.clone()),
        SafetyGovernor::new(&config.safety),
        TickClock::from_config(&config.capture),
        Backoff::from_config(&config.inference),
        config.controller.mode,
        recording,
        stop_flag,
    );
    let summary = looper.run()?;

    tracing::info!(
        ticks = summary.ticks,
        dispatched = summary.dispatched,
        suppressed = summary.suppressed,
        reason = ?summary.reason,
        "Play finished"
    );
    Ok(())
}

/// 記録モード: 人間のデモンストレーションを記録する
fn run_record(config: &AppConfig) -> DomainResult<()> {
    let target = resolve_target(config, true)?;
    tracing::info!(target = %target.name(), pid = ?target.pid(), "Record target resolved");

    let focus_pid = config.capture.focus_only.then(|| target.pid()).flatten();
    if config.capture.focus_only && focus_pid.is_none() {
        tracing::warn!("focus_only requested but target pid unknown, capturing everything");
    }

    let raw_input = build_raw_input(config, focus_pid)?;
    let frames: Box<dyn FramePort> = Box::new(MockFrameSource::default());

    let pipeline = RecordingPipeline::begin_run(
        &config.recording,
        RunInfo {
            process: target.name().to_string(),
            fps: config.capture.fps,
            controller_mode: config.controller.mode,
            raw_mouse: !raw_input.is_degraded(),
            focus_only: config.capture.focus_only,
        },
    )?;
    tracing::info!(dir = %pipeline.run_dir().display(), "Recording run started");

    let stop_flag = install_stop_handler();
    let looper = RecordLoop::new(
        raw_input,
        frames,
        pipeline,
        TickClock::from_config(&config.capture),
        Backoff::from_config(&config.inference),
        PathBuf::from(&config.safety.stop_file),
        stop_flag,
        config.recording.warmup_countdown_sec,
    );
    let (meta, reason) = looper.run()?;

    tracing::info!(
        run_id = %meta.run_id,
        frames = meta.frame_count,
        duration_sec = meta.duration_sec,
        reason = ?reason,
        "Record finished"
    );
    Ok(())
}
