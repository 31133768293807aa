//! 制御ループ（Application層）
//!
//! 固定レートtickの駆動と、tick内の処理順序の強制。
//! 再生モード: キルスイッチ → フレーム取得 → 推論 → 変換 →
//! ガバナー → ディスパッチ → 記録。
//! 記録モード: 同じtickクロックでraw inputをサンプリングし
//! 記録パイプラインへ流す。

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::application::adapter::KmAdapter;
use crate::application::governor::{Outcome, SafetyGovernor};
use crate::application::recording::RecordingPipeline;
use crate::domain::config::{CaptureConfig, InferenceConfig};
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::ports::{DispatchPort, FramePort, GamepadPort, PolicyPort, RawInputPort};
use crate::domain::types::{ControllerMode, Frame, GamepadAction, RunMeta};
use crate::measure_span;

/// ループの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Halted,
}

/// ループ停止の理由
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// キルスイッチファイル検出
    KillSwitch,
    /// 外部からの停止要求（Ctrl-C等）
    StopRequested,
    /// リトライ上限到達
    RetryExhausted(String),
    /// 記録上限到達（記録モードのみ）
    RecordingComplete,
}

/// 実行結果サマリ
#[derive(Debug, Clone, PartialEq)]
pub struct LoopSummary {
    pub ticks: u64,
    pub dispatched: u64,
    pub suppressed: u64,
    pub reason: HaltReason,
}

/// 固定レートのtickクロック
///
/// 処理遅延があってもtick間隔をmin_interval未満に圧縮しない
/// （引き延ばすことはあっても、詰めて取り返すことはしない）。
pub struct TickClock {
    interval: Duration,
    min_interval: Duration,
    next: Option<Instant>,
}

impl TickClock {
    pub fn new(interval: Duration, min_interval: Duration) -> Self {
        Self {
            interval,
            min_interval,
            next: None,
        }
    }

    /// 設定からクロックを作成
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.tick_interval(), config.min_tick_interval())
    }

    /// 次のtick境界までブロック
    pub fn wait(&mut self) {
        let now = Instant::now();
        let deadline = self.next.unwrap_or(now);
        if deadline > now {
            std::thread::sleep(deadline - now);
        }

        let now = Instant::now();
        let mut next = deadline + self.interval;
        let floor = now + self.min_interval;
        if next < floor {
            next = floor;
        }
        self.next = Some(next);
    }
}

/// 指数バックオフ付きリトライ管理
///
/// 成功でreset()、失敗でnext_delay()。Noneが返ったら上限到達。
pub struct Backoff {
    max_retries: u32,
    initial: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(max_retries: u32, initial: Duration) -> Self {
        Self {
            max_retries,
            initial,
            attempts: 0,
        }
    }

    pub fn from_config(config: &InferenceConfig) -> Self {
        Self::new(config.max_retries, config.retry_initial_delay())
    }

    /// 次の待機時間。上限到達ならNone
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_retries {
            return None;
        }
        let delay = self.initial * 2u32.saturating_pow(self.attempts);
        self.attempts += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// 再生ループ（ポリシー出力を入力へ変換する）
pub struct PlayLoop {
    frames: Box<dyn FramePort>,
    policy: Box<dyn PolicyPort>,
    dispatcher: Box<dyn DispatchPort>,
    gamepad: Option<Box<dyn GamepadPort>>,
    adapter: KmAdapter,
    governor: SafetyGovernor,
    clock: TickClock,
    backoff: Backoff,
    mode: ControllerMode,
    recording: Option<RecordingPipeline>,
    stop_flag: Arc<AtomicBool>,
    state: LoopState,
}

impl PlayLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        frames: Box<dyn FramePort>,
        policy: Box<dyn PolicyPort>,
        dispatcher: Box<dyn DispatchPort>,
        gamepad: Option<Box<dyn GamepadPort>>,
        adapter: KmAdapter,
        governor: SafetyGovernor,
        clock: TickClock,
        backoff: Backoff,
        mode: ControllerMode,
        recording: Option<RecordingPipeline>,
        stop_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            frames,
            policy,
            dispatcher,
            gamepad,
            adapter,
            governor,
            clock,
            backoff,
            mode,
            recording,
            stop_flag,
            state: LoopState::Idle,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// 停止条件が成立するまでループを回す
    pub fn run(&mut self) -> DomainResult<LoopSummary> {
        self.state = LoopState::Running;
        let mut ticks = 0u64;
        let mut dispatched = 0u64;
        let mut suppressed = 0u64;

        info!(mode = ?self.mode, dry_run = self.governor.is_dry_run(), "Control loop started");

        let reason = loop {
            self.clock.wait();

            if self.stop_flag.load(Ordering::Relaxed) {
                break HaltReason::StopRequested;
            }
            if self.governor.kill_switch_engaged() {
                break HaltReason::KillSwitch;
            }

            // フレーム取得と推論。失敗は有界リトライの対象で、
            // 古いアクションや部分的なアクションは決して流さない
            let (frame, gamepad_action) = match self.acquire_and_predict() {
                Ok(pair) => {
                    self.backoff.reset();
                    pair
                }
                Err(err) => match self.backoff.next_delay() {
                    Some(delay) => {
                        warn!(error = %err, delay_ms = delay.as_millis() as u64, "Tick failed, retrying");
                        std::thread::sleep(delay);
                        continue;
                    }
                    None => {
                        error!(error = %err, "Retry budget exhausted, halting");
                        break HaltReason::RetryExhausted(err.to_string());
                    }
                },
            };

            let km_action = self.adapter.adapt(&gamepad_action);

            match self.governor.guard(km_action.clone()) {
                Outcome::Halt => break HaltReason::KillSwitch,
                Outcome::Suppressed(reason) => {
                    debug!(?reason, tick = ticks, "Action suppressed");
                    suppressed += 1;
                }
                Outcome::Dispatch(action) => {
                    let result = match self.mode {
                        ControllerMode::Km => self.dispatcher.apply(&action),
                        ControllerMode::Gamepad => match &mut self.gamepad {
                            Some(port) => port.apply(&gamepad_action),
                            None => Err(DomainError::DispatchError(
                                "gamepad mode requires a virtual pad port".to_string(),
                            )),
                        },
                    };
                    if let Err(err) = result {
                        error!(error = %err, "Dispatch failed, halting");
                        break HaltReason::RetryExhausted(err.to_string());
                    }
                    dispatched += 1;
                }
            }

            // 記録はディスパッチ判定の後。ドライランでもログ行は書く
            if let Some(pipeline) = &mut self.recording {
                if pipeline.is_active() {
                    if let Err(err) = pipeline.record_tick(Some(&frame), &km_action, false) {
                        // 記録失敗は実行を打ち切るがループは止めない
                        error!(error = %err, "Recording failed, dropping pipeline");
                        self.recording = None;
                    }
                }
            }

            ticks += 1;
        };

        self.shutdown(&reason)?;
        self.state = LoopState::Halted;

        info!(?reason, ticks, dispatched, suppressed, "Control loop halted");
        Ok(LoopSummary {
            ticks,
            dispatched,
            suppressed,
            reason,
        })
    }

    fn acquire_and_predict(&mut self) -> DomainResult<(Frame, GamepadAction)> {
        let frame = measure_span!("capture_frame", self.frames.capture_frame())?;
        let action = measure_span!("predict", self.policy.predict(&frame))?;
        Ok((frame, action))
    }

    fn shutdown(&mut self, reason: &HaltReason) -> DomainResult<()> {
        // 停止時は押しっぱなしを残さない
        if let Err(err) = self.dispatcher.release_all() {
            warn!(error = %err, "Failed to release held inputs");
        }
        if let Some(pipeline) = self.recording.take() {
            pipeline.end_run()?;
        }
        debug!(?reason, "Shutdown complete");
        Ok(())
    }
}

/// 記録ループ（人間のデモンストレーションを記録する）
pub struct RecordLoop {
    raw_input: Box<dyn RawInputPort>,
    frames: Box<dyn FramePort>,
    pipeline: RecordingPipeline,
    clock: TickClock,
    backoff: Backoff,
    stop_file: PathBuf,
    stop_flag: Arc<AtomicBool>,
    warmup_countdown_sec: u32,
}

impl RecordLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        raw_input: Box<dyn RawInputPort>,
        frames: Box<dyn FramePort>,
        pipeline: RecordingPipeline,
        clock: TickClock,
        backoff: Backoff,
        stop_file: PathBuf,
        stop_flag: Arc<AtomicBool>,
        warmup_countdown_sec: u32,
    ) -> Self {
        Self {
            raw_input,
            frames,
            pipeline,
            clock,
            backoff,
            stop_file,
            stop_flag,
            warmup_countdown_sec,
        }
    }

    /// 記録が完了または停止されるまでループを回す
    pub fn run(mut self) -> DomainResult<(RunMeta, HaltReason)> {
        // 対象ウィンドウへ切り替える猶予
        for remaining in (1..=self.warmup_countdown_sec).rev() {
            info!(remaining, "Recording starts soon");
            std::thread::sleep(Duration::from_secs(1));
            if self.stop_flag.load(Ordering::Relaxed) {
                let meta = self.pipeline.end_run()?;
                return Ok((meta, HaltReason::StopRequested));
            }
        }
        info!("Recording now");

        let reason = loop {
            self.clock.wait();

            if self.stop_flag.load(Ordering::Relaxed) {
                break HaltReason::StopRequested;
            }
            if self.stop_file.exists() {
                break HaltReason::KillSwitch;
            }

            let sample = self.raw_input.sample()?;

            let frame = match self.frames.capture_frame() {
                Ok(frame) => {
                    self.backoff.reset();
                    frame
                }
                Err(err) => match self.backoff.next_delay() {
                    Some(delay) => {
                        warn!(error = %err, delay_ms = delay.as_millis() as u64, "Frame capture failed, retrying");
                        std::thread::sleep(delay);
                        continue;
                    }
                    None => break HaltReason::RetryExhausted(err.to_string()),
                },
            };

            let action = sample.to_km_action();
            self.pipeline
                .record_tick(Some(&frame), &action, !sample.degraded)?;

            if !self.pipeline.is_active() {
                break HaltReason::RecordingComplete;
            }
        };

        let meta = self.pipeline.end_run()?;
        info!(?reason, frames = meta.frame_count, "Record loop halted");
        Ok((meta, reason))
    }
}
