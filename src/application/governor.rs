//! 安全ガバナー（Application層）
//!
//! ディスパッチ直前の最終関門。キルスイッチ、ドライラン、
//! トークンバケットによるレート制限をこの順で適用する。
//! 判定はアクション単位の全か無か（部分的なディスパッチはしない）。

use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, warn};

use crate::domain::config::SafetyConfig;
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::types::KmAction;

/// ガバナーの判定結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// アクションを注入してよい
    Dispatch(KmAction),
    /// アクションを破棄（理由付き）
    Suppressed(SuppressReason),
    /// キルスイッチ検出。ループは即座に停止すべき
    Halt,
}

/// 抑制理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// ドライランモード
    DryRun,
    /// トークンバケット枯渇
    RateLimited,
}

/// トークンバケット型レートリミッタ
///
/// 容量までのバーストを許容し、一定レートでトークンを補充する。
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// 満杯状態のバケットを作成
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: capacity as f64,
            tokens: capacity as f64,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    /// トークンを1つ取得（取得できたらtrue）
    pub fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// 経過時間ぶんのトークンを補充
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
    }

    /// 現在のトークン残量（切り捨て）
    pub fn available(&mut self) -> u32 {
        self.refill();
        self.tokens as u32
    }
}

/// 安全ガバナー
pub struct SafetyGovernor {
    dry_run: bool,
    stop_file: PathBuf,
    bucket: TokenBucket,
}

impl SafetyGovernor {
    /// 設定からガバナーを作成
    pub fn new(config: &SafetyConfig) -> Self {
        Self {
            dry_run: config.dry_run,
            stop_file: PathBuf::from(&config.stop_file),
            bucket: TokenBucket::new(config.rate_capacity, config.rate_refill_per_sec),
        }
    }

    /// アクションを判定
    ///
    /// 呼び出しごとに必ずキルスイッチを確認する。
    /// ドライラン抑制はトークンを消費しない。
    pub fn guard(&mut self, action: KmAction) -> Outcome {
        if self.kill_switch_engaged() {
            warn!(stop_file = %self.stop_file.display(), "Kill switch detected, halting");
            return Outcome::Halt;
        }

        if self.dry_run {
            debug!("Action suppressed (dry run)");
            return Outcome::Suppressed(SuppressReason::DryRun);
        }

        if !self.bucket.try_acquire() {
            debug!("Action suppressed (rate limited)");
            return Outcome::Suppressed(SuppressReason::RateLimited);
        }

        Outcome::Dispatch(action)
    }

    /// キルスイッチファイルの存在確認
    pub fn kill_switch_engaged(&self) -> bool {
        self.stop_file.exists()
    }

    /// ドライランモードか
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

/// タイムディレーション機能のゲート
///
/// 明示的なオプトインなしに取得を試みるとエラーで失敗する。
/// サイレントな無効化はしない（設定ミスを隠さないため）。
pub struct TimeDilationGate;

/// ゲートを通過した証となるハンドル
///
/// 実際のプロセスアタッチは外部コラボレータの責務。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeDilationHandle {
    /// 要求された速度係数
    pub factor: f64,
}

impl TimeDilationGate {
    /// 機能の取得を試みる
    pub fn acquire(config: &SafetyConfig) -> DomainResult<TimeDilationHandle> {
        if !config.allow_time_dilation {
            return Err(DomainError::UnsafeFeatureMisconfigured(
                "time dilation requires safety.allow_time_dilation = true".to_string(),
            ));
        }
        warn!(
            factor = config.time_dilation_factor,
            "Time dilation enabled by explicit opt-in"
        );
        Ok(TimeDilationHandle {
            factor: config.time_dilation_factor,
        })
    }
}
