//! 設定管理
//!
//! TOML設定ファイルの読み込みとDomain型への変換。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::types::{Binding, ControllerMode, GamepadButton, Key, MouseButton, Trigger};

/// アプリケーション設定のルート構造
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AppConfig {
    /// 推論サーバー設定
    pub inference: InferenceConfig,
    /// 対象プロセス設定
    pub target: TargetConfig,
    /// コントローラ設定
    pub controller: ControllerConfig,
    /// ゲームパッド→KM変換設定
    pub adapter: AdapterConfig,
    /// 安全制約設定
    pub safety: SafetyConfig,
    /// 入力キャプチャ/tick設定
    pub capture: CaptureConfig,
    /// 記録設定
    pub recording: RecordingConfig,
    /// プロセスピッカー設定
    pub picker: PickerConfig,
}

/// 推論サーバー設定
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct InferenceConfig {
    /// 推論サーバーのホスト
    ///
    /// デフォルト: "127.0.0.1"
    pub host: String,

    /// 推論サーバーのポート
    ///
    /// デフォルト: 8793
    pub port: u16,

    /// リクエストタイムアウト（ミリ秒）
    ///
    /// デフォルト: 1000ms
    pub timeout_ms: u64,

    /// 連続失敗時のリトライ回数上限
    ///
    /// 超過したらループを停止する
    /// デフォルト: 3回
    pub max_retries: u32,

    /// リトライの初期待機時間（ミリ秒、指数バックオフの起点）
    ///
    /// デフォルト: 100ms
    pub retry_initial_delay_ms: u64,

    /// ボタンスコアの押下閾値
    ///
    /// デフォルト: 0.5
    pub button_threshold: f32,
}

impl InferenceConfig {
    /// デフォルトのホスト
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    /// デフォルトのポート
    pub const DEFAULT_PORT: u16 = 8793;
    /// デフォルトのタイムアウト（ミリ秒）
    pub const DEFAULT_TIMEOUT_MS: u64 = 1000;
    /// デフォルトのリトライ回数上限
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    /// デフォルトのリトライ初期遅延（ミリ秒）
    pub const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 100;
    /// デフォルトのボタン押下閾値
    pub const DEFAULT_BUTTON_THRESHOLD: f32 = 0.5;

    /// 推論エンドポイントURL
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}/predict", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_initial_delay(&self) -> Duration {
        Duration::from_millis(self.retry_initial_delay_ms)
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            host: Self::DEFAULT_HOST.to_string(),
            port: Self::DEFAULT_PORT,
            timeout_ms: Self::DEFAULT_TIMEOUT_MS,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            retry_initial_delay_ms: Self::DEFAULT_RETRY_INITIAL_DELAY_MS,
            button_threshold: Self::DEFAULT_BUTTON_THRESHOLD,
        }
    }
}

/// 対象プロセス設定
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TargetConfig {
    /// 対象プロセス名または"pid:<n>"形式のPID指定
    ///
    /// 空文字列の場合は起動時にピッカーで対話選択
    pub process: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            process: String::new(),
        }
    }
}

/// コントローラ設定
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ControllerConfig {
    /// 入力モード
    ///
    /// 選択肢: "km" (キーボード/マウス変換), "gamepad" (仮想パッドへパススルー)
    /// デフォルト: "km"
    pub mode: ControllerMode,
}

/// ゲームパッド→KM変換設定
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AdapterConfig {
    /// スティック各軸成分のデッドゾーン
    ///
    /// 絶対値がこの値以下の成分は無視される
    /// デフォルト: 0.2
    pub deadzone: f32,

    /// 視点スティックのマウス感度（ピクセル/tick per 軸値1.0）
    ///
    /// デフォルト: 15.0
    pub mouse_sensitivity: f32,

    /// 1 tickあたりのマウス移動量上限（ピクセル）
    ///
    /// デフォルト: 50
    pub mouse_max: i32,

    /// トリガーの押下閾値（この値以上で押下、境界含む）
    ///
    /// デフォルト: 0.1
    pub trigger_threshold: f32,

    /// 移動スティック前方向のキー
    pub key_forward: Key,
    /// 移動スティック後方向のキー
    pub key_back: Key,
    /// 移動スティック左方向のキー
    pub key_left: Key,
    /// 移動スティック右方向のキー
    pub key_right: Key,

    /// ボタンのバインド（未指定のボタンは無視される）
    pub buttons: BTreeMap<GamepadButton, Binding>,

    /// トリガーのバインド
    pub triggers: BTreeMap<Trigger, Binding>,
}

impl AdapterConfig {
    /// デフォルトのデッドゾーン
    pub const DEFAULT_DEADZONE: f32 = 0.2;
    /// デフォルトのマウス感度
    pub const DEFAULT_MOUSE_SENSITIVITY: f32 = 15.0;
    /// デフォルトのマウス移動量上限
    pub const DEFAULT_MOUSE_MAX: i32 = 50;
    /// デフォルトのトリガー閾値
    pub const DEFAULT_TRIGGER_THRESHOLD: f32 = 0.1;

    /// デフォルトのボタンバインド
    pub fn default_buttons() -> BTreeMap<GamepadButton, Binding> {
        BTreeMap::from([
            (GamepadButton::South, Binding::Key(Key::Space)),
            (GamepadButton::East, Binding::Key(Key::E)),
            (GamepadButton::West, Binding::Key(Key::Q)),
            (GamepadButton::North, Binding::Key(Key::R)),
            (GamepadButton::LeftShoulder, Binding::Key(Key::Shift)),
            (GamepadButton::RightShoulder, Binding::Key(Key::Ctrl)),
            (GamepadButton::LeftThumb, Binding::Key(Key::C)),
            (GamepadButton::RightThumb, Binding::Key(Key::V)),
            (GamepadButton::Back, Binding::Key(Key::Tab)),
            (GamepadButton::Start, Binding::Key(Key::Esc)),
            (GamepadButton::DpadUp, Binding::Key(Key::Up)),
            (GamepadButton::DpadDown, Binding::Key(Key::Down)),
            (GamepadButton::DpadLeft, Binding::Key(Key::Left)),
            (GamepadButton::DpadRight, Binding::Key(Key::Right)),
        ])
    }

    /// デフォルトのトリガーバインド
    ///
    /// 左トリガー=右クリック（ADS）、右トリガー=左クリック（射撃）
    pub fn default_triggers() -> BTreeMap<Trigger, Binding> {
        BTreeMap::from([
            (Trigger::Left, Binding::Mouse(MouseButton::Right)),
            (Trigger::Right, Binding::Mouse(MouseButton::Left)),
        ])
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            deadzone: Self::DEFAULT_DEADZONE,
            mouse_sensitivity: Self::DEFAULT_MOUSE_SENSITIVITY,
            mouse_max: Self::DEFAULT_MOUSE_MAX,
            trigger_threshold: Self::DEFAULT_TRIGGER_THRESHOLD,
            key_forward: Key::W,
            key_back: Key::S,
            key_left: Key::A,
            key_right: Key::D,
            buttons: Self::default_buttons(),
            triggers: Self::default_triggers(),
        }
    }
}

/// 安全制約設定
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SafetyConfig {
    /// ドライランモード（実際の入力注入を行わない）
    ///
    /// デフォルト: true（明示的に無効化するまで注入しない）
    pub dry_run: bool,

    /// キルスイッチファイルのパス
    ///
    /// このファイルが存在したら次のtickまでに停止する
    /// デフォルト: "STOP"
    pub stop_file: String,

    /// トークンバケットの容量（バーストで許容する最大ディスパッチ数）
    ///
    /// デフォルト: 30
    pub rate_capacity: u32,

    /// トークンの補充レート（個/秒）
    ///
    /// デフォルト: 30.0
    pub rate_refill_per_sec: f64,

    /// タイムディレーション機能のオプトイン
    ///
    /// falseのまま機能を要求するとエラーで停止する
    /// デフォルト: false
    pub allow_time_dilation: bool,

    /// タイムディレーションの速度係数
    ///
    /// デフォルト: 1.0
    pub time_dilation_factor: f64,
}

impl SafetyConfig {
    /// デフォルトのキルスイッチファイル名
    pub const DEFAULT_STOP_FILE: &'static str = "STOP";
    /// デフォルトのバケット容量
    pub const DEFAULT_RATE_CAPACITY: u32 = 30;
    /// デフォルトの補充レート（個/秒）
    pub const DEFAULT_RATE_REFILL_PER_SEC: f64 = 30.0;
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            stop_file: Self::DEFAULT_STOP_FILE.to_string(),
            rate_capacity: Self::DEFAULT_RATE_CAPACITY,
            rate_refill_per_sec: Self::DEFAULT_RATE_REFILL_PER_SEC,
            allow_time_dilation: false,
            time_dilation_factor: 1.0,
        }
    }
}

/// 入力キャプチャ/tick設定
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CaptureConfig {
    /// tickレート（Hz）
    ///
    /// デフォルト: 30
    pub fps: u32,

    /// tick間隔の下限（ミリ秒）
    ///
    /// 処理遅延があっても間隔はこれ未満に圧縮されない
    /// デフォルト: 1ms
    pub min_tick_interval_ms: u64,

    /// raw inputフックによるマウスキャプチャを使用するか
    ///
    /// falseの場合はカーソルポーリングへ縮退
    /// デフォルト: true
    pub raw_mouse: bool,

    /// 対象プロセスがフォアグラウンドの間だけイベントを記録するか
    ///
    /// デフォルト: true
    pub focus_only: bool,
}

impl CaptureConfig {
    /// デフォルトのtickレート
    pub const DEFAULT_FPS: u32 = 30;
    /// デフォルトのtick間隔下限（ミリ秒）
    pub const DEFAULT_MIN_TICK_INTERVAL_MS: u64 = 1;

    /// tick間隔
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }

    pub fn min_tick_interval(&self) -> Duration {
        Duration::from_millis(self.min_tick_interval_ms)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps: Self::DEFAULT_FPS,
            min_tick_interval_ms: Self::DEFAULT_MIN_TICK_INTERVAL_MS,
            raw_mouse: true,
            focus_only: true,
        }
    }
}

/// 記録設定
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RecordingConfig {
    /// 記録出力のルートディレクトリ
    ///
    /// 実行ごとに<out_dir>/<run_id>/が作成される
    /// デフォルト: "runs"
    pub out_dir: String,

    /// フレーム数の上限（0で無制限）
    ///
    /// 到達したら記録を停止する（ループは継続）
    /// デフォルト: 0
    pub max_frames: u64,

    /// 記録時間の上限（秒、0で無制限）
    ///
    /// デフォルト: 0
    pub max_duration_sec: u64,

    /// フレームPNGを保存するか
    ///
    /// デフォルト: true
    pub save_frames: bool,

    /// 記録開始前のカウントダウン（秒）
    ///
    /// デフォルト: 3
    pub warmup_countdown_sec: u32,
}

impl RecordingConfig {
    /// デフォルトの出力ディレクトリ
    pub const DEFAULT_OUT_DIR: &'static str = "runs";
    /// デフォルトのウォームアップ秒数
    pub const DEFAULT_WARMUP_COUNTDOWN_SEC: u32 = 3;
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            out_dir: Self::DEFAULT_OUT_DIR.to_string(),
            max_frames: 0,
            max_duration_sec: 0,
            save_frames: true,
            warmup_countdown_sec: Self::DEFAULT_WARMUP_COUNTDOWN_SEC,
        }
    }
}

/// プロセスピッカー設定
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PickerConfig {
    /// 起動時に設定済みプロセスが見つからなければピッカーを開くか
    ///
    /// デフォルト: true
    pub auto_open: bool,

    /// ウィンドウを持たないプロセスも一覧に含めるか
    ///
    /// デフォルト: false
    pub show_all: bool,

    /// キーストロークごとに再フィルタするライブモードを使用するか
    ///
    /// デフォルト: true
    pub live: bool,

    /// 一覧表示の最大行数
    ///
    /// デフォルト: 20
    pub max_rows: usize,
}

impl PickerConfig {
    /// デフォルトの最大表示行数
    pub const DEFAULT_MAX_ROWS: usize = 20;
}

impl Default for PickerConfig {
    fn default() -> Self {
        Self {
            auto_open: true,
            show_all: false,
            live: true,
            max_rows: Self::DEFAULT_MAX_ROWS,
        }
    }
}

impl AppConfig {
    /// TOMLファイルから設定を読み込む
    pub fn from_file<P: AsRef<Path>>(path: P) -> DomainResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DomainError::Configuration(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content)
            .map_err(|e| DomainError::Configuration(format!("Failed to parse config file: {}", e)))
    }

    /// デフォルト設定をTOMLファイルに書き出す
    #[allow(dead_code)]
    pub fn write_default<P: AsRef<Path>>(path: P) -> DomainResult<()> {
        let config = Self::default();
        let content = toml::to_string_pretty(&config).map_err(|e| {
            DomainError::Configuration(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path, content)
            .map_err(|e| DomainError::Configuration(format!("Failed to write config file: {}", e)))
    }

    /// 設定の妥当性を検証
    pub fn validate(&self) -> DomainResult<()> {
        if !(0.0..1.0).contains(&self.adapter.deadzone) {
            return Err(DomainError::Configuration(
                "Adapter deadzone must be in [0, 1)".to_string(),
            ));
        }
        if self.adapter.mouse_sensitivity <= 0.0 {
            return Err(DomainError::Configuration(
                "Mouse sensitivity must be positive".to_string(),
            ));
        }
        if self.adapter.mouse_max <= 0 {
            return Err(DomainError::Configuration(
                "Mouse max delta must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.adapter.trigger_threshold) {
            return Err(DomainError::Configuration(
                "Trigger threshold must be in [0, 1]".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.inference.button_threshold) {
            return Err(DomainError::Configuration(
                "Button threshold must be in [0, 1]".to_string(),
            ));
        }
        if self.inference.timeout_ms == 0 {
            return Err(DomainError::Configuration(
                "Inference timeout must be greater than 0".to_string(),
            ));
        }

        if self.safety.rate_capacity == 0 {
            return Err(DomainError::Configuration(
                "Rate capacity must be greater than 0".to_string(),
            ));
        }
        if self.safety.rate_refill_per_sec <= 0.0 {
            return Err(DomainError::Configuration(
                "Rate refill must be positive".to_string(),
            ));
        }
        if self.safety.stop_file.is_empty() {
            return Err(DomainError::Configuration(
                "Stop file path must not be empty".to_string(),
            ));
        }
        if self.safety.time_dilation_factor <= 0.0 {
            return Err(DomainError::Configuration(
                "Time dilation factor must be positive".to_string(),
            ));
        }

        if self.capture.fps == 0 {
            return Err(DomainError::Configuration(
                "Capture fps must be greater than 0".to_string(),
            ));
        }

        if self.recording.out_dir.is_empty() {
            return Err(DomainError::Configuration(
                "Recording out_dir must not be empty".to_string(),
            ));
        }

        if self.picker.max_rows == 0 {
            return Err(DomainError::Configuration(
                "Picker max_rows must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.inference.port, 8793);
        assert_eq!(config.capture.fps, 30);
        assert!(config.safety.dry_run);
        assert!(!config.safety.allow_time_dilation);
        assert_eq!(config.adapter.mouse_max, 50);
        assert_eq!(
            config.adapter.buttons.get(&GamepadButton::South),
            Some(&Binding::Key(Key::Space))
        );
        assert_eq!(
            config.adapter.triggers.get(&Trigger::Right),
            Some(&Binding::Mouse(MouseButton::Left))
        );
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_ok());

        // 不正なデッドゾーン
        config.adapter.deadzone = 1.5;
        assert!(config.validate().is_err());
        config.adapter.deadzone = 0.2;

        // 不正なレート設定
        config.safety.rate_capacity = 0;
        assert!(config.validate().is_err());
        config.safety.rate_capacity = 30;

        // 空のキルスイッチパス
        config.safety.stop_file = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml = r#"
            [inference]
            port = 9000

            [safety]
            dry_run = false
        "#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.inference.port, 9000);
        assert_eq!(config.inference.host, "127.0.0.1");
        assert!(!config.safety.dry_run);
        assert_eq!(config.capture.fps, 30);
    }

    #[test]
    fn test_binding_override_in_toml() {
        let toml = r#"
            [adapter.buttons]
            south = "space"
            east = "mouse_middle"

            [adapter.triggers]
            right = "mouse_left"
        "#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(
            config.adapter.buttons.get(&GamepadButton::East),
            Some(&Binding::Mouse(MouseButton::Middle))
        );
        // テーブルを明示した場合は全置換（デフォルトとのマージはしない）
        assert_eq!(config.adapter.buttons.len(), 2);
    }

    #[test]
    fn test_endpoint_url() {
        let config = InferenceConfig::default();
        assert_eq!(config.endpoint(), "http://127.0.0.1:8793/predict");
    }

    #[test]
    fn test_roundtrip_default_toml() {
        let config = AppConfig::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.adapter.buttons.len(), config.adapter.buttons.len());
        assert_eq!(parsed.safety.stop_file, config.safety.stop_file);
    }

    #[test]
    fn test_tick_interval() {
        let capture = CaptureConfig::default();
        let interval = capture.tick_interval();
        assert!((interval.as_secs_f64() - 1.0 / 30.0).abs() < 1e-9);
    }
}
