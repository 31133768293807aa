//! エラー型定義
//!
//! アプリケーション全体で使用されるエラー型。
//! thiserrorクレートを使用して構造化されたエラーを定義します。

use thiserror::Error;

/// ドメインエラー
#[derive(Error, Debug)]
pub enum DomainError {
    /// 対象プロセスが見つからない
    #[error("Target process not found: {0}")]
    TargetNotFound(String),

    /// 対象プロセスが可視ウィンドウを持たない
    #[error("Process has no visible window: {name} (pid={pid})")]
    NoVisibleWindow { name: String, pid: u32 },

    /// raw inputフックの登録に失敗
    #[error("Raw input hook failure: {0}")]
    CaptureHookFailure(String),

    /// 推論サーバーとの通信エラー
    #[error("Inference request failed: {0}")]
    InferenceError(String),

    /// 推論サーバーの応答が不正
    #[error("Inference response malformed: {0}")]
    InferenceMalformed(String),

    /// 処理タイムアウト
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// 危険機能の設定不備（オプトインなしで要求された）
    #[error("Unsafe feature requested without explicit opt-in: {0}")]
    UnsafeFeatureMisconfigured(String),

    /// 記録先のI/Oエラー
    #[error("Recording I/O error: {0}")]
    RecordingIo(#[from] std::io::Error),

    /// フレームのエンコード失敗
    #[error("Frame encode error: {0}")]
    FrameEncode(String),

    /// 入力ディスパッチエラー
    #[error("Input dispatch error: {0}")]
    DispatchError(String),

    /// 設定エラー
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// その他のエラー
    #[error("Unexpected error: {0}")]
    Other(String),
}

/// Domain Result型エイリアス
pub type DomainResult<T> = Result<T, DomainError>;
