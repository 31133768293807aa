//! ポート定義（Domain層のインターフェース）
//!
//! Infrastructure層が実装すべきトレイト群。
//! Application層はこれらのトレイトにのみ依存し、
//! Win32やHTTPの具体実装からは隔離される。

use crate::domain::error::DomainResult;
use crate::domain::types::{Frame, GamepadAction, KmAction, ProcessInfo, RawSample};

/// フレーム取得ポート
///
/// フレーム供給元（画面キャプチャ等）の実装は外部コラボレータの責務。
/// 本体はこのポートとモック実装のみを提供する。
pub trait FramePort: Send {
    /// 次のフレームを取得（ブロッキング）
    fn capture_frame(&mut self) -> DomainResult<Frame>;
}

/// 推論クライアントポート
///
/// エンコード済みフレームをポリシーサーバーへ送信し、
/// ゲームパッド型アクションを受け取る。
pub trait PolicyPort: Send {
    /// フレームに対するアクションを推論（タイムアウトは実装側で保証）
    fn predict(&mut self, frame: &Frame) -> DomainResult<GamepadAction>;
}

/// raw inputキャプチャポート
///
/// 前回sample()以降に蓄積されたイベントを合算して返す。
/// イベントは高々一度だけ消費される（sample()が蓄積をクリアする）。
pub trait RawInputPort: Send {
    /// 蓄積イベントを排出してサンプルを取得
    fn sample(&mut self) -> DomainResult<RawSample>;

    /// 縮退モード（カーソルポーリング）で動作中か
    fn is_degraded(&self) -> bool {
        false
    }
}

/// キーボード/マウスディスパッチポート
///
/// 実装は希望状態と現在押下中の集合の差分から
/// press/releaseイベント列を合成して注入する。
pub trait DispatchPort: Send {
    /// アクションを注入
    fn apply(&mut self, action: &KmAction) -> DomainResult<()>;

    /// 押下中の全キー/ボタンを解放（停止時の後始末）
    fn release_all(&mut self) -> DomainResult<()>;
}

/// 仮想ゲームパッドポート（パススルーモード用）
pub trait GamepadPort: Send {
    /// ゲームパッド状態をそのまま仮想デバイスへ反映
    fn apply(&mut self, action: &GamepadAction) -> DomainResult<()>;
}

/// プロセス照会ポート
pub trait ProcessQueryPort {
    /// 実行中プロセスを列挙（ウィンドウタイトル付き）
    fn enumerate(&self) -> DomainResult<Vec<ProcessInfo>>;

    /// 現在フォアグラウンドウィンドウを所有するプロセスID
    fn foreground_pid(&self) -> Option<u32>;
}
