//! コア型定義
//!
//! ゲームパッド型アクション、キーボード/マウスアクション、
//! raw inputサンプル、プロセス情報など、全層で共有される型。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Instant;

/// ゲームパッドのボタン
///
/// 推論サーバーが返すアクションベクトルのボタン語彙。
/// トリガーはスカラー値のため別扱い（[`GamepadAction`]参照）。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum GamepadButton {
    South,
    East,
    West,
    North,
    LeftShoulder,
    RightShoulder,
    LeftThumb,
    RightThumb,
    Back,
    Start,
    Guide,
    DpadUp,
    DpadDown,
    DpadLeft,
    DpadRight,
}

/// アナログトリガーの識別子
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Left,
    Right,
}

/// ゲームパッド型アクション（1 tickぶん）
///
/// スティック成分は[-1, 1]、トリガーは[0, 1]。
/// 範囲外の値はコンストラクタでクランプされる。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GamepadAction {
    /// 押下中のボタン集合
    pub buttons: BTreeSet<GamepadButton>,
    /// 移動スティック (x, y)
    pub left_stick: (f32, f32),
    /// 視点スティック (x, y)
    pub right_stick: (f32, f32),
    /// 左トリガー [0, 1]
    pub left_trigger: f32,
    /// 右トリガー [0, 1]
    pub right_trigger: f32,
}

impl GamepadAction {
    /// 全成分をクランプした新しいアクションを作成
    pub fn new(
        buttons: BTreeSet<GamepadButton>,
        left_stick: (f32, f32),
        right_stick: (f32, f32),
        left_trigger: f32,
        right_trigger: f32,
    ) -> Self {
        Self {
            buttons,
            left_stick: (clamp_axis(left_stick.0), clamp_axis(left_stick.1)),
            right_stick: (clamp_axis(right_stick.0), clamp_axis(right_stick.1)),
            left_trigger: clamp_trigger(left_trigger),
            right_trigger: clamp_trigger(right_trigger),
        }
    }

    /// ニュートラル（何も押されていない）アクション
    pub fn neutral() -> Self {
        Self::default()
    }

    /// トリガー値を取得
    pub fn trigger(&self, trigger: Trigger) -> f32 {
        match trigger {
            Trigger::Left => self.left_trigger,
            Trigger::Right => self.right_trigger,
        }
    }
}

/// スティック成分を[-1, 1]にクランプ
pub fn clamp_axis(value: f32) -> f32 {
    value.clamp(-1.0, 1.0)
}

/// トリガー値を[0, 1]にクランプ
pub fn clamp_trigger(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// キーボードのキー
///
/// 判別値はWin32仮想キーコード（VK_*）。
/// serde表現は小文字のキー名（"w", "space", "pageup"等）で、
/// 設定ファイルのキーバインドとactions.jsonlの両方で使用される。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
#[repr(u16)]
pub enum Key {
    Backspace = 0x08,
    Tab = 0x09,
    Enter = 0x0D,
    Shift = 0x10,
    Ctrl = 0x11,
    Alt = 0x12,
    Pause = 0x13,
    CapsLock = 0x14,
    Esc = 0x1B,
    Space = 0x20,
    PageUp = 0x21,
    PageDown = 0x22,
    End = 0x23,
    Home = 0x24,
    Left = 0x25,
    Up = 0x26,
    Right = 0x27,
    Down = 0x28,
    Insert = 0x2D,
    Delete = 0x2E,
    #[serde(rename = "0")]
    D0 = 0x30,
    #[serde(rename = "1")]
    D1 = 0x31,
    #[serde(rename = "2")]
    D2 = 0x32,
    #[serde(rename = "3")]
    D3 = 0x33,
    #[serde(rename = "4")]
    D4 = 0x34,
    #[serde(rename = "5")]
    D5 = 0x35,
    #[serde(rename = "6")]
    D6 = 0x36,
    #[serde(rename = "7")]
    D7 = 0x37,
    #[serde(rename = "8")]
    D8 = 0x38,
    #[serde(rename = "9")]
    D9 = 0x39,
    A = 0x41,
    B = 0x42,
    C = 0x43,
    D = 0x44,
    E = 0x45,
    F = 0x46,
    G = 0x47,
    H = 0x48,
    I = 0x49,
    J = 0x4A,
    K = 0x4B,
    L = 0x4C,
    M = 0x4D,
    N = 0x4E,
    O = 0x4F,
    P = 0x50,
    Q = 0x51,
    R = 0x52,
    S = 0x53,
    T = 0x54,
    U = 0x55,
    V = 0x56,
    W = 0x57,
    X = 0x58,
    Y = 0x59,
    Z = 0x5A,
}

impl Key {
    /// 全キーの一覧（ポーリング型キャプチャ用）
    pub const ALL: [Key; 56] = [
        Key::Backspace,
        Key::Tab,
        Key::Enter,
        Key::Shift,
        Key::Ctrl,
        Key::Alt,
        Key::Pause,
        Key::CapsLock,
        Key::Esc,
        Key::Space,
        Key::PageUp,
        Key::PageDown,
        Key::End,
        Key::Home,
        Key::Left,
        Key::Up,
        Key::Right,
        Key::Down,
        Key::Insert,
        Key::Delete,
        Key::D0,
        Key::D1,
        Key::D2,
        Key::D3,
        Key::D4,
        Key::D5,
        Key::D6,
        Key::D7,
        Key::D8,
        Key::D9,
        Key::A,
        Key::B,
        Key::C,
        Key::D,
        Key::E,
        Key::F,
        Key::G,
        Key::H,
        Key::I,
        Key::J,
        Key::K,
        Key::L,
        Key::M,
        Key::N,
        Key::O,
        Key::P,
        Key::Q,
        Key::R,
        Key::S,
        Key::T,
        Key::U,
        Key::V,
        Key::W,
        Key::X,
        Key::Y,
        Key::Z,
    ];

    /// Win32仮想キーコードを取得
    pub fn to_vk_code(self) -> u16 {
        self as u16
    }

    /// 拡張キー（KEYEVENTF_EXTENDEDKEYが必要なキー）か判定
    pub fn is_extended(self) -> bool {
        matches!(
            self,
            Key::Up
                | Key::Down
                | Key::Left
                | Key::Right
                | Key::Insert
                | Key::Delete
                | Key::Home
                | Key::End
                | Key::PageUp
                | Key::PageDown
        )
    }

    /// 仮想キーコードからキーを復元（raw inputキーボードイベント用）
    ///
    /// 左右修飾キー（VK_LSHIFT等）は統合キーに丸める。
    pub fn from_vk_code(vk: u16) -> Option<Self> {
        Some(match vk {
            0x08 => Key::Backspace,
            0x09 => Key::Tab,
            0x0D => Key::Enter,
            0x10 | 0xA0 | 0xA1 => Key::Shift,
            0x11 | 0xA2 | 0xA3 => Key::Ctrl,
            0x12 | 0xA4 | 0xA5 => Key::Alt,
            0x13 => Key::Pause,
            0x14 => Key::CapsLock,
            0x1B => Key::Esc,
            0x20 => Key::Space,
            0x21 => Key::PageUp,
            0x22 => Key::PageDown,
            0x23 => Key::End,
            0x24 => Key::Home,
            0x25 => Key::Left,
            0x26 => Key::Up,
            0x27 => Key::Right,
            0x28 => Key::Down,
            0x2D => Key::Insert,
            0x2E => Key::Delete,
            0x30 => Key::D0,
            0x31 => Key::D1,
            0x32 => Key::D2,
            0x33 => Key::D3,
            0x34 => Key::D4,
            0x35 => Key::D5,
            0x36 => Key::D6,
            0x37 => Key::D7,
            0x38 => Key::D8,
            0x39 => Key::D9,
            0x41 => Key::A,
            0x42 => Key::B,
            0x43 => Key::C,
            0x44 => Key::D,
            0x45 => Key::E,
            0x46 => Key::F,
            0x47 => Key::G,
            0x48 => Key::H,
            0x49 => Key::I,
            0x4A => Key::J,
            0x4B => Key::K,
            0x4C => Key::L,
            0x4D => Key::M,
            0x4E => Key::N,
            0x4F => Key::O,
            0x50 => Key::P,
            0x51 => Key::Q,
            0x52 => Key::R,
            0x53 => Key::S,
            0x54 => Key::T,
            0x55 => Key::U,
            0x56 => Key::V,
            0x57 => Key::W,
            0x58 => Key::X,
            0x59 => Key::Y,
            0x5A => Key::Z,
            _ => return None,
        })
    }
}

/// マウスボタン
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    X1,
    X2,
}

/// キーボード/マウスアクション（1 tickぶんの希望状態）
///
/// keysとmouse_buttonsは「このtickで押下されているべき集合」を表す。
/// 押下/解放の差分計算はディスパッチアダプタ側で行う。
/// wheelはraw wheelキャプチャが有効な場合を除き常に0。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KmAction {
    /// 押下中のキー集合
    pub keys: BTreeSet<Key>,
    /// マウス相対移動量X（ピクセル）
    pub mouse_dx: i32,
    /// マウス相対移動量Y（ピクセル）
    pub mouse_dy: i32,
    /// 押下中のマウスボタン集合
    pub mouse_buttons: BTreeSet<MouseButton>,
    /// ホイール移動量
    pub wheel: i32,
}

impl KmAction {
    /// 何も押されていないニュートラルアクション
    pub fn neutral() -> Self {
        Self::default()
    }

    /// キーもボタンも移動量もない状態か判定
    pub fn is_neutral(&self) -> bool {
        self.keys.is_empty()
            && self.mouse_buttons.is_empty()
            && self.mouse_dx == 0
            && self.mouse_dy == 0
            && self.wheel == 0
    }
}

/// キーまたはマウスボタンへのバインド先
///
/// 設定ファイル上の表現は文字列。キーはキー名そのまま（"space"等）、
/// マウスボタンは"mouse_left"のようにプレフィックス付き。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Binding {
    Key(Key),
    Mouse(MouseButton),
}

impl Binding {
    /// 文字列表現からバインドを解析
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        if let Some(button) = value.strip_prefix("mouse_") {
            let button = match button {
                "left" => MouseButton::Left,
                "right" => MouseButton::Right,
                "middle" => MouseButton::Middle,
                "x1" => MouseButton::X1,
                "x2" => MouseButton::X2,
                _ => return None,
            };
            return Some(Binding::Mouse(button));
        }
        serde_json::from_value(serde_json::Value::String(value))
            .ok()
            .map(Binding::Key)
    }
}

impl Serialize for Binding {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Binding::Key(key) => key.serialize(serializer),
            Binding::Mouse(button) => {
                let name = match button {
                    MouseButton::Left => "mouse_left",
                    MouseButton::Right => "mouse_right",
                    MouseButton::Middle => "mouse_middle",
                    MouseButton::X1 => "mouse_x1",
                    MouseButton::X2 => "mouse_x2",
                };
                serializer.serialize_str(name)
            }
        }
    }
}

impl<'de> Deserialize<'de> for Binding {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Binding::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown binding: {raw}")))
    }
}

impl JsonSchema for Binding {
    fn schema_name() -> std::borrow::Cow<'static, str> {
        "Binding".into()
    }

    fn json_schema(_generator: &mut schemars::SchemaGenerator) -> schemars::Schema {
        schemars::json_schema!({
            "type": "string",
            "description": "キー名（例: \"space\"）または\"mouse_\"プレフィックス付きマウスボタン名（例: \"mouse_left\"）"
        })
    }
}

/// 入力コントローラのモード
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ControllerMode {
    /// 仮想ゲームパッドへのパススルー
    Gamepad,
    /// ゲームパッド→キーボード/マウス変換
    #[default]
    Km,
}

/// raw inputのtickサンプル（前回sample()以降のイベントを合算）
///
/// フックスレッドが蓄積したイベントをsample()が一括で排出した結果。
/// dx/dy/wheelは合算値、keys/mouse_buttonsはtick境界時点での押下集合。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawSample {
    /// ポインタ相対移動量X（合算）
    pub dx: i32,
    /// ポインタ相対移動量Y（合算）
    pub dy: i32,
    /// ホイール移動量（合算）
    pub wheel: i32,
    /// 押下中のキー集合
    pub keys: BTreeSet<Key>,
    /// 押下中のマウスボタン集合
    pub mouse_buttons: BTreeSet<MouseButton>,
    /// カーソルポーリングへの縮退モードで取得されたか
    pub degraded: bool,
}

impl RawSample {
    /// サンプルをKmActionに変換（記録用）
    pub fn to_km_action(&self) -> KmAction {
        KmAction {
            keys: self.keys.clone(),
            mouse_dx: self.dx,
            mouse_dy: self.dy,
            mouse_buttons: self.mouse_buttons.clone(),
            wheel: self.wheel,
        }
    }
}

/// 列挙されたプロセスの情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// プロセスID
    pub pid: u32,
    /// 実行ファイル名（例: "celeste.exe"）
    pub name: String,
    /// 可視トップレベルウィンドウのタイトル一覧
    pub titles: Vec<String>,
}

impl ProcessInfo {
    /// 可視ウィンドウを1つ以上持つか判定
    ///
    /// ウィンドウを持たないプロセスはフォアグラウンド入力を
    /// 受け取れないため、選択時に再確認が必要。
    pub fn has_window(&self) -> bool {
        !self.titles.is_empty()
    }
}

/// キャプチャされたフレームデータ
#[derive(Debug, Clone)]
pub struct Frame {
    /// フレーム取得時刻
    pub timestamp: Instant,
    /// フレーム画像データ（RGB8、連続メモリ）
    pub data: Vec<u8>,
    /// 画像の幅
    pub width: u32,
    /// 画像の高さ
    pub height: u32,
}

impl Frame {
    /// 新しいフレームを作成
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            timestamp: Instant::now(),
            data,
            width,
            height,
        }
    }
}

/// actions.jsonlの1行に対応するレコード
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// tickインデックス（0始まり、欠番なし）
    pub tick: u64,
    /// UNIXタイムスタンプ（秒）
    pub timestamp: f64,
    /// アクション本体（keysなどのフィールドはフラットに展開）
    #[serde(flatten)]
    pub action: KmAction,
    /// raw inputキャプチャ由来か（falseはカーソルポーリング縮退）
    pub raw: bool,
}

/// meta.jsonに書き出される実行メタデータ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    /// 実行ID（出力ディレクトリ名と一致）
    pub run_id: String,
    /// 記録FPS
    pub fps: u32,
    /// 対象プロセス名
    pub process: String,
    /// コントローラモード
    pub controller_mode: ControllerMode,
    /// raw mouseキャプチャが有効だったか
    pub raw_mouse: bool,
    /// フォーカス限定キャプチャが有効だったか
    pub focus_only: bool,
    /// 確定フレーム数（end_run時に最終値へ更新）
    pub frame_count: u64,
    /// 実記録時間（秒）
    pub duration_sec: f64,
    /// 記録開始時刻（UNIX秒）
    pub created_at: f64,
}
