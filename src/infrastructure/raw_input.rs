//! raw inputキャプチャ（Infrastructure層、Windows専用）
//!
//! メッセージ専用ウィンドウを持つ専用スレッドで
//! RegisterRawInputDevices(RIDEV_INPUTSINK)を登録し、
//! WM_INPUTイベントをチャネル経由でループ側へ送る。
//! sample()が前回以降のイベントを一括排出して合算する。
//!
//! フック登録失敗は起動時の致命エラー。明示的な縮退先として
//! カーソルポーリング実装[`CursorPollCapture`]を提供する。

use std::collections::BTreeSet;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use tracing::{debug, info, warn};

use windows::Win32::Foundation::{HWND, LPARAM, WPARAM};
use windows::Win32::UI::Input::KeyboardAndMouse::GetAsyncKeyState;
use windows::Win32::UI::Input::{
    GetRawInputData, RegisterRawInputDevices, HRAWINPUT, RAWINPUT, RAWINPUTDEVICE,
    RAWINPUTHEADER, RID_INPUT, RIDEV_INPUTSINK, RIM_TYPEKEYBOARD, RIM_TYPEMOUSE,
};
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DestroyWindow, DispatchMessageW, GetCursorPos, GetForegroundWindow,
    GetMessageW, GetWindowThreadProcessId, PostMessageW, TranslateMessage, HWND_MESSAGE, MSG,
    WINDOW_EX_STYLE, WINDOW_STYLE, WM_CLOSE, WM_INPUT,
};
use windows::core::w;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::ports::RawInputPort;
use crate::domain::types::{Key, MouseButton, RawSample};

// HID usage (generic desktop page)
const HID_USAGE_PAGE_GENERIC: u16 = 0x01;
const HID_USAGE_GENERIC_MOUSE: u16 = 0x02;
const HID_USAGE_GENERIC_KEYBOARD: u16 = 0x06;

// RAWMOUSE usButtonFlags
const BTN_LEFT_DOWN: u16 = 0x0001;
const BTN_LEFT_UP: u16 = 0x0002;
const BTN_RIGHT_DOWN: u16 = 0x0004;
const BTN_RIGHT_UP: u16 = 0x0008;
const BTN_MIDDLE_DOWN: u16 = 0x0010;
const BTN_MIDDLE_UP: u16 = 0x0020;
const BTN_X1_DOWN: u16 = 0x0040;
const BTN_X1_UP: u16 = 0x0080;
const BTN_X2_DOWN: u16 = 0x0100;
const BTN_X2_UP: u16 = 0x0200;
const BTN_WHEEL: u16 = 0x0400;

const MOUSE_MOVE_ABSOLUTE: u16 = 0x0001;
const RI_KEY_BREAK: u16 = 0x0001;
const WHEEL_DELTA: i32 = 120;

/// フックスレッドからループへ流れる単一イベント
#[derive(Debug, Clone, Copy)]
enum RawEvent {
    Move { dx: i32, dy: i32 },
    Wheel(i32),
    Key { key: Key, down: bool },
    Button { button: MouseButton, down: bool },
}

/// raw inputフックによるキャプチャ
pub struct RawInputCapture {
    events: Receiver<RawEvent>,
    held_keys: BTreeSet<Key>,
    held_buttons: BTreeSet<MouseButton>,
    hwnd: isize,
    thread: Option<JoinHandle<()>>,
}

impl RawInputCapture {
    /// フックを登録してキャプチャを開始
    ///
    /// `focus_pid`を指定すると、そのプロセスがフォアグラウンドの間の
    /// イベントだけを蓄積する。登録失敗は[`DomainError::CaptureHookFailure`]。
    pub fn new(focus_pid: Option<u32>) -> DomainResult<Self> {
        let (ready_tx, ready_rx) = bounded::<Result<isize, String>>(1);
        let (event_tx, event_rx) = unbounded::<RawEvent>();

        let thread = std::thread::Builder::new()
            .name("raw-input".to_string())
            .spawn(move || hook_thread(ready_tx, event_tx, focus_pid))
            .map_err(|e| DomainError::CaptureHookFailure(e.to_string()))?;

        let hwnd = ready_rx
            .recv()
            .map_err(|_| DomainError::CaptureHookFailure("hook thread died".to_string()))?
            .map_err(DomainError::CaptureHookFailure)?;

        info!(focus_pid, "Raw input hook registered");
        Ok(Self {
            events: event_rx,
            held_keys: BTreeSet::new(),
            held_buttons: BTreeSet::new(),
            hwnd,
            thread: Some(thread),
        })
    }
}

impl RawInputPort for RawInputCapture {
    fn sample(&mut self) -> DomainResult<RawSample> {
        let mut sample = RawSample {
            keys: self.held_keys.clone(),
            mouse_buttons: self.held_buttons.clone(),
            ..RawSample::default()
        };

        loop {
            match self.events.try_recv() {
                Ok(RawEvent::Move { dx, dy }) => {
                    sample.dx += dx;
                    sample.dy += dy;
                }
                Ok(RawEvent::Wheel(delta)) => sample.wheel += delta,
                Ok(RawEvent::Key { key, down }) => {
                    if down {
                        sample.keys.insert(key);
                    } else {
                        sample.keys.remove(&key);
                    }
                }
                Ok(RawEvent::Button { button, down }) => {
                    if down {
                        sample.mouse_buttons.insert(button);
                    } else {
                        sample.mouse_buttons.remove(&button);
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return Err(DomainError::CaptureHookFailure(
                        "hook thread terminated".to_string(),
                    ))
                }
            }
        }

        // 押下集合はtick境界時点の正味状態として持ち越す
        self.held_keys = sample.keys.clone();
        self.held_buttons = sample.mouse_buttons.clone();
        Ok(sample)
    }
}

impl Drop for RawInputCapture {
    fn drop(&mut self) {
        unsafe {
            let _ = PostMessageW(HWND(self.hwnd), WM_CLOSE, WPARAM(0), LPARAM(0));
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// フックスレッド本体
fn hook_thread(
    ready_tx: Sender<Result<isize, String>>,
    event_tx: Sender<RawEvent>,
    focus_pid: Option<u32>,
) {
    unsafe {
        let hwnd = CreateWindowExW(
            WINDOW_EX_STYLE(0),
            w!("STATIC"),
            None,
            WINDOW_STYLE(0),
            0,
            0,
            0,
            0,
            HWND_MESSAGE,
            None,
            None,
            None,
        );
        if hwnd.0 == 0 {
            let _ = ready_tx.send(Err("CreateWindowExW failed".to_string()));
            return;
        }

        let devices = [
            RAWINPUTDEVICE {
                usUsagePage: HID_USAGE_PAGE_GENERIC,
                usUsage: HID_USAGE_GENERIC_MOUSE,
                dwFlags: RIDEV_INPUTSINK,
                hwndTarget: hwnd,
            },
            RAWINPUTDEVICE {
                usUsagePage: HID_USAGE_PAGE_GENERIC,
                usUsage: HID_USAGE_GENERIC_KEYBOARD,
                dwFlags: RIDEV_INPUTSINK,
                hwndTarget: hwnd,
            },
        ];
        if let Err(e) =
            RegisterRawInputDevices(&devices, std::mem::size_of::<RAWINPUTDEVICE>() as u32)
        {
            let _ = ready_tx.send(Err(format!("RegisterRawInputDevices failed: {}", e)));
            let _ = DestroyWindow(hwnd);
            return;
        }
        let _ = ready_tx.send(Ok(hwnd.0));

        let mut msg = MSG::default();
        while GetMessageW(&mut msg, HWND(0), 0, 0).as_bool() {
            if msg.message == WM_CLOSE {
                break;
            }
            if msg.message == WM_INPUT {
                if focus_ok(focus_pid) {
                    handle_input(msg.lParam, &event_tx);
                }
            }
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }

        let _ = DestroyWindow(hwnd);
        debug!("Raw input hook thread exiting");
    }
}

/// フォーカス限定モードの判定
fn focus_ok(focus_pid: Option<u32>) -> bool {
    let Some(target) = focus_pid else {
        return true;
    };
    unsafe {
        let foreground = GetForegroundWindow();
        if foreground.0 == 0 {
            return false;
        }
        let mut pid = 0u32;
        GetWindowThreadProcessId(foreground, Some(&mut pid));
        pid == target
    }
}

/// WM_INPUTを解析してイベント化
unsafe fn handle_input(lparam: LPARAM, event_tx: &Sender<RawEvent>) {
    let mut raw = RAWINPUT::default();
    let mut size = std::mem::size_of::<RAWINPUT>() as u32;
    let copied = GetRawInputData(
        HRAWINPUT(lparam.0),
        RID_INPUT,
        Some(&mut raw as *mut RAWINPUT as *mut _),
        &mut size,
        std::mem::size_of::<RAWINPUTHEADER>() as u32,
    );
    if copied == u32::MAX || copied == 0 {
        warn!("GetRawInputData failed, event dropped");
        return;
    }

    if raw.header.dwType == RIM_TYPEMOUSE.0 {
        let mouse = raw.data.mouse;
        // 絶対座標デバイス（タブレット等）の移動は対象外
        if mouse.usFlags.0 & MOUSE_MOVE_ABSOLUTE == 0 && (mouse.lLastX != 0 || mouse.lLastY != 0)
        {
            let _ = event_tx.send(RawEvent::Move {
                dx: mouse.lLastX,
                dy: mouse.lLastY,
            });
        }

        let flags = mouse.Anonymous.Anonymous.usButtonFlags;
        for (down_bit, up_bit, button) in [
            (BTN_LEFT_DOWN, BTN_LEFT_UP, MouseButton::Left),
            (BTN_RIGHT_DOWN, BTN_RIGHT_UP, MouseButton::Right),
            (BTN_MIDDLE_DOWN, BTN_MIDDLE_UP, MouseButton::Middle),
            (BTN_X1_DOWN, BTN_X1_UP, MouseButton::X1),
            (BTN_X2_DOWN, BTN_X2_UP, MouseButton::X2),
        ] {
            if flags & down_bit != 0 {
                let _ = event_tx.send(RawEvent::Button { button, down: true });
            }
            if flags & up_bit != 0 {
                let _ = event_tx.send(RawEvent::Button {
                    button,
                    down: false,
                });
            }
        }
        if flags & BTN_WHEEL != 0 {
            let delta = raw.data.mouse.Anonymous.Anonymous.usButtonData as i16 as i32;
            let _ = event_tx.send(RawEvent::Wheel(delta / WHEEL_DELTA));
        }
    } else if raw.header.dwType == RIM_TYPEKEYBOARD.0 {
        let keyboard = raw.data.keyboard;
        if let Some(key) = Key::from_vk_code(keyboard.VKey) {
            let down = keyboard.Flags & RI_KEY_BREAK == 0;
            let _ = event_tx.send(RawEvent::Key { key, down });
        }
    }
}

/// カーソルポーリングによる縮退キャプチャ
///
/// raw inputフックが使えない環境向けの明示的なフォールバック。
/// ホイールは取得できず、サンプリング間のボタン連打は取りこぼす。
/// 全サンプルにdegradedフラグが付く。
pub struct CursorPollCapture {
    focus_pid: Option<u32>,
    last_pos: Option<(i32, i32)>,
}

impl CursorPollCapture {
    pub fn new(focus_pid: Option<u32>) -> Self {
        warn!("Falling back to cursor polling capture (degraded)");
        Self {
            focus_pid,
            last_pos: None,
        }
    }

    fn key_down(vk: i32) -> bool {
        unsafe { (GetAsyncKeyState(vk) & 0x8000u16 as i16) != 0 }
    }
}

impl RawInputPort for CursorPollCapture {
    fn sample(&mut self) -> DomainResult<RawSample> {
        let mut sample = RawSample {
            degraded: true,
            ..RawSample::default()
        };

        let mut pos = windows::Win32::Foundation::POINT::default();
        if unsafe { GetCursorPos(&mut pos) }.is_ok() {
            if let Some((lx, ly)) = self.last_pos {
                sample.dx = pos.x - lx;
                sample.dy = pos.y - ly;
            }
            self.last_pos = Some((pos.x, pos.y));
        }

        if !focus_ok(self.focus_pid) {
            // フォーカス外では位置だけ追従し、入力は空とする
            sample.dx = 0;
            sample.dy = 0;
            return Ok(sample);
        }

        for key in Key::ALL {
            if Self::key_down(key.to_vk_code() as i32) {
                sample.keys.insert(key);
            }
        }
        for (vk, button) in [
            (0x01, MouseButton::Left),
            (0x02, MouseButton::Right),
            (0x04, MouseButton::Middle),
            (0x05, MouseButton::X1),
            (0x06, MouseButton::X2),
        ] {
            if Self::key_down(vk) {
                sample.mouse_buttons.insert(button);
            }
        }

        Ok(sample)
    }

    fn is_degraded(&self) -> bool {
        true
    }
}
