//! SendInputによる入力注入（Infrastructure層、Windows専用）
//!
//! KmActionの希望状態と現在押下中の集合の差分から
//! press/releaseイベント列を合成し、1回のSendInputで注入する。
//! SendInputはフォアグラウンドウィンドウへ届くため、
//! 対象プロセスのフォーカスは呼び出し側の前提条件。

use std::collections::BTreeSet;
use std::mem;

use tracing::{debug, warn};

use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT, KEYBD_EVENT_FLAGS,
    KEYEVENTF_EXTENDEDKEY, KEYEVENTF_KEYUP, MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP,
    MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP, MOUSEEVENTF_MOVE, MOUSEEVENTF_RIGHTDOWN,
    MOUSEEVENTF_RIGHTUP, MOUSEEVENTF_WHEEL, MOUSEEVENTF_XDOWN, MOUSEEVENTF_XUP, MOUSEINPUT,
    MOUSE_EVENT_FLAGS, VIRTUAL_KEY,
};

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::ports::DispatchPort;
use crate::domain::types::{Key, KmAction, MouseButton};

const WHEEL_DELTA: i32 = 120;
const XBUTTON1: i32 = 1;
const XBUTTON2: i32 = 2;

/// SendInputディスパッチアダプタ
pub struct SendInputDispatcher {
    held_keys: BTreeSet<Key>,
    held_buttons: BTreeSet<MouseButton>,
}

impl SendInputDispatcher {
    pub fn new() -> Self {
        Self {
            held_keys: BTreeSet::new(),
            held_buttons: BTreeSet::new(),
        }
    }

    fn key_input(key: Key, up: bool) -> INPUT {
        let mut flags = if key.is_extended() {
            KEYEVENTF_EXTENDEDKEY
        } else {
            KEYBD_EVENT_FLAGS(0)
        };
        if up {
            flags |= KEYEVENTF_KEYUP;
        }
        INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: VIRTUAL_KEY(key.to_vk_code()),
                    wScan: 0,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        }
    }

    fn mouse_input(dx: i32, dy: i32, data: i32, flags: MOUSE_EVENT_FLAGS) -> INPUT {
        INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx,
                    dy,
                    mouseData: data,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        }
    }

    fn button_flags(button: MouseButton, up: bool) -> (MOUSE_EVENT_FLAGS, i32) {
        match (button, up) {
            (MouseButton::Left, false) => (MOUSEEVENTF_LEFTDOWN, 0),
            (MouseButton::Left, true) => (MOUSEEVENTF_LEFTUP, 0),
            (MouseButton::Right, false) => (MOUSEEVENTF_RIGHTDOWN, 0),
            (MouseButton::Right, true) => (MOUSEEVENTF_RIGHTUP, 0),
            (MouseButton::Middle, false) => (MOUSEEVENTF_MIDDLEDOWN, 0),
            (MouseButton::Middle, true) => (MOUSEEVENTF_MIDDLEUP, 0),
            (MouseButton::X1, false) => (MOUSEEVENTF_XDOWN, XBUTTON1),
            (MouseButton::X1, true) => (MOUSEEVENTF_XUP, XBUTTON1),
            (MouseButton::X2, false) => (MOUSEEVENTF_XDOWN, XBUTTON2),
            (MouseButton::X2, true) => (MOUSEEVENTF_XUP, XBUTTON2),
        }
    }

    /// 差分からINPUT列を構築
    fn build_inputs(&self, action: &KmAction) -> Vec<INPUT> {
        let mut inputs = Vec::new();

        // 解放を先に、押下を後に（同一tick内での持ち替えを安全にする）
        for key in self.held_keys.difference(&action.keys) {
            inputs.push(Self::key_input(*key, true));
        }
        for button in self.held_buttons.difference(&action.mouse_buttons) {
            let (flags, data) = Self::button_flags(*button, true);
            inputs.push(Self::mouse_input(0, 0, data, flags));
        }
        for key in action.keys.difference(&self.held_keys) {
            inputs.push(Self::key_input(*key, false));
        }
        for button in action.mouse_buttons.difference(&self.held_buttons) {
            let (flags, data) = Self::button_flags(*button, false);
            inputs.push(Self::mouse_input(0, 0, data, flags));
        }

        if action.mouse_dx != 0 || action.mouse_dy != 0 {
            inputs.push(Self::mouse_input(
                action.mouse_dx,
                action.mouse_dy,
                0,
                MOUSEEVENTF_MOVE,
            ));
        }
        if action.wheel != 0 {
            inputs.push(Self::mouse_input(
                0,
                0,
                action.wheel * WHEEL_DELTA,
                MOUSEEVENTF_WHEEL,
            ));
        }

        inputs
    }
}

impl Default for SendInputDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchPort for SendInputDispatcher {
    fn apply(&mut self, action: &KmAction) -> DomainResult<()> {
        let inputs = self.build_inputs(action);
        if inputs.is_empty() {
            return Ok(());
        }

        let sent = unsafe { SendInput(&inputs, mem::size_of::<INPUT>() as i32) };
        if sent as usize != inputs.len() {
            return Err(DomainError::DispatchError(format!(
                "SendInput injected {} of {} events",
                sent,
                inputs.len()
            )));
        }

        self.held_keys = action.keys.clone();
        self.held_buttons = action.mouse_buttons.clone();
        debug!(events = inputs.len(), "Inputs dispatched");
        Ok(())
    }

    fn release_all(&mut self) -> DomainResult<()> {
        let result = self.apply(&KmAction::neutral());
        if result.is_err() {
            warn!("Failed to release held inputs");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // SendInput自体の呼び出しは手動テストの領分。
    // ここでは差分からのINPUT列構築だけを検証する。

    fn action(keys: &[Key], buttons: &[MouseButton], dx: i32, dy: i32) -> KmAction {
        KmAction {
            keys: keys.iter().copied().collect(),
            mouse_buttons: buttons.iter().copied().collect(),
            mouse_dx: dx,
            mouse_dy: dy,
            wheel: 0,
        }
    }

    #[test]
    fn test_initial_press_builds_down_events() {
        let dispatcher = SendInputDispatcher::new();
        let inputs = dispatcher.build_inputs(&action(&[Key::W], &[MouseButton::Left], 3, 0));
        // keydown + buttondown + move
        assert_eq!(inputs.len(), 3);
    }

    #[test]
    fn test_unchanged_hold_emits_no_key_events() {
        let mut dispatcher = SendInputDispatcher::new();
        dispatcher.held_keys.insert(Key::W);

        let inputs = dispatcher.build_inputs(&action(&[Key::W], &[], 0, 0));
        // 押しっぱなしのキーは再送しない
        assert!(inputs.is_empty());
    }

    #[test]
    fn test_release_diff() {
        let mut dispatcher = SendInputDispatcher::new();
        dispatcher.held_keys.insert(Key::W);
        dispatcher.held_keys.insert(Key::A);
        dispatcher.held_buttons.insert(MouseButton::Left);

        // Wのみ維持: A解放 + 左ボタン解放
        let inputs = dispatcher.build_inputs(&action(&[Key::W], &[], 0, 0));
        assert_eq!(inputs.len(), 2);
    }

    #[test]
    fn test_neutral_action_releases_everything() {
        let mut dispatcher = SendInputDispatcher::new();
        dispatcher.held_keys.insert(Key::Space);
        dispatcher.held_buttons.insert(MouseButton::Right);

        let inputs = dispatcher.build_inputs(&KmAction::neutral());
        assert_eq!(inputs.len(), 2);
    }

    #[test]
    fn test_wheel_scaled_by_delta() {
        let dispatcher = SendInputDispatcher::new();
        let mut km = KmAction::neutral();
        km.wheel = 2;
        let inputs = dispatcher.build_inputs(&km);
        assert_eq!(inputs.len(), 1);
        let data = unsafe { inputs[0].Anonymous.mi.mouseData };
        assert_eq!(data, 240);
    }
}
