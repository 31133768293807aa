//! ゲームパッド→キーボード/マウス変換（Application層）
//!
//! ゲームパッド型アクションを決定的にKmActionへ写像する。
//! 変換は純粋関数で、押下/解放の差分管理はディスパッチ側の責務。

use crate::domain::config::AdapterConfig;
use crate::domain::types::{Binding, GamepadAction, KmAction};

/// ゲームパッド→KM変換器
///
/// 同一の(アクション, 設定)に対して常に同一のKmActionを返す。
pub struct KmAdapter {
    config: AdapterConfig,
}

impl KmAdapter {
    /// 設定から変換器を作成
    pub fn new(config: AdapterConfig) -> Self {
        Self { config }
    }

    /// 1 tickぶんのアクションを変換
    pub fn adapt(&self, action: &GamepadAction) -> KmAction {
        let cfg = &self.config;
        let mut km = KmAction::neutral();

        // ボタン: バインド表による1:1対応
        for button in &action.buttons {
            if let Some(binding) = cfg.buttons.get(button) {
                apply_binding(&mut km, *binding);
            }
        }

        // トリガー: 閾値以上で押下（境界含む、ラッチなし）
        for (trigger, binding) in &cfg.triggers {
            if action.trigger(*trigger) >= cfg.trigger_threshold {
                apply_binding(&mut km, *binding);
            }
        }

        // 移動スティック: 各軸成分ごとにデッドゾーン判定
        // 正のYが前進
        let (lx, ly) = action.left_stick;
        if lx > cfg.deadzone {
            km.keys.insert(cfg.key_right);
        } else if lx < -cfg.deadzone {
            km.keys.insert(cfg.key_left);
        }
        if ly > cfg.deadzone {
            km.keys.insert(cfg.key_forward);
        } else if ly < -cfg.deadzone {
            km.keys.insert(cfg.key_back);
        }

        // 視点スティック: 感度スケール + 丸め + クランプ
        // 画面座標はY下向きのため符号反転
        let (rx, ry) = action.right_stick;
        km.mouse_dx = scale_axis(rx, cfg.mouse_sensitivity, cfg.mouse_max);
        km.mouse_dy = scale_axis(-ry, cfg.mouse_sensitivity, cfg.mouse_max);

        km
    }
}

/// 軸値をマウス移動量へ変換
fn scale_axis(axis: f32, sensitivity: f32, max: i32) -> i32 {
    let delta = (axis * sensitivity).round() as i32;
    delta.clamp(-max, max)
}

/// バインド先をKmActionへ反映
fn apply_binding(km: &mut KmAction, binding: Binding) {
    match binding {
        Binding::Key(key) => {
            km.keys.insert(key);
        }
        Binding::Mouse(button) => {
            km.mouse_buttons.insert(button);
        }
    }
}
