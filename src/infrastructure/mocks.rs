//! モック実装（Infrastructure層）
//!
//! フレーム供給元は外部コラボレータの責務のため、本体は
//! ポートとこの合成フレーム実装のみを提供する。
//! ディスパッチのモックはドライ環境での動作確認用。

use tracing::{debug, info};

use crate::domain::error::DomainResult;
use crate::domain::ports::{DispatchPort, FramePort, GamepadPort, RawInputPort};
use crate::domain::types::{Frame, GamepadAction, KmAction, RawSample};

/// 合成フレームを生成するモックフレームソース
pub struct MockFrameSource {
    width: u32,
    height: u32,
    counter: u64,
}

impl MockFrameSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            counter: 0,
        }
    }

    /// 生成済みフレーム数
    pub fn frames_generated(&self) -> u64 {
        self.counter
    }
}

impl Default for MockFrameSource {
    fn default() -> Self {
        Self::new(320, 180)
    }
}

impl FramePort for MockFrameSource {
    fn capture_frame(&mut self) -> DomainResult<Frame> {
        // フレームごとに模様が変わる横グラデーション
        let phase = (self.counter % 256) as u8;
        let mut data = Vec::with_capacity((self.width * self.height * 3) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                data.push((x % 256) as u8);
                data.push((y % 256) as u8);
                data.push(phase);
            }
        }
        self.counter += 1;
        Ok(Frame::new(data, self.width, self.height))
    }
}

/// 何も注入しないディスパッチモック
///
/// 受け取ったアクションをログに流すだけ。適用回数を数えるので
/// 「ドライランでは一度も呼ばれない」ことの検証にも使える。
#[derive(Default)]
pub struct MockDispatcher {
    applied: u64,
    last: Option<KmAction>,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied_count(&self) -> u64 {
        self.applied
    }

    pub fn last_action(&self) -> Option<&KmAction> {
        self.last.as_ref()
    }
}

impl DispatchPort for MockDispatcher {
    fn apply(&mut self, action: &KmAction) -> DomainResult<()> {
        debug!(keys = action.keys.len(), dx = action.mouse_dx, dy = action.mouse_dy, "Mock dispatch");
        self.applied += 1;
        self.last = Some(action.clone());
        Ok(())
    }

    fn release_all(&mut self) -> DomainResult<()> {
        info!("Mock dispatcher released all inputs");
        self.last = None;
        Ok(())
    }
}

/// 仮想ゲームパッドのモック
#[derive(Default)]
pub struct MockGamepad {
    applied: u64,
}

impl MockGamepad {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied_count(&self) -> u64 {
        self.applied
    }
}

impl GamepadPort for MockGamepad {
    fn apply(&mut self, action: &GamepadAction) -> DomainResult<()> {
        debug!(buttons = action.buttons.len(), "Mock gamepad passthrough");
        self.applied += 1;
        Ok(())
    }
}

/// 常にニュートラルを返すraw inputモック
#[derive(Default)]
pub struct MockRawInput;

impl MockRawInput {
    pub fn new() -> Self {
        Self
    }
}

impl RawInputPort for MockRawInput {
    fn sample(&mut self) -> DomainResult<RawSample> {
        Ok(RawSample::default())
    }
}
