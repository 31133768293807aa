//! 推論サーバークライアント（Infrastructure層）
//!
//! エンコード済みフレームをPOSTし、ゲームパッド型アクションを受け取る。
//! タイムアウトはHTTPクライアントに設定し、PolicyPortの契約
//! （predictは有界時間で返る）を満たす。

use std::collections::BTreeMap;
use std::io::Cursor;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::domain::config::InferenceConfig;
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::ports::PolicyPort;
use crate::domain::types::{clamp_trigger, Frame, GamepadAction, GamepadButton};

/// /predictエンドポイントのJSON応答
#[derive(Debug, Deserialize)]
struct PredictResponse {
    /// 移動スティック [x, y]
    j_left: [f32; 2],
    /// 視点スティック [x, y]
    j_right: [f32; 2],
    /// ボタン名 → スコア [0, 1]
    #[serde(default)]
    buttons: BTreeMap<String, f32>,
    /// トリガースコア
    #[serde(default)]
    triggers: TriggerScores,
}

#[derive(Debug, Default, Deserialize)]
struct TriggerScores {
    #[serde(default)]
    left: f32,
    #[serde(default)]
    right: f32,
}

/// HTTP越しのポリシークライアント
pub struct HttpPolicyClient {
    client: reqwest::blocking::Client,
    endpoint: String,
    button_threshold: f32,
}

impl HttpPolicyClient {
    /// 設定からクライアントを作成
    pub fn new(config: &InferenceConfig) -> DomainResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| {
                DomainError::InferenceError(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self {
            client,
            endpoint: config.endpoint(),
            button_threshold: config.button_threshold,
        })
    }

    fn encode_frame(frame: &Frame) -> DomainResult<Vec<u8>> {
        let mut png = Cursor::new(Vec::new());
        image::write_buffer_with_format(
            &mut png,
            &frame.data,
            frame.width,
            frame.height,
            image::ExtendedColorType::Rgb8,
            image::ImageFormat::Png,
        )
        .map_err(|e| DomainError::FrameEncode(e.to_string()))?;
        Ok(png.into_inner())
    }
}

impl PolicyPort for HttpPolicyClient {
    fn predict(&mut self, frame: &Frame) -> DomainResult<GamepadAction> {
        let png = Self::encode_frame(frame)?;

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "image/png")
            .body(png)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    DomainError::Timeout(format!("Inference request: {}", e))
                } else {
                    DomainError::InferenceError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(DomainError::InferenceError(format!(
                "Server returned {}",
                response.status()
            )));
        }

        let parsed: PredictResponse = response
            .json()
            .map_err(|e| DomainError::InferenceMalformed(e.to_string()))?;

        debug!(
            buttons = parsed.buttons.len(),
            "Prediction received"
        );
        Ok(response_to_action(parsed, self.button_threshold))
    }
}

/// JSON応答をゲームパッド型アクションへ変換
///
/// ボタンはスコアが閾値を超えたものだけ押下扱い。
/// 未知のボタン名は警告して無視する。
fn response_to_action(response: PredictResponse, button_threshold: f32) -> GamepadAction {
    let mut buttons = std::collections::BTreeSet::new();
    for (name, score) in &response.buttons {
        if *score <= button_threshold {
            continue;
        }
        match serde_json::from_value::<GamepadButton>(serde_json::Value::String(name.clone())) {
            Ok(button) => {
                buttons.insert(button);
            }
            Err(_) => warn!(name = %name, "Unknown button in prediction, ignoring"),
        }
    }

    GamepadAction::new(
        buttons,
        (response.j_left[0], response.j_left[1]),
        (response.j_right[0], response.j_right[1]),
        clamp_trigger(response.triggers.left),
        clamp_trigger(response.triggers.right),
    )
}
