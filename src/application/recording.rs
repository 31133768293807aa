//! 記録パイプライン（Application層）
//!
//! フレームとアクションの同期記録。1実行ぶんの出力レイアウトは
//!   <out_dir>/<run_id>/frames/000000.png
//!   <out_dir>/<run_id>/actions.jsonl
//!   <out_dir>/<run_id>/meta.json
//!
//! 不変条件: tickインデックスは0から欠番なしで単調増加し、
//! フレームは対応するログ行より先に書かれる（クラッシュ時に
//! 残り得るのは末尾の未ログフレーム高々1枚のみ）。

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::domain::config::RecordingConfig;
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::types::{ActionRecord, ControllerMode, Frame, KmAction, RunMeta};

/// 1実行ぶんの記録セッション
pub struct RecordingPipeline {
    run_dir: PathBuf,
    frames_dir: PathBuf,
    actions: BufWriter<File>,
    meta: RunMeta,
    max_frames: u64,
    max_duration_sec: u64,
    save_frames: bool,
    started: Instant,
    next_tick: u64,
    active: bool,
}

/// 記録セッションのシード情報（meta.jsonの初期値）
pub struct RunInfo {
    pub process: String,
    pub fps: u32,
    pub controller_mode: ControllerMode,
    pub raw_mouse: bool,
    pub focus_only: bool,
}

impl RecordingPipeline {
    /// 記録を開始
    ///
    /// 出力ディレクトリを作成し、中断された実行でも自己記述できるよう
    /// meta.jsonをこの時点で一度書き出す。
    pub fn begin_run(config: &RecordingConfig, info: RunInfo) -> DomainResult<Self> {
        let created_at = unix_now();
        let run_id = format!("run_{}", created_at as u64);
        let run_dir = PathBuf::from(&config.out_dir).join(&run_id);
        let frames_dir = run_dir.join("frames");
        fs::create_dir_all(&frames_dir)?;

        let meta = RunMeta {
            run_id: run_id.clone(),
            fps: info.fps,
            process: info.process,
            controller_mode: info.controller_mode,
            raw_mouse: info.raw_mouse,
            focus_only: info.focus_only,
            frame_count: 0,
            duration_sec: 0.0,
            created_at,
        };
        write_meta(&run_dir, &meta)?;

        let actions = BufWriter::new(File::create(run_dir.join("actions.jsonl"))?);

        info!(run_id = %run_id, dir = %run_dir.display(), "Recording started");
        Ok(Self {
            run_dir,
            frames_dir,
            actions,
            meta,
            max_frames: config.max_frames,
            max_duration_sec: config.max_duration_sec,
            save_frames: config.save_frames,
            started: Instant::now(),
            next_tick: 0,
            active: true,
        })
    }

    /// 記録継続中か（上限到達で停止していないか）
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// 実行ディレクトリ
    pub fn run_dir(&self) -> &std::path::Path {
        &self.run_dir
    }

    /// 1 tickぶんを記録
    ///
    /// tick番号は内部で採番する（呼び出しごとに+1、欠番なし）。
    /// 上限到達時は何も書かずfalseを返す。記録の停止であって
    /// ループの停止ではない点に注意。
    pub fn record_tick(
        &mut self,
        frame: Option<&Frame>,
        action: &KmAction,
        raw: bool,
    ) -> DomainResult<bool> {
        if !self.active {
            return Ok(false);
        }
        if self.cap_reached() {
            self.active = false;
            info!(
                frames = self.next_tick,
                "Recording cap reached, recording stopped"
            );
            return Ok(false);
        }

        let tick = self.next_tick;

        // フレームを先に書く。失敗したらログ行も書かない（全か無か）
        if self.save_frames {
            if let Some(frame) = frame {
                let path = self.frames_dir.join(format!("{:06}.png", tick));
                image::save_buffer(
                    &path,
                    &frame.data,
                    frame.width,
                    frame.height,
                    image::ExtendedColorType::Rgb8,
                )
                .map_err(|e| DomainError::FrameEncode(e.to_string()))?;
            }
        }

        let record = ActionRecord {
            tick,
            timestamp: unix_now(),
            action: action.clone(),
            raw,
        };
        let line = serde_json::to_string(&record)
            .map_err(|e| DomainError::Other(format!("Failed to serialize record: {}", e)))?;
        self.actions.write_all(line.as_bytes())?;
        self.actions.write_all(b"\n")?;
        self.actions.flush()?;

        self.next_tick = tick + 1;
        Ok(true)
    }

    /// 記録を終了し、確定値でmeta.jsonを書き直す
    pub fn end_run(mut self) -> DomainResult<RunMeta> {
        self.actions.flush()?;
        self.meta.frame_count = self.next_tick;
        self.meta.duration_sec = self.started.elapsed().as_secs_f64();
        write_meta(&self.run_dir, &self.meta)?;
        info!(
            run_id = %self.meta.run_id,
            frames = self.meta.frame_count,
            duration_sec = self.meta.duration_sec,
            "Recording finished"
        );
        // Drop実装を持つためフィールドは動かせない
        Ok(self.meta.clone())
    }

    fn cap_reached(&self) -> bool {
        if self.max_frames > 0 && self.next_tick >= self.max_frames {
            return true;
        }
        if self.max_duration_sec > 0
            && self.started.elapsed().as_secs() >= self.max_duration_sec
        {
            return true;
        }
        false
    }
}

impl Drop for RecordingPipeline {
    fn drop(&mut self) {
        // end_runを経ない終了でもバッファは失わない
        if self.actions.flush().is_err() {
            warn!("Failed to flush action log on drop");
        }
    }
}

fn write_meta(run_dir: &std::path::Path, meta: &RunMeta) -> DomainResult<()> {
    let json = serde_json::to_string_pretty(meta)
        .map_err(|e| DomainError::Other(format!("Failed to serialize meta: {}", e)))?;
    fs::write(run_dir.join("meta.json"), json)?;
    Ok(())
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Key;

    fn config(dir: &std::path::Path) -> RecordingConfig {
        RecordingConfig {
            out_dir: dir.to_string_lossy().into_owned(),
            max_frames: 0,
            max_duration_sec: 0,
            save_frames: true,
            warmup_countdown_sec: 0,
        }
    }

    fn info() -> RunInfo {
        RunInfo {
            process: "game.exe".to_string(),
            fps: 30,
            controller_mode: ControllerMode::Km,
            raw_mouse: true,
            focus_only: true,
        }
    }

    fn test_frame() -> Frame {
        Frame::new(vec![0u8; 2 * 2 * 3], 2, 2)
    }

    fn action_with_key() -> KmAction {
        let mut action = KmAction::neutral();
        action.keys.insert(Key::W);
        action
    }

    #[test]
    fn test_meta_written_at_begin() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = RecordingPipeline::begin_run(&config(dir.path()), info()).unwrap();

        // 1 tickも記録していなくてもmeta.jsonは存在する
        let meta_path = pipeline.run_dir().join("meta.json");
        assert!(meta_path.exists());

        let meta: RunMeta =
            serde_json::from_str(&fs::read_to_string(meta_path).unwrap()).unwrap();
        assert_eq!(meta.frame_count, 0);
        assert_eq!(meta.process, "game.exe");
    }

    #[test]
    fn test_frames_match_log_lines_and_meta() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = RecordingPipeline::begin_run(&config(dir.path()), info()).unwrap();

        let frame = test_frame();
        for _ in 0..5 {
            assert!(pipeline
                .record_tick(Some(&frame), &action_with_key(), true)
                .unwrap());
        }
        let run_dir = pipeline.run_dir().to_path_buf();
        let meta = pipeline.end_run().unwrap();

        // フレーム数 == ログ行数 == metaのframe_count
        let frames = fs::read_dir(run_dir.join("frames")).unwrap().count();
        let lines = fs::read_to_string(run_dir.join("actions.jsonl"))
            .unwrap()
            .lines()
            .count();
        assert_eq!(frames, 5);
        assert_eq!(lines, 5);
        assert_eq!(meta.frame_count, 5);

        // tickは0から欠番なし
        let content = fs::read_to_string(run_dir.join("actions.jsonl")).unwrap();
        for (expected, line) in content.lines().enumerate() {
            let record: ActionRecord = serde_json::from_str(line).unwrap();
            assert_eq!(record.tick, expected as u64);
        }
    }

    #[test]
    fn test_frame_filenames_zero_padded() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = RecordingPipeline::begin_run(&config(dir.path()), info()).unwrap();

        let frame = test_frame();
        pipeline
            .record_tick(Some(&frame), &KmAction::neutral(), true)
            .unwrap();

        assert!(pipeline.run_dir().join("frames/000000.png").exists());
    }

    #[test]
    fn test_max_frames_cap_stops_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.max_frames = 3;
        let mut pipeline = RecordingPipeline::begin_run(&cfg, info()).unwrap();

        let frame = test_frame();
        let mut recorded = 0;
        for _ in 0..10 {
            if pipeline
                .record_tick(Some(&frame), &KmAction::neutral(), true)
                .unwrap()
            {
                recorded += 1;
            }
        }
        assert_eq!(recorded, 3);
        assert!(!pipeline.is_active());

        let meta = pipeline.end_run().unwrap();
        assert_eq!(meta.frame_count, 3);
    }

    #[test]
    fn test_save_frames_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.save_frames = false;
        let mut pipeline = RecordingPipeline::begin_run(&cfg, info()).unwrap();

        let frame = test_frame();
        pipeline
            .record_tick(Some(&frame), &action_with_key(), false)
            .unwrap();
        let run_dir = pipeline.run_dir().to_path_buf();
        pipeline.end_run().unwrap();

        // PNGは書かれないがログ行は書かれる
        assert_eq!(fs::read_dir(run_dir.join("frames")).unwrap().count(), 0);
        let lines = fs::read_to_string(run_dir.join("actions.jsonl"))
            .unwrap()
            .lines()
            .count();
        assert_eq!(lines, 1);
    }

    #[test]
    fn test_end_run_records_duration() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = RecordingPipeline::begin_run(&config(dir.path()), info()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let meta = pipeline.end_run().unwrap();
        assert!(meta.duration_sec >= 0.02);
    }

    #[test]
    fn test_raw_flag_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.save_frames = false;
        let mut pipeline = RecordingPipeline::begin_run(&cfg, info()).unwrap();

        pipeline.record_tick(None, &KmAction::neutral(), false).unwrap();
        let run_dir = pipeline.run_dir().to_path_buf();
        pipeline.end_run().unwrap();

        let content = fs::read_to_string(run_dir.join("actions.jsonl")).unwrap();
        let record: ActionRecord = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert!(!record.raw);
    }
}
