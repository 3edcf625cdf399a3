//! Recorded landmark streams (JSON lines) played back in place of a live camera.
//!
//! Each line is a detector callback plus its timestamp:
//! `{"t_ms": 0, "multiHandLandmarks": [...], "image": "frames/0000.jpg"}`.
//! Image paths are relative to the recording file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{self as stdtime, Duration};

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::hand::{DetectionFrame, Frame, FrameRef};
use crate::media::{LandmarkDetector, LatestFrame, SnapshotSource};

#[derive(Debug, Clone, Deserialize)]
pub struct RecordedFrame {
    pub t_ms: u64,
    #[serde(flatten)]
    pub detection: DetectionFrame,
}

impl RecordedFrame {
    pub fn offset(&self) -> Duration {
        Duration::from_millis(self.t_ms)
    }
}

#[derive(Debug, Clone)]
pub struct Recording {
    frames: Vec<RecordedFrame>,
}

impl Recording {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read recording {}", path.display()))?;
        let base = path.parent().unwrap_or(Path::new("."));
        let recording = Self::parse(&content, base)
            .with_context(|| format!("invalid recording {}", path.display()))?;
        info!(path = %path.display(), frames = recording.len(), "recording loaded");
        Ok(recording)
    }

    /// Parse JSON lines; relative image paths are resolved against `base`
    pub fn parse(content: &str, base: &Path) -> Result<Self> {
        let mut frames = Vec::new();
        for (i, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut frame: RecordedFrame =
                serde_json::from_str(line).with_context(|| format!("line {}", i + 1))?;
            if let Some(FrameRef::Path(p)) = &frame.detection.image {
                if p.is_relative() {
                    frame.detection.image = Some(FrameRef::Path(base.join(p)));
                }
            }
            frame.detection = frame.detection.clamped();
            frames.push(frame);
        }
        frames.sort_by_key(|f| f.t_ms);
        Ok(Self { frames })
    }

    pub fn frames(&self) -> &[RecordedFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn duration(&self) -> Duration {
        self.frames.last().map(RecordedFrame::offset).unwrap_or_default()
    }

    /// Emit frames on their recorded schedule.
    ///
    /// Referenced stills are decoded and published to `snapshots` so the
    /// session can evaluate them. Returns when the recording ends or the
    /// receiver goes away.
    pub async fn play(self, tx: mpsc::Sender<DetectionFrame>, snapshots: LatestFrame) {
        let start = Instant::now();
        let mut last_path: Option<PathBuf> = None;

        for recorded in self.frames {
            time::sleep_until(start + recorded.offset()).await;
            let mut detection = recorded.detection;

            if let Some(FrameRef::Path(path)) = &detection.image {
                if last_path.as_deref() != Some(path.as_path()) {
                    match decode_still(path.clone()).await {
                        Ok(frame) => {
                            let frame = Arc::new(frame);
                            snapshots.publish(frame.clone());
                            last_path = Some(path.clone());
                            detection.image = Some(FrameRef::Pixels(frame));
                        }
                        Err(e) => warn!("{:#}", e),
                    }
                } else {
                    detection.image = snapshots.latest_frame().map(FrameRef::Pixels);
                }
            }

            if tx.send(detection).await.is_err() {
                debug!("replay receiver dropped");
                return;
            }
        }
        debug!("replay finished");
    }

    /// Landmarks for live camera pixels, looped on the recorded schedule
    pub fn into_detector(self) -> ScriptedDetector {
        ScriptedDetector {
            frames: self.frames,
            started: None,
        }
    }
}

/// Stand-in landmark model that answers from a recording instead of the pixels
#[derive(Debug)]
pub struct ScriptedDetector {
    frames: Vec<RecordedFrame>,
    started: Option<stdtime::Instant>,
}

impl ScriptedDetector {
    /// Detection due `elapsed` after the first call
    pub fn at(&self, elapsed: Duration) -> DetectionFrame {
        let period = self.frames.last().map(RecordedFrame::offset).unwrap_or_default();
        let t = if period.is_zero() {
            Duration::ZERO
        } else {
            Duration::from_nanos((elapsed.as_nanos() % period.as_nanos()) as u64)
        };
        let due = self.frames.iter().take_while(|f| f.offset() <= t).last();
        match due {
            Some(f) => DetectionFrame::new(
                f.detection.multi_hand_landmarks.clone(),
                f.detection.multi_hand_world_landmarks.clone(),
                None,
            ),
            None => DetectionFrame::empty(),
        }
    }
}

impl LandmarkDetector for ScriptedDetector {
    fn detect(&mut self, _frame: &Frame) -> Result<DetectionFrame> {
        let started = *self.started.get_or_insert_with(stdtime::Instant::now);
        Ok(self.at(started.elapsed()))
    }
}

/// [`load_image`] on the blocking pool
async fn decode_still(path: PathBuf) -> Result<Frame> {
    tokio::task::spawn_blocking(move || load_image(&path))
        .await
        .context("image decode task failed")?
}

/// Decode a still from disk into RGB pixels
pub fn load_image(path: &Path) -> Result<Frame> {
    let img = image::open(path)
        .with_context(|| format!("failed to decode {}", path.display()))?
        .to_rgb8();
    let (width, height) = img.dimensions();
    Frame::new(width, height, img.into_raw()).context("decoded image has unexpected layout")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hand::Landmark;

    fn line(t_ms: u64, hands: usize, image: Option<&str>) -> String {
        let hand = vec![Landmark::new(0.5, 0.5, 0.0); 21];
        let hands: Vec<_> = (0..hands).map(|_| hand.clone()).collect();
        let mut value = serde_json::json!({
            "t_ms": t_ms,
            "multiHandLandmarks": hands,
        });
        if let Some(image) = image {
            value["image"] = serde_json::json!(image);
        }
        value.to_string()
    }

    #[test]
    fn test_parse_resolves_relative_images() {
        let content = format!(
            "{}\n\n{}\n",
            line(33, 1, Some("frames/a.png")),
            line(0, 0, Some("/abs/b.png"))
        );
        let rec = Recording::parse(&content, Path::new("/data/rec")).unwrap();
        assert_eq!(rec.len(), 2);
        // sorted by time
        assert_eq!(rec.frames()[0].t_ms, 0);
        assert!(!rec.frames()[0].detection.has_hands());
        assert!(matches!(
            &rec.frames()[1].detection.image,
            Some(FrameRef::Path(p)) if p == Path::new("/data/rec/frames/a.png")
        ));
        assert!(matches!(
            &rec.frames()[0].detection.image,
            Some(FrameRef::Path(p)) if p == Path::new("/abs/b.png")
        ));
        assert_eq!(rec.duration(), Duration::from_millis(33));
    }

    #[test]
    fn test_parse_reports_line() {
        let content = format!("{}\nnot json\n", line(0, 1, None));
        let err = Recording::parse(&content, Path::new(".")).unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn test_scripted_detector_loops() {
        let content = format!("{}\n{}\n{}\n", line(0, 0, None), line(100, 2, Some("a.png")), line(300, 1, None));
        let detector = Recording::parse(&content, Path::new(".")).unwrap().into_detector();

        assert_eq!(detector.at(Duration::from_millis(50)).hand_count(), 0);
        let hands = detector.at(Duration::from_millis(150));
        assert_eq!(hands.hand_count(), 2);
        assert!(hands.image.is_none());
        // wraps after the last timestamp
        assert_eq!(detector.at(Duration::from_millis(450)).hand_count(), 2);
        assert_eq!(detector.at(Duration::from_millis(650)).hand_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_publishes_stills_on_schedule() {
        let dir = tempfile::tempdir().unwrap();
        image::RgbImage::from_pixel(6, 4, image::Rgb([9, 8, 7]))
            .save(dir.path().join("still.png"))
            .unwrap();
        let path = dir.path().join("rec.jsonl");
        std::fs::write(
            &path,
            format!(
                "{}\n{}\n{}\n",
                line(0, 1, Some("still.png")),
                line(500, 1, Some("still.png")),
                line(1000, 0, None)
            ),
        )
        .unwrap();

        let rec = Recording::load(&path).unwrap();
        let snapshots = LatestFrame::new();
        let (tx, mut rx) = mpsc::channel(8);
        let start = Instant::now();
        tokio::spawn(rec.play(tx, snapshots.clone()));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.pixels().unwrap().pixel(0, 0), Some([9, 8, 7]));
        assert_eq!(snapshots.latest_frame().unwrap().width, 6);

        let second = rx.recv().await.unwrap();
        assert!(second.pixels().is_some());
        assert!(start.elapsed() >= Duration::from_millis(500));

        let third = rx.recv().await.unwrap();
        assert!(!third.has_hands());
        assert!(rx.recv().await.is_none());
    }
}
