//! Camera and microphone ownership for one session view.
//!
//! A [`MediaSession`] opens the devices through a [`MediaBackend`], runs the
//! frame-delivery task that feeds the landmark detector, and tears everything
//! down exactly once when released or dropped.

#[cfg(feature = "desktop")]
pub mod capture;
pub mod snapshot;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{AudioConfig, CameraConfig};
use crate::hand::{DetectionFrame, Frame, FrameRef};

#[cfg(feature = "desktop")]
pub use capture::{OpenCvBackend, ThreadedCamera};
pub use snapshot::Snapshot;

/// Detection results buffered between the detector and the session loop
const FRAME_QUEUE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    Unacquired,
    Acquiring,
    Active,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Camera only
    Practice,
    /// Camera and microphone
    Coaching,
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{device} unavailable: {reason}")]
    Unavailable { device: &'static str, reason: String },
    #[error("media session is not active ({0:?})")]
    NotActive(MediaState),
}

impl MediaError {
    pub fn camera(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            device: "camera",
            reason: reason.into(),
        }
    }

    pub fn microphone(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            device: "microphone",
            reason: reason.into(),
        }
    }
}

/// Device access, e.g. OpenCV capture or a test double
#[async_trait]
pub trait MediaBackend: Send + Sync {
    async fn open_camera(&self, config: &CameraConfig) -> Result<Box<dyn CameraStream>, MediaError>;
    async fn open_microphone(&self, config: &AudioConfig) -> Result<Box<dyn AudioStream>, MediaError>;
}

pub trait CameraStream: Send + Sync {
    /// Increments whenever a new frame arrives
    fn frame_id(&self) -> u64;
    /// Most recent frame; `None` before the first one
    fn latest_frame(&self) -> Option<Arc<Frame>>;
    fn stop(&self);
}

pub trait AudioStream: Send + Sync {
    fn close(&self);
}

/// Hand landmark model (black box)
pub trait LandmarkDetector: Send {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<DetectionFrame>;
}

/// Where the session reads the still it sends for evaluation
pub trait SnapshotSource: Send + Sync {
    fn latest_frame(&self) -> Option<Arc<Frame>>;
}

/// Shared slot holding the last delivered frame
#[derive(Debug, Clone, Default)]
pub struct LatestFrame {
    slot: Arc<Mutex<Option<Arc<Frame>>>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: Arc<Frame>) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(frame);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

impl SnapshotSource for LatestFrame {
    fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }
}

pub struct MediaSession {
    backend: Arc<dyn MediaBackend>,
    camera_config: CameraConfig,
    audio_config: AudioConfig,
    state: MediaState,
    camera: Option<Arc<dyn CameraStream>>,
    audio: Option<Box<dyn AudioStream>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    latest: LatestFrame,
}

impl MediaSession {
    pub fn new(backend: Arc<dyn MediaBackend>, camera_config: CameraConfig, audio_config: AudioConfig) -> Self {
        Self {
            backend,
            camera_config,
            audio_config,
            state: MediaState::Unacquired,
            camera: None,
            audio: None,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            latest: LatestFrame::new(),
        }
    }

    pub fn state(&self) -> MediaState {
        self.state
    }

    /// Frame slot kept current by the delivery task
    pub fn snapshots(&self) -> LatestFrame {
        self.latest.clone()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Open the devices for `kind` and start feeding `detector`.
    ///
    /// An active session is released first. On failure everything opened so
    /// far is closed again and the manager returns to `Unacquired`.
    pub async fn acquire(
        &mut self,
        kind: SessionKind,
        detector: Box<dyn LandmarkDetector>,
    ) -> Result<mpsc::Receiver<DetectionFrame>, MediaError> {
        if self.state == MediaState::Active {
            self.release();
        }
        self.state = MediaState::Acquiring;
        info!(?kind, "acquiring media");

        let camera: Arc<dyn CameraStream> = match self.backend.open_camera(&self.camera_config).await {
            Ok(camera) => Arc::from(camera),
            Err(e) => {
                warn!("{}", e);
                self.state = MediaState::Unacquired;
                return Err(e);
            }
        };

        let audio = match kind {
            SessionKind::Practice => None,
            SessionKind::Coaching => match self.backend.open_microphone(&self.audio_config).await {
                Ok(audio) => Some(audio),
                Err(e) => {
                    warn!("{}", e);
                    camera.stop();
                    self.state = MediaState::Unacquired;
                    return Err(e);
                }
            },
        };

        self.cancel = CancellationToken::new();
        self.latest.clear();
        let (tx, rx) = mpsc::channel(FRAME_QUEUE);
        self.tasks.push(tokio::spawn(deliver_frames(
            camera.clone(),
            detector,
            self.latest.clone(),
            tx,
            self.cancel.clone(),
            self.camera_config.frame_poll_interval(),
        )));

        self.camera = Some(camera);
        self.audio = audio;
        self.state = MediaState::Active;
        info!(?kind, "media active");
        Ok(rx)
    }

    /// Periodic sampler of the latest frame, stopped by `release`.
    ///
    /// Samples are dropped while the receiver is behind.
    pub fn add_sampler(&mut self, period: Duration) -> Result<mpsc::Receiver<Arc<Frame>>, MediaError> {
        if self.state != MediaState::Active {
            return Err(MediaError::NotActive(self.state));
        }
        let (tx, rx) = mpsc::channel(1);
        let latest = self.latest.clone();
        let cancel = self.cancel.clone();
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(frame) = latest.latest_frame() else { continue };
                        match tx.try_send(frame) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => trace!("sampler behind, dropping frame"),
                            Err(mpsc::error::TrySendError::Closed(_)) => break,
                        }
                    }
                }
            }
        }));
        Ok(rx)
    }

    /// Stop every task and device. Safe to call any number of times.
    pub fn release(&mut self) {
        if self.state == MediaState::Released {
            return;
        }
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(camera) = self.camera.take() {
            camera.stop();
        }
        if let Some(audio) = self.audio.take() {
            audio.close();
        }
        self.latest.clear();
        self.state = MediaState::Released;
        info!("media released");
    }
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        self.release();
    }
}

async fn deliver_frames(
    camera: Arc<dyn CameraStream>,
    mut detector: Box<dyn LandmarkDetector>,
    latest: LatestFrame,
    tx: mpsc::Sender<DetectionFrame>,
    cancel: CancellationToken,
    poll: Duration,
) {
    let mut ticker = time::interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_id = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let id = camera.frame_id();
        if id == last_id {
            continue;
        }
        last_id = id;

        let Some(frame) = camera.latest_frame() else {
            continue;
        };
        latest.publish(frame.clone());

        let detection = match detector.detect(&frame) {
            Ok(d) => d,
            Err(e) => {
                warn!("landmark detection failed: {:#}", e);
                continue;
            }
        };
        let detection = DetectionFrame {
            image: Some(FrameRef::Pixels(frame)),
            ..detection
        }
        .clamped();

        if tx.send(detection).await.is_err() {
            debug!("detection receiver dropped");
            break;
        }
    }
}
