use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureAPIs},
};
use tracing::{info, warn};

use super::{AudioStream, CameraStream, MediaBackend, MediaError};
use crate::config::{AudioConfig, CameraConfig};
use crate::hand::Frame;

/// Blocking OpenCV capture device
pub struct OpenCvCamera {
    capture: VideoCapture,
    width: u32,
    height: u32,
}

impl OpenCvCamera {
    /// Open the device and request the configured resolution and rate
    pub fn open(config: &CameraConfig) -> Result<Self> {
        let mut capture = VideoCapture::new(config.index, VideoCaptureAPIs::CAP_ANY as i32)
            .with_context(|| format!("failed to open camera {}", config.index))?;

        if !capture.is_opened()? {
            anyhow::bail!("camera {} is not available", config.index);
        }

        capture.set(videoio::CAP_PROP_FRAME_WIDTH, config.width as f64)?;
        capture.set(videoio::CAP_PROP_FRAME_HEIGHT, config.height as f64)?;
        capture.set(videoio::CAP_PROP_FPS, config.fps as f64)?;
        capture.set(videoio::CAP_PROP_BUFFERSIZE, 1.0)?;

        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;
        info!(index = config.index, width, height, "camera opened");

        Ok(Self { capture, width, height })
    }

    /// Resolution the driver actually granted
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Next frame, converted from OpenCV's BGR to RGB
    pub fn read_frame(&mut self) -> Result<Frame> {
        let mut bgr = Mat::default();
        self.capture.read(&mut bgr).context("failed to read frame")?;
        if bgr.empty() {
            anyhow::bail!("empty frame received");
        }
        mat_to_frame(&bgr)
    }
}

fn mat_to_frame(bgr: &Mat) -> Result<Frame> {
    let mut rgb = Mat::default();
    imgproc::cvt_color_def(bgr, &mut rgb, imgproc::COLOR_BGR2RGB)?;
    let width = rgb.cols() as u32;
    let height = rgb.rows() as u32;
    let bytes = rgb.data_bytes()?.to_vec();
    Frame::new(width, height, bytes).context("unexpected frame layout")
}

/// Captures on a background thread and keeps only the newest frame
pub struct ThreadedCamera {
    latest: Arc<Mutex<Option<Arc<Frame>>>>,
    frame_id: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    width: u32,
    height: u32,
}

impl ThreadedCamera {
    /// Open the camera and start the capture thread
    pub fn start(config: &CameraConfig) -> Result<Self> {
        let mut camera = OpenCvCamera::open(config)?;
        let (width, height) = camera.resolution();
        let latest = Arc::new(Mutex::new(None::<Arc<Frame>>));
        let frame_id = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));

        let latest_ref = latest.clone();
        let frame_id_ref = frame_id.clone();
        let running_ref = running.clone();
        let index = config.index;

        thread::spawn(move || {
            while running_ref.load(Ordering::Relaxed) {
                match camera.read_frame() {
                    Ok(frame) => {
                        if let Ok(mut slot) = latest_ref.lock() {
                            *slot = Some(Arc::new(frame));
                        }
                        frame_id_ref.fetch_add(1, Ordering::Release);
                    }
                    Err(e) => {
                        warn!(index, "camera read error: {:#}", e);
                        thread::sleep(Duration::from_millis(100));
                    }
                }
            }
            info!(index, "capture thread stopped");
        });

        Ok(Self {
            latest,
            frame_id,
            running,
            width,
            height,
        })
    }

    /// Resolution the driver actually granted
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl CameraStream for ThreadedCamera {
    fn frame_id(&self) -> u64 {
        self.frame_id.load(Ordering::Acquire)
    }

    fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.latest.lock().ok().and_then(|slot| slot.clone())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

impl Drop for ThreadedCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Local cameras through OpenCV. Audio capture is not supported.
#[derive(Debug, Default)]
pub struct OpenCvBackend;

#[async_trait]
impl MediaBackend for OpenCvBackend {
    async fn open_camera(&self, config: &CameraConfig) -> Result<Box<dyn CameraStream>, MediaError> {
        let config = config.clone();
        let camera = tokio::task::spawn_blocking(move || ThreadedCamera::start(&config))
            .await
            .map_err(|e| MediaError::camera(e.to_string()))?
            .map_err(|e| MediaError::camera(format!("{:#}", e)))?;
        Ok(Box::new(camera))
    }

    async fn open_microphone(&self, _config: &AudioConfig) -> Result<Box<dyn AudioStream>, MediaError> {
        Err(MediaError::microphone("audio capture is not supported by the OpenCV backend"))
    }
}
