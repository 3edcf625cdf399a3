use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::warn;

use crate::oracle::VerdictPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub projection: ProjectionConfig,
    #[serde(default)]
    pub smooth: SmoothConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub coach: CoachConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Sustained detection needed before auto-verify (ms)
    #[serde(default = "default_verify_ms")]
    pub verify_ms: u64,
    /// Countdown tick granularity (ms)
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Delay between a correct result and the lesson-complete callback (ms)
    #[serde(default = "default_correct_delay_ms")]
    pub correct_delay_ms: u64,
    /// Delay before an incorrect result is cleared and auto-verify re-arms (ms)
    #[serde(default = "default_incorrect_delay_ms")]
    pub incorrect_delay_ms: u64,
    /// How long incorrect-verdict feedback stays on screen (ms)
    #[serde(default = "default_feedback_display_ms")]
    pub feedback_display_ms: u64,
    /// Tolerated hand loss before the countdown resets (ms). 0 = strict.
    #[serde(default)]
    pub hand_loss_grace_ms: u64,
    /// Mirror snapshots like the on-screen preview
    #[serde(default = "default_true")]
    pub mirror_snapshot: bool,
    /// JPEG quality of snapshots (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_verify_ms() -> u64 { 5000 }
fn default_tick_ms() -> u64 { 50 }
fn default_correct_delay_ms() -> u64 { 5500 }
fn default_incorrect_delay_ms() -> u64 { 6000 }
fn default_feedback_display_ms() -> u64 { 6000 }
fn default_true() -> bool { true }
fn default_jpeg_quality() -> u8 { 85 }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            verify_ms: default_verify_ms(),
            tick_ms: default_tick_ms(),
            correct_delay_ms: default_correct_delay_ms(),
            incorrect_delay_ms: default_incorrect_delay_ms(),
            feedback_display_ms: default_feedback_display_ms(),
            hand_loss_grace_ms: 0,
            mirror_snapshot: default_true(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl SessionConfig {
    pub fn verify_duration(&self) -> Duration {
        Duration::from_millis(self.verify_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn correct_delay(&self) -> Duration {
        Duration::from_millis(self.correct_delay_ms)
    }

    pub fn incorrect_delay(&self) -> Duration {
        Duration::from_millis(self.incorrect_delay_ms)
    }

    pub fn feedback_display(&self) -> Duration {
        Duration::from_millis(self.feedback_display_ms)
    }

    pub fn hand_loss_grace(&self) -> Duration {
        Duration::from_millis(self.hand_loss_grace_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProjectionConfig {
    /// Margin fraction for the bounding-fit view
    #[serde(default = "default_padding")]
    pub padding: f32,
    /// Mirror the 2-D overlay horizontally
    #[serde(default = "default_true")]
    pub mirror_overlay: bool,
    /// Auxiliary world-view canvas size (px)
    #[serde(default = "default_world_view_size")]
    pub world_view_size: u32,
    /// Holographic canvas size (px)
    #[serde(default = "default_orbit_view_size")]
    pub orbit_view_size: u32,
    /// Rotation per render tick (rad)
    #[serde(default = "default_orbit_step")]
    pub orbit_step: f32,
    /// Metres → pixels for world landmarks
    #[serde(default = "default_orbit_scale")]
    pub orbit_scale: f32,
    /// Vertical shift of the holographic hand (px)
    #[serde(default = "default_orbit_offset_y")]
    pub orbit_offset_y: f32,
}

fn default_padding() -> f32 { 0.4 }
fn default_world_view_size() -> u32 { 192 }
fn default_orbit_view_size() -> u32 { 320 }
fn default_orbit_step() -> f32 { 0.015 }
fn default_orbit_scale() -> f32 { 1000.0 }
fn default_orbit_offset_y() -> f32 { 50.0 }

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            padding: default_padding(),
            mirror_overlay: default_true(),
            world_view_size: default_world_view_size(),
            orbit_view_size: default_orbit_view_size(),
            orbit_step: default_orbit_step(),
            orbit_scale: default_orbit_scale(),
            orbit_offset_y: default_orbit_offset_y(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmoothConfig {
    /// EMA weight of the newest frame (1.0 = no smoothing)
    #[serde(default = "default_smooth_alpha")]
    pub alpha: f32,
}

fn default_smooth_alpha() -> f32 { 1.0 }

impl Default for SmoothConfig {
    fn default() -> Self {
        Self {
            alpha: default_smooth_alpha(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default)]
    pub index: i32,
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
    #[serde(default = "default_camera_fps")]
    pub fps: u32,
    /// Poll interval of the frame-delivery task (ms)
    #[serde(default = "default_frame_poll_ms")]
    pub frame_poll_ms: u64,
}

fn default_camera_width() -> u32 { 1280 }
fn default_camera_height() -> u32 { 720 }
fn default_camera_fps() -> u32 { 30 }
fn default_frame_poll_ms() -> u64 { 5 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: default_camera_width(),
            height: default_camera_height(),
            fps: default_camera_fps(),
            frame_poll_ms: default_frame_poll_ms(),
        }
    }
}

impl CameraConfig {
    pub fn frame_poll_interval(&self) -> Duration {
        Duration::from_millis(self.frame_poll_ms.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AudioConfig {
    #[serde(default = "default_input_rate")]
    pub input_sample_rate: u32,
    #[serde(default = "default_output_rate")]
    pub output_sample_rate: u32,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_input_rate() -> u32 { 16000 }
fn default_output_rate() -> u32 { 24000 }
fn default_buffer_size() -> usize { 4096 }

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: default_input_rate(),
            output_sample_rate: default_output_rate(),
            buffer_size: default_buffer_size(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CoachConfig {
    /// Snapshot streaming period (ms)
    #[serde(default = "default_snapshot_period_ms")]
    pub snapshot_period_ms: u64,
}

fn default_snapshot_period_ms() -> u64 { 1000 }

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            snapshot_period_ms: default_snapshot_period_ms(),
        }
    }
}

impl CoachConfig {
    pub fn snapshot_period(&self) -> Duration {
        Duration::from_millis(self.snapshot_period_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OracleConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Bound on one evaluation call (ms)
    #[serde(default = "default_oracle_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub verdict: VerdictPolicy,
}

fn default_endpoint() -> String { "https://generativelanguage.googleapis.com/v1beta".to_string() }
fn default_model() -> String { "gemini-2.0-flash".to_string() }
fn default_api_key_env() -> String { "GEMINI_API_KEY".to_string() }
fn default_oracle_timeout_ms() -> u64 { 15000 }

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_ms: default_oracle_timeout_ms(),
            verdict: VerdictPolicy::default(),
        }
    }
}

impl OracleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuotaConfig {
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    /// Best-effort persistence of the daily counter
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Refuse oracle calls once the limit is reached
    #[serde(default)]
    pub enforce: bool,
}

fn default_daily_limit() -> u32 { 100 }

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: default_daily_limit(),
            path: None,
            enforce: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProgressConfig {
    #[serde(default = "default_progress_dir")]
    pub dir: PathBuf,
}

fn default_progress_dir() -> PathBuf { PathBuf::from("progress") }

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            dir: default_progress_dir(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Falls back to defaults when the file is missing or invalid
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("using default config: {:#}", e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let p = self.projection.padding;
        if !(0.0..1.0).contains(&p) {
            bail!("projection.padding must be in [0, 1), got {}", p);
        }
        if self.session.verify_ms == 0 || self.session.tick_ms == 0 {
            bail!("session.verify_ms and session.tick_ms must be positive");
        }
        if self.session.incorrect_delay_ms < self.session.feedback_display_ms {
            bail!(
                "session.incorrect_delay_ms ({}) must not be shorter than feedback_display_ms ({})",
                self.session.incorrect_delay_ms,
                self.session.feedback_display_ms
            );
        }
        if !(1..=100).contains(&self.session.jpeg_quality) {
            bail!("session.jpeg_quality must be in 1..=100");
        }
        if self.audio.input_sample_rate == 0 || self.audio.output_sample_rate == 0 || self.audio.buffer_size == 0 {
            bail!("audio sample rates and buffer_size must be positive");
        }
        if self.oracle.timeout_ms == 0 {
            bail!("oracle.timeout_ms must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.session.verify_ms, 5000);
        assert_eq!(config.session.incorrect_delay_ms, 6000);
        assert!(config.session.incorrect_delay_ms > config.session.correct_delay_ms);
        assert!((config.projection.padding - 0.4).abs() < 1e-6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [session]
            verify_ms = 3000

            [oracle]
            verdict = { score_threshold = 80 }
            "#,
        )
        .unwrap();
        assert_eq!(config.session.verify_ms, 3000);
        assert_eq!(config.session.tick_ms, 50);
        assert_eq!(config.oracle.verdict, VerdictPolicy::ScoreThreshold(80));
        assert_eq!(config.camera.width, 1280);
    }

    #[test]
    fn test_sample_config_is_valid() {
        let config = Config::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml")).unwrap();
        assert_eq!(config.oracle.verdict, VerdictPolicy::TrustFlag);
        assert_eq!(config.quota.path.as_deref(), Some(Path::new("quota.json")));
    }

    #[test]
    fn test_short_incorrect_delay_rejected() {
        let mut config = Config::default();
        config.session.incorrect_delay_ms = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_audio_rate_rejected() {
        let mut config = Config::default();
        config.audio.output_sample_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_padding_rejected() {
        let mut config = Config::default();
        config.projection.padding = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[projection]\npadding = 0.2").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert!((config.projection.padding - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = Config::load_or_default("/nonexistent/signify.toml");
        assert_eq!(config.session.verify_ms, 5000);
    }
}
