//! Live coaching: streams stills and microphone audio to a realtime tutor
//! service and nudges it when the automated verdict arrives.
//!
//! The tutor connection itself is a black box behind [`CoachChannel`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::hand::Frame;
use crate::lesson::Lesson;
use crate::media::{MediaError, MediaSession, Snapshot};
use crate::oracle::Judgment;

/// Stills and audio formats of one coaching session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoachSettings {
    pub mirror: bool,
    pub jpeg_quality: u8,
    /// Microphone PCM rate sent to the tutor
    pub input_sample_rate: u32,
    /// Rate of the tutor's PCM speech
    pub output_sample_rate: u32,
    /// Samples per outgoing audio chunk
    pub buffer_size: usize,
}

impl CoachSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mirror: config.session.mirror_snapshot,
            jpeg_quality: config.session.jpeg_quality,
            input_sample_rate: config.audio.input_sample_rate,
            output_sample_rate: config.audio.output_sample_rate,
            buffer_size: config.audio.buffer_size.max(1),
        }
    }
}

impl Default for CoachSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioChunk {
    /// Base64 of little-endian 16-bit PCM
    pub data: String,
    pub mime_type: String,
}

#[async_trait]
pub trait CoachChannel: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<()>;
    /// Base64 JPEG still
    async fn send_image(&self, jpeg_base64: &str) -> Result<()>;
    async fn send_audio(&self, chunk: &AudioChunk) -> Result<()>;
}

/// Clip to [-1, 1] and scale to signed 16-bit, little-endian
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|s| {
            let v = (s * 32768.0).clamp(-32768.0, 32767.0) as i16;
            v.to_le_bytes()
        })
        .collect()
}

/// Inverse of [`encode_pcm16`] for tutor speech playback; odd trailing bytes are ignored
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect()
}

pub fn pcm_mime(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

pub fn pcm_chunk(samples: &[f32], sample_rate: u32) -> AudioChunk {
    AudioChunk {
        data: STANDARD.encode(encode_pcm16(samples)),
        mime_type: pcm_mime(sample_rate),
    }
}

/// Decoded tutor speech, ready for an output device
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl SpeechClip {
    /// Decode base64 mono PCM16 sent by the tutor
    pub fn decode(data: &str, sample_rate: u32) -> Result<Self> {
        let bytes = STANDARD.decode(data).context("tutor audio is not valid base64")?;
        Ok(Self {
            samples: decode_pcm16(&bytes),
            sample_rate,
        })
    }

    /// Playback length; consecutive clips are queued back to back
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.samples.len() as u64 * 1_000_000_000 / self.sample_rate as u64)
    }
}

pub fn system_instruction(lesson: &Lesson) -> String {
    format!(
        "You are \"Signify\", a friendly and encouraging ASL tutor.\n\
         The user is currently learning the sign for: \"{}\".\n\
         Description: \"{}\".\n\n\
         Rules:\n\
         1. When the session starts, briefly introduce the sign and how to do it.\n\
         2. Use the provided video frames to see the user's hands.\n\
         3. Be concise. Don't talk over the user for too long.\n\
         4. Give real-time corrective feedback based on what you see in the frames.\n\
         5. If the user succeeds, give them a warm compliment!",
        lesson.title, lesson.description
    )
}

/// First message once the tutor connection is open
pub fn intro_prompt(lesson: &Lesson) -> String {
    format!(
        "Hi! I'm your tutor. Let's practice the sign for \"{}\". {}. Show me your hand when you're ready!",
        lesson.title,
        lesson.description.trim_end_matches('.')
    )
}

/// Relays an automated verdict so the tutor can react to it
pub fn guidance_prompt(judgment: &Judgment, lesson: &Lesson) -> String {
    if judgment.is_correct {
        format!(
            "The automated system just verified their sign was correct with a score of {}%. \
             Give them a big enthusiastic congratulations!",
            judgment.score
        )
    } else {
        format!(
            "The automated system noticed an issue: {}. \
             Politely guide them on how to fix it based on the description: {}",
            judgment.feedback, lesson.description
        )
    }
}

pub struct LiveCoach {
    channel: Arc<dyn CoachChannel>,
    lesson: Lesson,
    settings: CoachSettings,
    muted: AtomicBool,
    cancel: CancellationToken,
    sampler: Option<JoinHandle<()>>,
}

impl LiveCoach {
    /// Send the intro and start forwarding sampled frames as JPEG stills
    pub async fn start(
        channel: Arc<dyn CoachChannel>,
        lesson: Lesson,
        mut frames: mpsc::Receiver<Arc<Frame>>,
        settings: CoachSettings,
    ) -> Self {
        if let Err(e) = channel.send_text(&intro_prompt(&lesson)).await {
            warn!("coach intro failed: {:#}", e);
        }

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task_channel = channel.clone();
        let sampler = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    frame = frames.recv() => match frame {
                        Some(frame) => frame,
                        None => break,
                    },
                };
                let snapshot = match Snapshot::capture(&frame, settings.mirror, settings.jpeg_quality) {
                    Ok(s) => s,
                    Err(e) => {
                        debug!("skipping coach frame: {:#}", e);
                        continue;
                    }
                };
                if let Err(e) = task_channel.send_image(&snapshot.to_base64()).await {
                    warn!("coach frame not sent: {:#}", e);
                }
            }
            debug!("coach sampler stopped");
        });

        info!(lesson = %lesson.id, "live coach started");
        Self {
            channel,
            lesson,
            settings,
            muted: AtomicBool::new(false),
            cancel,
            sampler: Some(sampler),
        }
    }

    /// Start on an active media session, sampling its frames at the configured period
    pub async fn attach(
        channel: Arc<dyn CoachChannel>,
        lesson: Lesson,
        media: &mut MediaSession,
        config: &Config,
    ) -> Result<Self, MediaError> {
        let frames = media.add_sampler(config.coach.snapshot_period())?;
        Ok(Self::start(channel, lesson, frames, CoachSettings::from_config(config)).await)
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// Forward microphone samples in `buffer_size` chunks; dropped while muted or stopped
    pub async fn send_audio(&self, samples: &[f32]) {
        if !self.is_active() || self.muted.load(Ordering::Relaxed) {
            return;
        }
        for part in samples.chunks(self.settings.buffer_size) {
            let chunk = pcm_chunk(part, self.settings.input_sample_rate);
            if let Err(e) = self.channel.send_audio(&chunk).await {
                warn!("coach audio not sent: {:#}", e);
                return;
            }
        }
    }

    /// Tutor speech at the configured output rate
    pub fn decode_speech(&self, data: &str) -> Result<SpeechClip> {
        SpeechClip::decode(data, self.settings.output_sample_rate)
    }

    pub async fn on_feedback(&self, judgment: &Judgment) {
        if !self.is_active() {
            return;
        }
        if let Err(e) = self.channel.send_text(&guidance_prompt(judgment, &self.lesson)).await {
            warn!("coach guidance not sent: {:#}", e);
        }
    }

    pub fn stop(&mut self) {
        if !self.is_active() {
            return;
        }
        self.cancel.cancel();
        if let Some(task) = self.sampler.take() {
            task.abort();
        }
        info!(lesson = %self.lesson.id, "live coach stopped");
    }
}

impl Drop for LiveCoach {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lesson::alphabet_lessons;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Text(String),
        Image,
        Audio(AudioChunk),
    }

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Sent>>,
    }

    impl Recorder {
        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CoachChannel for Recorder {
        async fn send_text(&self, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push(Sent::Text(text.to_string()));
            Ok(())
        }

        async fn send_image(&self, jpeg_base64: &str) -> Result<()> {
            assert!(STANDARD.decode(jpeg_base64).is_ok());
            self.sent.lock().unwrap().push(Sent::Image);
            Ok(())
        }

        async fn send_audio(&self, chunk: &AudioChunk) -> Result<()> {
            self.sent.lock().unwrap().push(Sent::Audio(chunk.clone()));
            Ok(())
        }
    }

    fn lesson_a() -> Lesson {
        alphabet_lessons().remove(0)
    }

    #[test]
    fn test_encode_pcm16_clips_and_scales() {
        let bytes = encode_pcm16(&[0.0, 1.0, -1.0, 0.5, 2.0]);
        let values: Vec<i16> = bytes.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect();
        assert_eq!(values, vec![0, 32767, -32768, 16384, 32767]);
    }

    #[test]
    fn test_decode_pcm16() {
        let samples = decode_pcm16(&encode_pcm16(&[0.5, -0.25]));
        assert!((samples[0] - 0.5).abs() < 1e-4);
        assert!((samples[1] + 0.25).abs() < 1e-4);
        assert!(decode_pcm16(&[1]).is_empty());
    }

    #[test]
    fn test_pcm_chunk_mime() {
        let chunk = pcm_chunk(&[0.0; 4], 16000);
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        assert_eq!(STANDARD.decode(chunk.data).unwrap().len(), 8);
        assert_eq!(pcm_chunk(&[0.0], 44100).mime_type, "audio/pcm;rate=44100");
    }

    #[test]
    fn test_settings_follow_audio_config() {
        let mut config = Config::default();
        config.audio.input_sample_rate = 48000;
        config.audio.output_sample_rate = 22050;
        config.audio.buffer_size = 0;
        let settings = CoachSettings::from_config(&config);
        assert_eq!(settings.input_sample_rate, 48000);
        assert_eq!(settings.output_sample_rate, 22050);
        assert_eq!(settings.buffer_size, 1);
        assert_eq!(CoachSettings::default().input_sample_rate, 16000);
    }

    #[test]
    fn test_speech_clip_duration() {
        let data = STANDARD.encode(encode_pcm16(&[0.0; 12000]));
        let clip = SpeechClip::decode(&data, 24000).unwrap();
        assert_eq!(clip.samples.len(), 12000);
        assert_eq!(clip.duration(), Duration::from_millis(500));
        assert!(SpeechClip::decode("not base64!", 24000).is_err());
    }

    #[test]
    fn test_prompts() {
        let lesson = lesson_a();
        let intro = intro_prompt(&lesson);
        assert!(intro.contains("\"A\""));
        assert!(intro.contains("Sign for letter A. Show me"));

        let ok = Judgment {
            score: 88,
            is_correct: true,
            feedback: "Nice".into(),
        };
        assert!(guidance_prompt(&ok, &lesson).contains("score of 88%"));

        let bad = Judgment::failure("Thumb is tucked");
        let text = guidance_prompt(&bad, &lesson);
        assert!(text.contains("Thumb is tucked"));
        assert!(text.contains(&lesson.description));
        assert!(system_instruction(&lesson).contains("\"A\""));
    }

    struct NoDevices;

    #[async_trait]
    impl crate::media::MediaBackend for NoDevices {
        async fn open_camera(
            &self,
            _config: &crate::config::CameraConfig,
        ) -> Result<Box<dyn crate::media::CameraStream>, MediaError> {
            Err(MediaError::camera("none"))
        }

        async fn open_microphone(
            &self,
            _config: &crate::config::AudioConfig,
        ) -> Result<Box<dyn crate::media::AudioStream>, MediaError> {
            Err(MediaError::microphone("none"))
        }
    }

    #[tokio::test]
    async fn test_attach_requires_active_media() {
        let config = Config::default();
        let mut media = MediaSession::new(Arc::new(NoDevices), config.camera.clone(), config.audio.clone());
        let recorder = Arc::new(Recorder::default());
        let result = LiveCoach::attach(recorder.clone(), lesson_a(), &mut media, &config).await;
        assert!(matches!(result, Err(MediaError::NotActive(_))));
        assert!(recorder.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_coach_streams_frames_until_stopped() {
        let recorder = Arc::new(Recorder::default());
        let (tx, rx) = mpsc::channel(1);
        let settings = CoachSettings {
            buffer_size: 2,
            input_sample_rate: 8000,
            ..CoachSettings::default()
        };
        let mut coach = LiveCoach::start(recorder.clone(), lesson_a(), rx, settings).await;
        assert!(matches!(&recorder.sent()[0], Sent::Text(t) if t.starts_with("Hi!")));

        tx.send(Arc::new(Frame::filled(8, 8, [0, 0, 0]))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(recorder.sent().iter().filter(|s| **s == Sent::Image).count(), 1);

        coach.on_feedback(&Judgment::failure("Try again")).await;
        // three samples in chunks of two
        coach.send_audio(&[0.1, 0.2, 0.3]).await;
        coach.set_muted(true);
        coach.send_audio(&[0.1, 0.2]).await;
        let audio: Vec<AudioChunk> = recorder
            .sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Audio(chunk) => Some(chunk),
                _ => None,
            })
            .collect();
        assert_eq!(audio.len(), 2);
        assert!(audio.iter().all(|c| c.mime_type == "audio/pcm;rate=8000"));
        assert_eq!(STANDARD.decode(&audio[1].data).unwrap().len(), 2);
        assert_eq!(recorder.sent().len(), 5);

        let clip = coach.decode_speech(&STANDARD.encode(encode_pcm16(&[0.0; 240]))).unwrap();
        assert_eq!(clip.sample_rate, 24000);
        assert_eq!(clip.duration(), Duration::from_millis(10));

        coach.stop();
        coach.stop();
        assert!(!coach.is_active());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(tx.send(Arc::new(Frame::filled(8, 8, [0, 0, 0]))).await.is_err());
        coach.on_feedback(&Judgment::failure("ignored")).await;
        assert_eq!(recorder.sent().len(), 5);
    }
}
