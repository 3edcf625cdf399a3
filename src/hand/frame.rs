use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use super::landmark::Hand;

/// The detector is configured for at most two hands; anything beyond is dropped.
pub const MAX_HANDS: usize = 2;

/// Raw RGB8 video frame
#[derive(Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Row-major RGB, `width * height * 3` bytes
    pub rgb: Vec<u8>,
}

impl Frame {
    /// `None` unless `rgb` holds exactly `width * height` RGB triples
    pub fn new(width: u32, height: u32, rgb: Vec<u8>) -> Option<Self> {
        if rgb.len() != width as usize * height as usize * 3 {
            return None;
        }
        Some(Self { width, height, rgb })
    }

    /// Single-colour frame, handy for placeholders
    pub fn filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        let rgb = color
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self { width, height, rgb }
    }

    /// RGB at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.rgb[i], self.rgb[i + 1], self.rgb[i + 2]])
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgb.len())
            .finish()
    }
}

/// Source video frame attached to a detection result
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FrameRef {
    /// Encoded still on disk (recordings)
    Path(PathBuf),
    /// Decoded pixels (live capture)
    #[serde(skip)]
    Pixels(Arc<Frame>),
}

/// One detector callback.
///
/// Hand arrays are always present; an absent field in the input means "no hands".
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionFrame {
    #[serde(default)]
    pub multi_hand_landmarks: Vec<Hand>,
    #[serde(default)]
    pub multi_hand_world_landmarks: Vec<Hand>,
    #[serde(default)]
    pub image: Option<FrameRef>,
}

impl DetectionFrame {
    /// Build a detection, clamped to `MAX_HANDS`
    pub fn new(image_hands: Vec<Hand>, world_hands: Vec<Hand>, image: Option<FrameRef>) -> Self {
        Self {
            multi_hand_landmarks: image_hands,
            multi_hand_world_landmarks: world_hands,
            image,
        }
        .clamped()
    }

    /// No hands, no image
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of image-space hands
    pub fn hand_count(&self) -> usize {
        self.multi_hand_landmarks.len()
    }

    /// At least one hand detected
    pub fn has_hands(&self) -> bool {
        !self.multi_hand_landmarks.is_empty()
    }

    /// Drops hands beyond `MAX_HANDS`
    pub fn clamped(mut self) -> Self {
        if self.multi_hand_landmarks.len() > MAX_HANDS {
            debug!(
                "dropping {} extra hands",
                self.multi_hand_landmarks.len() - MAX_HANDS
            );
            self.multi_hand_landmarks.truncate(MAX_HANDS);
        }
        self.multi_hand_world_landmarks.truncate(MAX_HANDS);
        self
    }

    /// Decoded pixels, if the frame carries them
    pub fn pixels(&self) -> Option<&Arc<Frame>> {
        match &self.image {
            Some(FrameRef::Pixels(frame)) => Some(frame),
            _ => None,
        }
    }
}
