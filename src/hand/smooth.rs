use crate::config::SmoothConfig;
use crate::hand::{Hand, Landmark};

/// EMA smoothing of image-space landmarks for the overlay.
///
/// Per-coordinate EMA for every landmark of every hand. The history is
/// dropped whenever the number of hands changes, since hand order is only
/// stable while the count is.
pub struct LandmarkSmoother {
    alpha: f32,
    prev: Vec<Hand>,
}

impl LandmarkSmoother {
    /// Smoother with EMA weight `alpha` (1.0 = passthrough)
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            prev: Vec::new(),
        }
    }

    /// Smoother from the `[smooth]` section
    pub fn from_config(config: &SmoothConfig) -> Self {
        Self::new(config.alpha)
    }

    /// Smooth one frame; restarts when the hand count changes
    pub fn apply(&mut self, hands: &[Hand]) -> Vec<Hand> {
        if hands.len() != self.prev.len() {
            self.prev = hands.to_vec();
            return self.prev.clone();
        }

        let a = self.alpha;
        let smoothed: Vec<Hand> = hands
            .iter()
            .zip(self.prev.iter())
            .map(|(cur, prev)| {
                let mut out = *cur;
                for (lm, (c, p)) in out
                    .landmarks
                    .iter_mut()
                    .zip(cur.landmarks.iter().zip(prev.landmarks.iter()))
                {
                    *lm = Landmark::new(
                        a * c.x + (1.0 - a) * p.x,
                        a * c.y + (1.0 - a) * p.y,
                        a * c.z + (1.0 - a) * p.z,
                    );
                }
                out
            })
            .collect();

        self.prev = smoothed.clone();
        smoothed
    }

    /// Forget history
    pub fn reset(&mut self) {
        self.prev.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hand_at(x: f32, y: f32) -> Hand {
        Hand::new([Landmark::new(x, y, 0.0); 21])
    }

    #[test]
    fn test_first_frame_passthrough() {
        let mut s = LandmarkSmoother::new(0.5);
        let out = s.apply(&[hand_at(0.2, 0.4)]);
        assert_eq!(out[0], hand_at(0.2, 0.4));
    }

    #[test]
    fn test_no_smoothing() {
        let mut s = LandmarkSmoother::new(1.0);
        s.apply(&[hand_at(0.0, 0.0)]);
        let out = s.apply(&[hand_at(1.0, 1.0)]);
        assert_eq!(out[0], hand_at(1.0, 1.0));
    }

    #[test]
    fn test_half_smoothing() {
        let mut s = LandmarkSmoother::new(0.5);
        s.apply(&[hand_at(0.0, 0.0)]);
        let out = s.apply(&[hand_at(0.4, 0.8)]);
        assert!((out[0].landmarks[0].x - 0.2).abs() < 1e-6);
        assert!((out[0].landmarks[0].y - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_hand_count_change_resets() {
        let mut s = LandmarkSmoother::new(0.0);
        s.apply(&[hand_at(0.1, 0.1)]);
        let out = s.apply(&[hand_at(0.9, 0.9), hand_at(0.5, 0.5)]);
        assert_eq!(out[0], hand_at(0.9, 0.9));
    }

    #[test]
    fn test_reset() {
        let mut s = LandmarkSmoother::new(0.0);
        s.apply(&[hand_at(0.1, 0.1)]);
        s.reset();
        let out = s.apply(&[hand_at(0.7, 0.7)]);
        assert_eq!(out[0], hand_at(0.7, 0.7));
    }
}
