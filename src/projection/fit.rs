use crate::hand::{Hand, Landmark};

use super::Point2;

/// Extent used when the bounding box collapses on an axis
pub const MIN_EXTENT: f32 = 0.1;

/// Aspect-preserving scale/translate that fits all hands into a canvas.
///
/// The landmark bounding-box centre lands on the canvas centre, and the
/// scaled box stays within `(1 - padding)` of the canvas on both axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingFit {
    pub center: Point2,
    pub scale: f32,
    pub canvas_width: f32,
    pub canvas_height: f32,
}

impl BoundingFit {
    /// `None` when there is nothing to fit (no hands or non-finite data)
    pub fn compute(hands: &[Hand], canvas_width: u32, canvas_height: u32, padding: f32) -> Option<Self> {
        let mut min_x = f32::INFINITY;
        let mut max_x = f32::NEG_INFINITY;
        let mut min_y = f32::INFINITY;
        let mut max_y = f32::NEG_INFINITY;

        for lm in hands.iter().flat_map(|h| h.iter()) {
            if !lm.is_finite() {
                return None;
            }
            min_x = min_x.min(lm.x);
            max_x = max_x.max(lm.x);
            min_y = min_y.min(lm.y);
            max_y = max_y.max(lm.y);
        }

        if min_x == f32::INFINITY {
            return None;
        }

        let width = (max_x - min_x).max(MIN_EXTENT);
        let height = (max_y - min_y).max(MIN_EXTENT);
        let wc = canvas_width as f32;
        let hc = canvas_height as f32;
        let keep = 1.0 - padding;
        let scale = (wc * keep / width).min(hc * keep / height);

        Some(Self {
            center: Point2::new((min_x + max_x) / 2.0, (min_y + max_y) / 2.0),
            scale,
            canvas_width: wc,
            canvas_height: hc,
        })
    }

    pub fn apply(&self, lm: &Landmark) -> Point2 {
        Point2::new(
            (lm.x - self.center.x) * self.scale + self.canvas_width / 2.0,
            (lm.y - self.center.y) * self.scale + self.canvas_height / 2.0,
        )
    }
}
