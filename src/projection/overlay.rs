use crate::hand::{Hand, Landmark, HAND_CONNECTIONS, LANDMARK_COUNT};

use super::Point2;

/// Normalized → pixel, mirrored horizontally when `mirror` is set so the
/// overlay lines up with a front-facing camera preview.
pub fn map_landmark(lm: &Landmark, width: u32, height: u32, mirror: bool) -> Point2 {
    let x = if mirror { 1.0 - lm.x } else { lm.x };
    Point2::new(x * width as f32, lm.y * height as f32)
}

/// Maps every landmark of one hand into canvas pixels
pub fn map_overlay(hand: &Hand, width: u32, height: u32, mirror: bool) -> [Point2; LANDMARK_COUNT] {
    std::array::from_fn(|i| map_landmark(&hand.landmarks[i], width, height, mirror))
}

/// One pixel segment per bone
pub fn overlay_segments(points: &[Point2; LANDMARK_COUNT]) -> impl Iterator<Item = (Point2, Point2)> + '_ {
    HAND_CONNECTIONS
        .iter()
        .map(move |&(a, b)| (points[a], points[b]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hand::landmark::{INDEX_TIP, WRIST};

    #[test]
    fn test_map_without_mirror() {
        let p = map_landmark(&Landmark::new(0.25, 0.5, 0.0), 640, 480, false);
        assert_eq!(p, Point2::new(160.0, 240.0));
    }

    #[test]
    fn test_map_with_mirror() {
        let p = map_landmark(&Landmark::new(0.25, 0.5, 0.0), 640, 480, true);
        assert_eq!(p, Point2::new(480.0, 240.0));
    }

    #[test]
    fn test_segments_follow_connections() {
        let mut hand = Hand::default();
        hand.landmarks[WRIST] = Landmark::new(0.5, 1.0, 0.0);
        hand.landmarks[INDEX_TIP] = Landmark::new(0.5, 0.0, 0.0);
        let points = map_overlay(&hand, 100, 100, false);
        let segments: Vec<_> = overlay_segments(&points).collect();
        assert_eq!(segments.len(), HAND_CONNECTIONS.len());
        assert_eq!(segments[0].0, Point2::new(50.0, 100.0));
    }

    #[test]
    fn test_overlay_has_no_history() {
        let hand = Hand::new([Landmark::new(0.1, 0.2, 0.0); LANDMARK_COUNT]);
        assert_eq!(map_overlay(&hand, 10, 10, true), map_overlay(&hand, 10, 10, true));
    }
}
