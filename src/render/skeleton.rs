use crate::hand::{Hand, HAND_CONNECTIONS};
use crate::projection::{bone_alpha, joint_radius, map_overlay, overlay_segments, project, BoundingFit, OrbitParams};

use super::Canvas;

/// Overlay bone colour (RGB)
pub const BONE_COLOR: u32 = 0x00FF88;
/// Overlay joint colour (RGB)
pub const JOINT_COLOR: u32 = 0xFFFFFF;
/// World-view bone colour (RGB)
pub const WORLD_BONE_COLOR: u32 = 0x3B82F6;
/// World-view background
pub const WORLD_BACKGROUND: u32 = 0x101010;
/// World-view axis lines
pub const GRID_COLOR: u32 = 0x333333;
/// "Tracking active" dot
pub const ACTIVE_COLOR: u32 = 0x22C55E;
/// Holographic glow (RGB)
pub const GLOW_COLOR: u32 = 0x3B82F6;

/// 2-D overlay of one image-space hand at canvas resolution
pub fn draw_overlay(canvas: &mut Canvas, hand: &Hand, mirror: bool) {
    let points = map_overlay(hand, canvas.width() as u32, canvas.height() as u32, mirror);

    for (a, b) in overlay_segments(&points) {
        let (x1, y1) = a.round();
        let (x2, y2) = b.round();
        canvas.draw_thick_line(x1, y1, x2, y2, 2, BONE_COLOR, 1.0);
    }

    for p in points.iter() {
        let (x, y) = p.round();
        canvas.draw_circle(x, y, 6, JOINT_COLOR);
    }
}

/// Auxiliary view: all hands centred and scaled into the canvas
pub fn draw_world_view(canvas: &mut Canvas, hands: &[Hand], padding: f32) {
    canvas.clear(WORLD_BACKGROUND);

    let w = canvas.width() as i32;
    let h = canvas.height() as i32;
    canvas.draw_line(w / 2, 0, w / 2, h - 1, GRID_COLOR);
    canvas.draw_line(0, h / 2, w - 1, h / 2, GRID_COLOR);

    let Some(fit) = BoundingFit::compute(hands, w as u32, h as u32, padding) else {
        return;
    };

    for hand in hands {
        for &(a, b) in HAND_CONNECTIONS.iter() {
            let (x1, y1) = fit.apply(&hand.landmarks[a]).round();
            let (x2, y2) = fit.apply(&hand.landmarks[b]).round();
            canvas.draw_line(x1, y1, x2, y2, WORLD_BONE_COLOR);
        }
        for lm in hand.iter() {
            let (x, y) = fit.apply(lm).round();
            canvas.draw_circle(x, y, 3, JOINT_COLOR);
        }
    }

    canvas.draw_circle(w - 12, 12, 4, ACTIVE_COLOR);
}

/// Rotating world-space hand with depth shading
pub fn draw_holographic(canvas: &mut Canvas, hand: &Hand, angle: f32, params: &OrbitParams) {
    let points = project(hand, angle, params);

    for &(i, j) in HAND_CONNECTIONS.iter() {
        let (p1, p2) = (points[i], points[j]);
        if !(p1.is_finite() && p2.is_finite()) {
            continue;
        }
        let alpha = bone_alpha((p1.depth + p2.depth) / 2.0);
        let (x1, y1) = (p1.x.round() as i32, p1.y.round() as i32);
        let (x2, y2) = (p2.x.round() as i32, p2.y.round() as i32);
        canvas.draw_thick_line(x1, y1, x2, y2, 3, GLOW_COLOR, alpha * 0.3);
        canvas.draw_thick_line(x1, y1, x2, y2, 1, JOINT_COLOR, alpha);
    }

    for p in points.iter().filter(|p| p.is_finite()) {
        let r = joint_radius(p.depth).round() as i32;
        canvas.draw_circle(p.x.round() as i32, p.y.round() as i32, r, JOINT_COLOR);
    }
}
