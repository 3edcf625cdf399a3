use std::f32::consts::TAU;

use nalgebra::{Rotation3, Vector3};

use crate::config::ProjectionConfig;
use crate::hand::{Hand, LANDMARK_COUNT};

/// Projection parameters of the holographic view
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitParams {
    /// Metres → pixels
    pub scale: f32,
    pub center_x: f32,
    pub center_y: f32,
    /// Added to screen Y
    pub offset_y: f32,
}

impl OrbitParams {
    pub fn for_canvas(width: u32, height: u32, config: &ProjectionConfig) -> Self {
        Self {
            scale: config.orbit_scale,
            center_x: width as f32 / 2.0,
            center_y: height as f32 / 2.0,
            offset_y: config.orbit_offset_y,
        }
    }
}

/// Projected joint with its post-rotation depth
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitPoint {
    pub x: f32,
    pub y: f32,
    pub depth: f32,
}

impl OrbitPoint {
    /// False for landmarks that projected to NaN or infinity
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.depth.is_finite()
    }
}

/// Upper bound of [`joint_radius`] for joints far in front of the camera
pub const MAX_JOINT_RADIUS: f32 = 12.0;

/// Rotates world landmarks about the vertical axis by `angle` and projects them.
///
/// x and y are negated first (camera mirror + screen-down Y). The rotation is
/// `rx = x·cos a − z·sin a`, `rz = x·sin a + z·cos a`, i.e. a rotation of `-a`
/// about +Y in nalgebra's convention.
pub fn project(hand: &Hand, angle: f32, params: &OrbitParams) -> [OrbitPoint; LANDMARK_COUNT] {
    let rotation = Rotation3::from_axis_angle(&Vector3::y_axis(), -angle);
    std::array::from_fn(|i| {
        let lm = &hand.landmarks[i];
        let v = rotation * Vector3::new(-lm.x, -lm.y, lm.z);
        OrbitPoint {
            x: v.x * params.scale + params.center_x,
            y: v.y * params.scale + params.center_y + params.offset_y,
            depth: v.z,
        }
    })
}

/// Opacity of a bone from its mean depth: closer is more opaque
pub fn bone_alpha(depth: f32) -> f32 {
    (1.0 - depth * 5.0).clamp(0.2, 1.0)
}

/// Joint radius in pixels: closer is larger
pub fn joint_radius(depth: f32) -> f32 {
    (4.0 - depth * 10.0).clamp(1.0, MAX_JOINT_RADIUS)
}

/// Rotation state owned by the render loop.
///
/// Advances by a fixed step per tick regardless of detections.
#[derive(Debug, Clone)]
pub struct OrbitClock {
    step: f32,
    angle: f32,
    turns: u64,
}

impl OrbitClock {
    pub fn new(step: f32) -> Self {
        Self {
            step: step.abs(),
            angle: 0.0,
            turns: 0,
        }
    }

    pub fn from_config(config: &ProjectionConfig) -> Self {
        Self::new(config.orbit_step)
    }

    /// Advance one render tick; returns the wrapped angle in `[0, 2π)`
    pub fn tick(&mut self) -> f32 {
        self.angle += self.step;
        while self.angle >= TAU {
            self.angle -= TAU;
            self.turns += 1;
        }
        self.angle
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }

    /// Total rotation since start, never decreasing
    pub fn unwrapped(&self) -> f64 {
        self.turns as f64 * TAU as f64 + self.angle as f64
    }
}
