pub mod fit;
pub mod orbit;
pub mod overlay;

pub use fit::BoundingFit;
pub use orbit::{bone_alpha, joint_radius, project, OrbitClock, OrbitParams, OrbitPoint, MAX_JOINT_RADIUS};
pub use overlay::{map_landmark, map_overlay, overlay_segments};

/// Canvas-space point in pixels
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn round(&self) -> (i32, i32) {
        (self.x.round() as i32, self.y.round() as i32)
    }
}
