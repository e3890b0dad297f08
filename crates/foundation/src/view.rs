use serde::{Deserialize, Serialize};

use crate::bounds::Aabb2;
use crate::math::Vec2;

/// Axis-aligned window into a frame's pixel space plus the mip level the
/// window should be streamed at.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameView {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub mip: u32,
}

impl FrameView {
    /// Placeholder returned for frames that cannot be rendered yet.
    pub const DUMMY: FrameView = FrameView {
        x_min: 0.0,
        x_max: 1.0,
        y_min: 0.0,
        y_max: 1.0,
        mip: 1,
    };

    pub fn new(x_min: f64, x_max: f64, y_min: f64, y_max: f64, mip: u32) -> Self {
        FrameView {
            x_min,
            x_max,
            y_min,
            y_max,
            mip,
        }
    }

    pub fn from_bounds(bounds: Aabb2, mip: u32) -> Self {
        FrameView::new(bounds.min.x, bounds.max.x, bounds.min.y, bounds.max.y, mip)
    }

    pub fn bounds(&self) -> Aabb2 {
        Aabb2::new(
            Vec2::new(self.x_min, self.y_min),
            Vec2::new(self.x_max, self.y_max),
        )
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(
            (self.x_min + self.x_max) / 2.0,
            (self.y_min + self.y_max) / 2.0,
        )
    }

    pub fn corners(&self) -> [Vec2; 4] {
        [
            Vec2::new(self.x_min, self.y_min),
            Vec2::new(self.x_max, self.y_min),
            Vec2::new(self.x_max, self.y_max),
            Vec2::new(self.x_min, self.y_max),
        ]
    }

    /// Finite, non-empty and with a positive mip.
    pub fn is_valid(&self) -> bool {
        [self.x_min, self.x_max, self.y_min, self.y_max]
            .iter()
            .all(|v| v.is_finite())
            && self.x_min < self.x_max
            && self.y_min < self.y_max
            && self.mip > 0
    }
}
