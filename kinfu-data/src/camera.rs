//! Pinhole camera intrinsics.

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Intrinsics {
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Intrinsics for a pyramid level, where each level halves the resolution.
    pub fn level(&self, level: usize) -> Self {
        let div = (1u32 << level) as f32;
        Self {
            fx: self.fx / div,
            fy: self.fy / div,
            cx: self.cx / div,
            cy: self.cy / div,
        }
    }

    /// True if the focal lengths or principal point cannot describe a camera.
    pub fn is_degenerate(&self) -> bool {
        !(self.fx.is_finite() && self.fy.is_finite() && self.fx > 0.0 && self.fy > 0.0)
            || !(self.cx.is_finite() && self.cy.is_finite())
    }

    /// Project a camera-space point to continuous pixel coordinates.
    #[inline]
    pub fn project(&self, p: Vec3) -> Vec2 {
        Vec2::new(
            self.fx * p.x / p.z + self.cx,
            self.fy * p.y / p.z + self.cy,
        )
    }

    /// Back-project a pixel with known depth into camera space.
    #[inline]
    pub fn back_project(&self, x: f32, y: f32, depth: f32) -> Vec3 {
        Vec3::new(
            (x - self.cx) * depth / self.fx,
            (y - self.cy) * depth / self.fy,
            depth,
        )
    }

    /// Unnormalized viewing ray through a pixel (z = 1).
    #[inline]
    pub fn ray(&self, x: f32, y: f32) -> Vec3 {
        Vec3::new((x - self.cx) / self.fx, (y - self.cy) / self.fy, 1.0)
    }
}
