//! Analytic scenes for deterministic depth streams.
//!
//! Camera convention: x right, y down, z forward. World up is `-Y`, so the
//! identity pose looks down `+Z` with an upright image.

use super::stream::{DepthStream, RgbdFrame, StreamError};
use glam::{Affine3A, Mat3, Vec3};
use image::{Rgb, RgbImage};
use kinfu_data::{DepthMap, Intrinsics};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// A surface that can be hit by a ray.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Primitive {
    Plane { point: Vec3, normal: Vec3 },
    Sphere { center: Vec3, radius: f32 },
    Box { min: Vec3, max: Vec3 },
}

impl Primitive {
    /// Nearest positive ray parameter, with `dir` not necessarily normalized.
    pub fn intersect(&self, origin: Vec3, dir: Vec3) -> Option<f32> {
        match *self {
            Primitive::Plane { point, normal } => {
                let denom = normal.dot(dir);
                if denom.abs() < 1e-9 {
                    return None;
                }
                let t = normal.dot(point - origin) / denom;
                (t > 0.0).then_some(t)
            }
            Primitive::Sphere { center, radius } => {
                let oc = origin - center;
                let a = dir.length_squared();
                let b = 2.0 * dir.dot(oc);
                let c = oc.length_squared() - radius * radius;
                let disc = b * b - 4.0 * a * c;
                if disc < 0.0 {
                    return None;
                }
                let sqrt = disc.sqrt();
                let near = (-b - sqrt) / (2.0 * a);
                let far = (-b + sqrt) / (2.0 * a);
                [near, far].into_iter().find(|&t| t > 0.0)
            }
            Primitive::Box { min, max } => {
                let inv = dir.recip();
                let t0 = (min - origin) * inv;
                let t1 = (max - origin) * inv;
                let enter = t0.min(t1).max_element();
                let exit = t0.max(t1).min_element();
                if exit < enter.max(0.0) {
                    None
                } else if enter > 0.0 {
                    Some(enter)
                } else {
                    Some(exit)
                }
            }
        }
    }
}

/// A set of primitives in world coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyntheticScene {
    pub primitives: Vec<Primitive>,
}

impl SyntheticScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, primitive: Primitive) -> Self {
        self.primitives.push(primitive);
        self
    }

    /// A furnished corner in front of the identity camera: back wall, floor,
    /// side wall, a sphere and a box. Every rigid motion is observable.
    pub fn room() -> Self {
        Self::new()
            .with(Primitive::Plane {
                point: Vec3::new(0.0, 0.0, 2.0),
                normal: Vec3::NEG_Z,
            })
            .with(Primitive::Plane {
                point: Vec3::new(0.0, 0.6, 0.0),
                normal: Vec3::NEG_Y,
            })
            .with(Primitive::Plane {
                point: Vec3::new(-1.0, 0.0, 0.0),
                normal: Vec3::X,
            })
            .with(Primitive::Sphere {
                center: Vec3::new(0.3, 0.1, 1.4),
                radius: 0.25,
            })
            .with(Primitive::Box {
                min: Vec3::new(-0.6, 0.2, 1.2),
                max: Vec3::new(-0.2, 0.6, 1.6),
            })
    }

    /// Nearest hit over all primitives.
    pub fn cast(&self, origin: Vec3, dir: Vec3) -> Option<f32> {
        self.primitives
            .iter()
            .filter_map(|p| p.intersect(origin, dir))
            .min_by(f32::total_cmp)
    }

    /// Render a depth map (z in camera space) seen from `camera_pose`.
    pub fn render_depth(
        &self,
        intr: &Intrinsics,
        cols: usize,
        rows: usize,
        camera_pose: &Affine3A,
    ) -> DepthMap {
        let origin: Vec3 = camera_pose.translation.into();
        let mut depth = DepthMap::new(cols, rows, 0.0);
        depth
            .as_mut_slice()
            .par_chunks_mut(cols)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, out) in row.iter_mut().enumerate() {
                    // With a z = 1 ray the hit parameter is the camera-space depth.
                    let dir = camera_pose.transform_vector3(intr.ray(x as f32, y as f32));
                    *out = self.cast(origin, dir).unwrap_or(0.0);
                }
            });
        depth
    }
}

/// Camera-to-world pose at `eye` looking at `target`, with world up `-Y`.
pub fn look_at(eye: Vec3, target: Vec3) -> Affine3A {
    let forward = (target - eye).normalize();
    let right = forward.cross(Vec3::NEG_Y).normalize();
    let down = forward.cross(right);
    Affine3A::from_mat3_translation(Mat3::from_cols(right, down, forward), eye)
}

/// Renders a [`SyntheticScene`] along a fixed trajectory.
pub struct SyntheticStream {
    scene: SyntheticScene,
    intrinsics: Intrinsics,
    cols: usize,
    rows: usize,
    trajectory: Vec<Affine3A>,
    index: usize,
    frame_rate: f32,
    with_color: bool,
}

impl SyntheticStream {
    pub fn new(
        scene: SyntheticScene,
        intrinsics: Intrinsics,
        cols: usize,
        rows: usize,
        trajectory: Vec<Affine3A>,
    ) -> Result<Self, StreamError> {
        if cols == 0 || rows == 0 {
            return Err(StreamError::InvalidData(format!(
                "frame size must be non-zero, got {cols}x{rows}"
            )));
        }
        if scene.primitives.is_empty() {
            return Err(StreamError::InvalidData("scene has no primitives".into()));
        }
        Ok(Self {
            scene,
            intrinsics,
            cols,
            rows,
            trajectory,
            index: 0,
            frame_rate: 30.0,
            with_color: false,
        })
    }

    /// Also emit a gray color image shaded by depth.
    pub fn with_color(mut self, enabled: bool) -> Self {
        self.with_color = enabled;
        self
    }

    /// Eye moving linearly from `start` to `end` over `frames` frames, always
    /// looking at `target`.
    pub fn linear_trajectory(start: Vec3, end: Vec3, target: Vec3, frames: usize) -> Vec<Affine3A> {
        let last = frames.saturating_sub(1).max(1) as f32;
        (0..frames)
            .map(|i| look_at(start.lerp(end, i as f32 / last), target))
            .collect()
    }

    pub fn trajectory(&self) -> &[Affine3A] {
        &self.trajectory
    }

    fn color_for(depth: &DepthMap) -> RgbImage {
        RgbImage::from_fn(depth.width() as u32, depth.height() as u32, |x, y| {
            let d = depth.at(x as usize, y as usize);
            let v = if d > 0.0 { (255.0 / (1.0 + d)) as u8 } else { 0 };
            Rgb([v, v, v])
        })
    }
}

impl DepthStream for SyntheticStream {
    fn next_frame(&mut self) -> Result<Option<RgbdFrame>, StreamError> {
        let Some(pose) = self.trajectory.get(self.index).copied() else {
            return Ok(None);
        };
        let depth = self
            .scene
            .render_depth(&self.intrinsics, self.cols, self.rows, &pose);
        let timestamp = self.index as f64 / self.frame_rate as f64;
        let mut frame = RgbdFrame::new(depth, timestamp).with_ground_truth(pose);
        if self.with_color {
            let color = Self::color_for(&frame.depth);
            frame = frame.with_color(color);
        }
        self.index += 1;
        Ok(Some(frame))
    }

    fn frame_rate(&self) -> Option<f32> {
        Some(self.frame_rate)
    }

    fn is_active(&self) -> bool {
        self.index < self.trajectory.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_look_at_identity() {
        let pose = look_at(Vec3::ZERO, Vec3::Z);
        assert!(pose.abs_diff_eq(Affine3A::IDENTITY, 1e-6));
    }

    #[test]
    fn test_primitive_hits() {
        let plane = Primitive::Plane {
            point: Vec3::new(0.0, 0.0, 2.0),
            normal: Vec3::NEG_Z,
        };
        assert_eq!(plane.intersect(Vec3::ZERO, Vec3::Z), Some(2.0));
        assert_eq!(plane.intersect(Vec3::ZERO, Vec3::NEG_Z), None);

        let sphere = Primitive::Sphere {
            center: Vec3::new(0.0, 0.0, 3.0),
            radius: 1.0,
        };
        assert!((sphere.intersect(Vec3::ZERO, Vec3::Z).unwrap() - 2.0).abs() < 1e-5);

        let cube = Primitive::Box {
            min: Vec3::new(-1.0, -1.0, 1.0),
            max: Vec3::new(1.0, 1.0, 2.0),
        };
        assert_eq!(cube.intersect(Vec3::ZERO, Vec3::Z), Some(1.0));
    }

    #[test]
    fn test_render_depth_is_camera_z() {
        let scene = SyntheticScene::new().with(Primitive::Plane {
            point: Vec3::new(0.0, 0.0, 1.5),
            normal: Vec3::NEG_Z,
        });
        let intr = Intrinsics::new(20.0, 20.0, 7.5, 5.5);
        let depth = scene.render_depth(&intr, 16, 12, &Affine3A::IDENTITY);
        for &d in depth.as_slice() {
            assert!((d - 1.5).abs() < 1e-5);
        }
    }

    #[test]
    fn test_stream_follows_trajectory() {
        let trajectory = SyntheticStream::linear_trajectory(
            Vec3::ZERO,
            Vec3::new(0.1, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.5),
            3,
        );
        let intr = Intrinsics::new(20.0, 20.0, 7.5, 5.5);
        let mut stream = SyntheticStream::new(SyntheticScene::room(), intr, 16, 12, trajectory)
            .unwrap()
            .with_color(true);

        let mut count = 0;
        while let Some(frame) = stream.next_frame().unwrap() {
            assert_eq!(frame.dimensions(), (16, 12));
            assert!(frame.color.is_some());
            assert_eq!(frame.ground_truth, Some(stream.trajectory()[count]));
            count += 1;
        }
        assert_eq!(count, 3);
        assert!(!stream.is_active());
    }

    #[test]
    fn test_empty_scene_rejected() {
        let intr = Intrinsics::new(20.0, 20.0, 7.5, 5.5);
        assert!(SyntheticStream::new(SyntheticScene::new(), intr, 16, 12, vec![]).is_err());
    }
}
