//! Depth frame preprocessing
//!
//! Turns a raw depth frame into a coarse-to-fine pyramid of depth, vertex
//! and normal maps:
//! - [`bilateral`]: edge-preserving depth denoising
//! - [`pyramid`]: 2x downsampling of depth maps and of raycast vertex/normal maps
//! - [`normals`]: back-projection and cross-product normals

pub mod bilateral;
pub mod normals;
pub mod pyramid;

use crate::config::KinfuConfig;
use crate::error::{KinfuError, Result};
use glam::Vec3;
use kinfu_data::{DepthMap, Intrinsics, NormalMap, VertexMap};
use tracing::debug;

/// Depth, vertex and normal maps for one resolution tier.
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    pub depth: DepthMap,
    pub vertices: VertexMap,
    pub normals: NormalMap,
}

impl PyramidLevel {
    fn try_new(width: usize, height: usize) -> Result<Self> {
        let count = width.saturating_mul(height);
        Ok(Self {
            depth: DepthMap::try_new(width, height, 0.0)
                .map_err(KinfuError::alloc::<f32>("pyramid depth", count))?,
            vertices: VertexMap::try_new(width, height, Vec3::NAN)
                .map_err(KinfuError::alloc::<Vec3>("pyramid vertices", count))?,
            normals: NormalMap::try_new(width, height, Vec3::NAN)
                .map_err(KinfuError::alloc::<Vec3>("pyramid normals", count))?,
        })
    }

    pub fn dimensions(&self) -> (usize, usize) {
        self.depth.dimensions()
    }
}

/// A stack of levels, finest first. Level `l` has resolution `(cols >> l, rows >> l)`.
#[derive(Debug, Clone)]
pub struct Pyramid {
    levels: Vec<PyramidLevel>,
}

impl Pyramid {
    /// Allocate every level up front; buffers are reused for every frame.
    pub fn try_new(cols: usize, rows: usize, levels: usize) -> Result<Self> {
        let levels = (0..levels)
            .map(|l| PyramidLevel::try_new(cols >> l, rows >> l))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { levels })
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level(&self, level: usize) -> &PyramidLevel {
        &self.levels[level]
    }

    pub fn level_mut(&mut self, level: usize) -> &mut PyramidLevel {
        &mut self.levels[level]
    }

    pub fn levels(&self) -> &[PyramidLevel] {
        &self.levels
    }

    /// Rebuild coarser vertex/normal levels from level 0 by 2x2 averaging.
    ///
    /// Used for the raycast reference, where only level 0 is rendered.
    pub fn downsample_vertices_and_normals(&mut self) {
        for l in 1..self.levels.len() {
            let (fine, coarse) = self.levels.split_at_mut(l);
            let fine = &fine[l - 1];
            let coarse = &mut coarse[0];
            pyramid::downsample_points_normals(
                &fine.vertices,
                &fine.normals,
                &mut coarse.vertices,
                &mut coarse.normals,
            );
        }
    }
}

/// Stateless-per-frame depth preprocessor.
#[derive(Debug, Clone)]
pub struct FramePreprocessor {
    intrinsics: Intrinsics,
    sigma_depth: f32,
    sigma_spatial: f32,
    kernel_size: usize,
    truncate_depth: f32,
    max_depth_jump: f32,
}

impl FramePreprocessor {
    pub fn new(config: &KinfuConfig) -> Self {
        Self {
            intrinsics: config.intrinsics,
            sigma_depth: config.bilateral_sigma_depth,
            sigma_spatial: config.bilateral_sigma_spatial,
            kernel_size: config.bilateral_kernel_size,
            truncate_depth: config.icp_truncate_depth_dist,
            max_depth_jump: config.icp_dist_thres,
        }
    }

    /// Filter `depth` and fill every level of `out`.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn process(&self, depth: &DepthMap, out: &mut Pyramid) {
        {
            let level0 = out.level_mut(0);
            bilateral::bilateral_filter(
                depth,
                &mut level0.depth,
                self.kernel_size,
                self.sigma_spatial,
                self.sigma_depth,
            );
            if self.truncate_depth > 0.0 {
                truncate_depth(&mut level0.depth, self.truncate_depth);
            }
        }

        for l in 1..out.len() {
            let (fine, coarse) = out.levels.split_at_mut(l);
            pyramid::downsample_depth(&fine[l - 1].depth, &mut coarse[0].depth, self.sigma_depth);
        }

        for (l, level) in out.levels.iter_mut().enumerate() {
            let intr = self.intrinsics.level(l);
            normals::compute_vertices(&level.depth, &intr, &mut level.vertices);
            normals::compute_normals(&level.vertices, &mut level.normals, self.max_depth_jump);
        }

        debug!(
            "Preprocessed frame: {} of {} pixels valid at level 0",
            out.level(0).vertices.valid_count(),
            depth.len()
        );
    }
}

/// Drop samples farther than `max_depth`.
fn truncate_depth(depth: &mut DepthMap, max_depth: f32) {
    for d in depth.as_mut_slice() {
        if *d > max_depth {
            *d = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> KinfuConfig {
        KinfuConfig {
            cols: 64,
            rows: 48,
            intrinsics: Intrinsics::new(50.0, 50.0, 31.5, 23.5),
            icp_iter_num: vec![3, 2, 1],
            ..Default::default()
        }
    }

    #[test]
    fn test_pyramid_level_sizes() {
        let pyramid = Pyramid::try_new(64, 48, 3).unwrap();
        assert_eq!(pyramid.len(), 3);
        assert_eq!(pyramid.level(0).dimensions(), (64, 48));
        assert_eq!(pyramid.level(1).dimensions(), (32, 24));
        assert_eq!(pyramid.level(2).dimensions(), (16, 12));
    }

    #[test]
    fn test_flat_wall_produces_camera_facing_normals() {
        let config = small_config();
        let pre = FramePreprocessor::new(&config);
        let depth = DepthMap::new(64, 48, 1.5);
        let mut pyramid = Pyramid::try_new(64, 48, 3).unwrap();
        pre.process(&depth, &mut pyramid);

        for level in pyramid.levels() {
            let (w, h) = level.dimensions();
            let v = level.vertices.at(w / 2, h / 2);
            let n = level.normals.at(w / 2, h / 2);
            assert!((v.z - 1.5).abs() < 1e-4);
            assert!((n - Vec3::NEG_Z).length() < 1e-3, "normal {n}");
        }
    }

    #[test]
    fn test_truncation_drops_far_depth() {
        let config = KinfuConfig {
            icp_truncate_depth_dist: 1.0,
            ..small_config()
        };
        let pre = FramePreprocessor::new(&config);
        let depth = DepthMap::new(64, 48, 1.5);
        let mut pyramid = Pyramid::try_new(64, 48, 3).unwrap();
        pre.process(&depth, &mut pyramid);
        assert_eq!(pyramid.level(0).depth.valid_count(), 0);
        assert_eq!(pyramid.level(2).vertices.valid_count(), 0);
    }

    #[test]
    fn test_invalid_pixels_have_no_vertex() {
        let config = small_config();
        let pre = FramePreprocessor::new(&config);
        let mut depth = DepthMap::new(64, 48, 1.0);
        for x in 0..64 {
            for y in 0..10 {
                depth.set(x, y, 0.0);
            }
        }
        let mut pyramid = Pyramid::try_new(64, 48, 3).unwrap();
        pre.process(&depth, &mut pyramid);
        let level0 = pyramid.level(0);
        assert!(!kinfu_data::is_valid_vector(level0.vertices.at(5, 5)));
        assert!(kinfu_data::is_valid_vector(level0.vertices.at(5, 30)));
    }
}
