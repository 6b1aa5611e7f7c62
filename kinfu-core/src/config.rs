//! Engine configuration.

use crate::error::{KinfuError, Result};
use glam::{Affine3A, UVec3, Vec3};
use kinfu_data::Intrinsics;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Full set of tunables for a [`crate::KinFu`] instance.
///
/// Defaults follow the classic KinectFusion parameters for a 640x480
/// sensor: a 3 m cube placed in front of the camera, a three-level ICP
/// pyramid and 4 cm truncation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KinfuConfig {
    /// Frame width in pixels.
    pub cols: usize,
    /// Frame height in pixels.
    pub rows: usize,
    pub intrinsics: Intrinsics,

    /// Number of voxels along each axis.
    pub volume_dims: UVec3,
    /// Physical extent of the volume in meters.
    pub volume_size: Vec3,
    /// World pose of the volume's corner (voxel 0,0,0).
    pub volume_pose: Affine3A,
    /// Camera pose assigned to the first frame.
    pub initial_pose: Affine3A,

    /// Bilateral filter range sigma (meters).
    pub bilateral_sigma_depth: f32,
    /// Bilateral filter spatial sigma (pixels).
    pub bilateral_sigma_spatial: f32,
    /// Bilateral filter window (pixels).
    pub bilateral_kernel_size: usize,

    /// Depths beyond this are dropped before tracking; `0` disables.
    pub icp_truncate_depth_dist: f32,
    /// Max distance between corresponding points (meters).
    pub icp_dist_thres: f32,
    /// Max angle between corresponding normals (radians).
    pub icp_angle_thres: f32,
    /// Gauss-Newton iterations per pyramid level, finest level first.
    pub icp_iter_num: Vec<usize>,
    /// Below this many correspondences a level is declared lost.
    pub icp_min_correspondences: usize,

    /// Integrate only when the camera moved at least this much.
    pub tsdf_min_camera_movement: f32,
    /// Truncation distance (meters).
    pub tsdf_trunc_dist: f32,
    /// Weight cap, in frames.
    pub tsdf_max_weight: u32,

    /// Ray marching step, in voxel sizes.
    pub raycast_step_factor: f32,
    /// Central-difference offset for normals, in voxel sizes.
    pub gradient_delta_factor: f32,

    /// Light position in camera space (meters).
    pub light_position: Vec3,
}

impl Default for KinfuConfig {
    fn default() -> Self {
        let cols = 640;
        let rows = 480;
        Self {
            cols,
            rows,
            intrinsics: Intrinsics::new(
                525.0,
                525.0,
                cols as f32 / 2.0 - 0.5,
                rows as f32 / 2.0 - 0.5,
            ),
            volume_dims: UVec3::splat(256),
            volume_size: Vec3::splat(3.0),
            volume_pose: Affine3A::from_translation(Vec3::new(-1.5, -1.5, -0.5)),
            initial_pose: Affine3A::IDENTITY,
            bilateral_sigma_depth: 0.04,
            bilateral_sigma_spatial: 4.5,
            bilateral_kernel_size: 7,
            icp_truncate_depth_dist: 0.0,
            icp_dist_thres: 0.1,
            icp_angle_thres: 30f32.to_radians(),
            icp_iter_num: vec![10, 5, 4],
            icp_min_correspondences: 100,
            tsdf_min_camera_movement: 0.0,
            tsdf_trunc_dist: 0.04,
            tsdf_max_weight: 64,
            raycast_step_factor: 0.75,
            gradient_delta_factor: 0.5,
            light_position: Vec3::ZERO,
        }
    }
}

impl KinfuConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Number of pyramid levels.
    pub fn levels(&self) -> usize {
        self.icp_iter_num.len()
    }

    /// Edge length of a voxel along each axis.
    pub fn voxel_size(&self) -> Vec3 {
        self.volume_size / self.volume_dims.as_vec3()
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cols == 0 || self.rows == 0 {
            return Err(KinfuError::invalid(format!(
                "frame resolution must be positive, got {}x{}",
                self.cols, self.rows
            )));
        }
        if self.intrinsics.is_degenerate() {
            return Err(KinfuError::invalid(format!(
                "degenerate intrinsics {:?}",
                self.intrinsics
            )));
        }
        if self.volume_dims.min_element() == 0 {
            return Err(KinfuError::invalid(format!(
                "volume dims must be positive, got {}",
                self.volume_dims
            )));
        }
        if !self.volume_size.is_finite() || self.volume_size.min_element() <= 0.0 {
            return Err(KinfuError::invalid(format!(
                "volume size must be positive, got {}",
                self.volume_size
            )));
        }
        if !self.volume_pose.is_finite() || !self.initial_pose.is_finite() {
            return Err(KinfuError::invalid("poses must be finite"));
        }
        if self.icp_iter_num.is_empty() {
            return Err(KinfuError::invalid("ICP needs at least one pyramid level"));
        }
        let coarsest = self.levels() - 1;
        if (self.cols >> coarsest) < 2 || (self.rows >> coarsest) < 2 {
            return Err(KinfuError::invalid(format!(
                "{}x{} is too small for {} pyramid levels",
                self.cols,
                self.rows,
                self.levels()
            )));
        }
        if self.bilateral_kernel_size == 0 {
            return Err(KinfuError::invalid("bilateral kernel size must be positive"));
        }
        positive("bilateral_sigma_depth", self.bilateral_sigma_depth)?;
        positive("bilateral_sigma_spatial", self.bilateral_sigma_spatial)?;
        positive("icp_dist_thres", self.icp_dist_thres)?;
        positive("icp_angle_thres", self.icp_angle_thres)?;
        positive("tsdf_trunc_dist", self.tsdf_trunc_dist)?;
        positive("raycast_step_factor", self.raycast_step_factor)?;
        positive("gradient_delta_factor", self.gradient_delta_factor)?;
        if !(self.icp_truncate_depth_dist >= 0.0) || !(self.tsdf_min_camera_movement >= 0.0) {
            return Err(KinfuError::invalid(
                "depth truncation and minimum movement must be non-negative",
            ));
        }
        if self.tsdf_max_weight == 0 {
            return Err(KinfuError::invalid("tsdf_max_weight must be positive"));
        }
        if !self.light_position.is_finite() {
            return Err(KinfuError::invalid("light position must be finite"));
        }
        Ok(())
    }
}

fn positive(name: &str, value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(KinfuError::invalid(format!("{name} must be positive, got {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = KinfuConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.levels(), 3);
        assert!((config.voxel_size().x - 3.0 / 256.0).abs() < 1e-7);
    }

    #[test]
    fn test_rejects_zero_volume_dims() {
        let config = KinfuConfig {
            volume_dims: UVec3::new(64, 0, 64),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(KinfuError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_rejects_non_positive_size() {
        let config = KinfuConfig {
            volume_size: Vec3::new(1.0, -1.0, 1.0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_degenerate_intrinsics() {
        let config = KinfuConfig {
            intrinsics: Intrinsics::new(0.0, 525.0, 319.5, 239.5),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_too_many_levels() {
        let config = KinfuConfig {
            cols: 8,
            rows: 8,
            icp_iter_num: vec![1, 1, 1, 1],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_partial_override() {
        let config = KinfuConfig::from_json_str(r#"{ "tsdf_max_weight": 8, "icp_iter_num": [3, 2] }"#)
            .unwrap();
        assert_eq!(config.tsdf_max_weight, 8);
        assert_eq!(config.levels(), 2);
        assert_eq!(config.cols, 640);
    }

    #[test]
    fn test_json_roundtrip_preserves_poses() {
        let config = KinfuConfig {
            initial_pose: Affine3A::from_translation(Vec3::new(0.1, 0.2, 0.3)),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back = KinfuConfig::from_json_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
