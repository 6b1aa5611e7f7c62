//! Truncated signed distance volume
//!
//! A fixed grid of voxels, each holding a signed distance normalized by the
//! truncation distance and an integer confidence weight. Voxel `(x, y, z)`
//! has its center at `(i + 0.5) * voxel_size` in volume coordinates; the
//! volume pose maps volume coordinates to world coordinates.

mod cloud;
mod integrate;

use crate::config::KinfuConfig;
use crate::error::{KinfuError, Result};
use glam::{Affine3A, UVec3, Vec3};
use tracing::debug;

/// One voxel. `weight == 0` means never observed.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TsdfVoxel {
    /// Signed distance divided by the truncation distance, in `[-1, 1]`.
    pub tsdf: f32,
    /// Number of fused observations, capped at the volume's max weight.
    pub weight: u32,
}

impl TsdfVoxel {
    pub const EMPTY: Self = Self {
        tsdf: 0.0,
        weight: 0,
    };

    #[inline]
    pub fn is_observed(&self) -> bool {
        self.weight > 0
    }
}

/// Dense TSDF voxel grid.
///
/// Dimensions and physical size are fixed at construction; only voxel
/// contents change afterwards.
#[derive(Debug, Clone)]
pub struct TsdfVolume {
    dims: UVec3,
    size: Vec3,
    voxel_size: Vec3,
    pose: Affine3A,
    trunc_dist: f32,
    max_weight: u32,
    voxels: Vec<TsdfVoxel>,
}

impl TsdfVolume {
    /// Allocate a cleared volume.
    pub fn new(
        dims: UVec3,
        size: Vec3,
        pose: Affine3A,
        trunc_dist: f32,
        max_weight: u32,
    ) -> Result<Self> {
        if dims.min_element() == 0 {
            return Err(KinfuError::invalid(format!("volume dims must be positive, got {dims}")));
        }
        if !size.is_finite() || size.min_element() <= 0.0 {
            return Err(KinfuError::invalid(format!("volume size must be positive, got {size}")));
        }

        let count = (dims.x as usize)
            .checked_mul(dims.y as usize)
            .and_then(|n| n.checked_mul(dims.z as usize))
            .ok_or(KinfuError::AllocationFailure {
                what: "tsdf volume",
                bytes: usize::MAX,
            })?;
        let mut voxels = Vec::new();
        voxels
            .try_reserve_exact(count)
            .map_err(KinfuError::alloc::<TsdfVoxel>("tsdf volume", count))?;
        voxels.resize(count, TsdfVoxel::EMPTY);

        debug!(
            "Allocated TSDF volume {} ({:.1} MiB)",
            dims,
            (count * std::mem::size_of::<TsdfVoxel>()) as f64 / (1024.0 * 1024.0)
        );

        Ok(Self {
            dims,
            size,
            voxel_size: size / dims.as_vec3(),
            pose,
            trunc_dist,
            max_weight,
            voxels,
        })
    }

    pub fn from_config(config: &KinfuConfig) -> Result<Self> {
        Self::new(
            config.volume_dims,
            config.volume_size,
            config.volume_pose,
            config.tsdf_trunc_dist,
            config.tsdf_max_weight,
        )
    }

    pub fn dims(&self) -> UVec3 {
        self.dims
    }

    pub fn size(&self) -> Vec3 {
        self.size
    }

    pub fn voxel_size(&self) -> Vec3 {
        self.voxel_size
    }

    /// World pose of the volume corner.
    pub fn pose(&self) -> Affine3A {
        self.pose
    }

    /// Move the volume origin. Only meaningful on a cleared volume.
    pub fn set_pose(&mut self, pose: Affine3A) {
        self.pose = pose;
    }

    pub fn trunc_dist(&self) -> f32 {
        self.trunc_dist
    }

    pub fn max_weight(&self) -> u32 {
        self.max_weight
    }

    pub fn voxels(&self) -> &[TsdfVoxel] {
        &self.voxels
    }

    /// Voxel contents as raw bytes (`f32` distance, `u32` weight per voxel).
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.voxels)
    }

    #[inline]
    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        (z as usize * self.dims.y as usize + y as usize) * self.dims.x as usize + x as usize
    }

    #[inline]
    pub fn voxel(&self, x: u32, y: u32, z: u32) -> TsdfVoxel {
        self.voxels[self.index(x, y, z)]
    }

    /// Center of a voxel in volume coordinates.
    #[inline]
    pub fn voxel_center(&self, x: u32, y: u32, z: u32) -> Vec3 {
        (UVec3::new(x, y, z).as_vec3() + 0.5) * self.voxel_size
    }

    /// Forget everything observed so far.
    pub fn clear(&mut self) {
        self.voxels.fill(TsdfVoxel::EMPTY);
    }

    /// Trilinearly interpolated distance at a world point.
    ///
    /// Returns `None` outside the volume or where the interpolation
    /// neighbourhood has not been observed.
    pub fn sample(&self, world: Vec3) -> Option<f32> {
        self.sample_local(self.pose.inverse().transform_point3(world))
    }

    /// Trilinearly interpolated distance at a point in volume coordinates.
    pub fn sample_local(&self, p: Vec3) -> Option<f32> {
        let g = p / self.voxel_size - 0.5;
        if !g.is_finite() {
            return None;
        }
        let base = g.floor();
        if base.cmplt(Vec3::ZERO).any() || base.cmpge(self.dims.as_vec3() - 1.0).any() {
            return None;
        }
        let t = g - base;
        let b = base.as_uvec3();

        let mut acc = 0.0f32;
        for corner in 0..8u32 {
            let (ox, oy, oz) = (corner & 1, (corner >> 1) & 1, (corner >> 2) & 1);
            let v = self.voxel(b.x + ox, b.y + oy, b.z + oz);
            if !v.is_observed() {
                return None;
            }
            let wx = if ox == 1 { t.x } else { 1.0 - t.x };
            let wy = if oy == 1 { t.y } else { 1.0 - t.y };
            let wz = if oz == 1 { t.z } else { 1.0 - t.z };
            acc += v.tsdf * wx * wy * wz;
        }
        Some(acc)
    }

    /// Central-difference gradient of the field in volume coordinates.
    ///
    /// `None` if any of the six samples is unavailable.
    pub fn gradient_local(&self, p: Vec3, delta: f32) -> Option<Vec3> {
        let dx = Vec3::new(delta, 0.0, 0.0);
        let dy = Vec3::new(0.0, delta, 0.0);
        let dz = Vec3::new(0.0, 0.0, delta);
        Some(Vec3::new(
            self.sample_local(p + dx)? - self.sample_local(p - dx)?,
            self.sample_local(p + dy)? - self.sample_local(p - dy)?,
            self.sample_local(p + dz)? - self.sample_local(p - dz)?,
        ))
    }

    /// Outward (toward free space) unit normal at a volume-space point.
    pub fn normal_local(&self, p: Vec3, delta: f32) -> Option<Vec3> {
        let n = self.gradient_local(p, delta)?.normalize_or_zero();
        (n != Vec3::ZERO).then_some(n)
    }

    #[cfg(test)]
    pub(crate) fn voxels_mut(&mut self) -> &mut [TsdfVoxel] {
        &mut self.voxels
    }
}
