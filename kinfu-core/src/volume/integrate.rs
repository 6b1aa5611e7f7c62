//! Projective depth integration.

use super::{TsdfVolume, TsdfVoxel};
use glam::{Affine3A, UVec3};
use kinfu_data::{DepthMap, Intrinsics, is_valid_depth};
use rayon::prelude::*;
use tracing::debug;

impl TsdfVolume {
    /// Fuse a depth frame observed from `camera_pose` (camera to world).
    ///
    /// Every voxel center is projected into the frame; where both the voxel
    /// and the sampled pixel have valid depth and `|depth - voxel_z|` is
    /// within the truncation distance, the normalized distance is folded into
    /// a running average and the weight grows by one up to the cap. Voxels
    /// are updated independently, one z-slice per task.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn integrate(&mut self, depth: &DepthMap, intr: &Intrinsics, camera_pose: &Affine3A) {
        let cam_from_volume = camera_pose.inverse() * self.pose;
        let (width, height) = depth.dimensions();
        let dims = self.dims;
        let voxel_size = self.voxel_size;
        let trunc = self.trunc_dist;
        let max_weight = self.max_weight;
        let slice_len = dims.x as usize * dims.y as usize;

        let updated: usize = self
            .voxels
            .par_chunks_mut(slice_len)
            .enumerate()
            .map(|(z, slice)| {
                let mut updated = 0;
                for y in 0..dims.y {
                    for x in 0..dims.x {
                        let center = (UVec3::new(x, y, z as u32).as_vec3() + 0.5) * voxel_size;
                        let cam = cam_from_volume.transform_point3(center);
                        if cam.z <= 0.0 {
                            continue;
                        }
                        let px = intr.project(cam).round();
                        if px.x < 0.0 || px.y < 0.0 {
                            continue;
                        }
                        let (u, v) = (px.x as usize, px.y as usize);
                        if u >= width || v >= height {
                            continue;
                        }
                        let d = depth.at(u, v);
                        if !is_valid_depth(d) {
                            continue;
                        }
                        let sdf = d - cam.z;
                        if sdf.abs() > trunc {
                            continue;
                        }

                        let voxel = &mut slice[(y * dims.x + x) as usize];
                        *voxel = fuse(*voxel, sdf / trunc, max_weight);
                        updated += 1;
                    }
                }
                updated
            })
            .sum();

        debug!("Integrated depth into {} voxels", updated);
    }
}

/// Weighted running average with unit observation weight.
#[inline]
fn fuse(voxel: TsdfVoxel, tsdf: f32, max_weight: u32) -> TsdfVoxel {
    let w = voxel.weight as f32;
    TsdfVoxel {
        tsdf: ((voxel.tsdf * w + tsdf) / (w + 1.0)).clamp(-1.0, 1.0),
        weight: (voxel.weight + 1).min(max_weight),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec3, Vec3A};

    const WALL: f32 = 0.6;

    /// 1 m cube centred on the optical axis, camera at the origin looking +z.
    fn setup(max_weight: u32) -> (TsdfVolume, DepthMap, Intrinsics) {
        let volume = TsdfVolume::new(
            UVec3::splat(32),
            Vec3::ONE,
            Affine3A::from_translation(Vec3::new(-0.5, -0.5, 0.2)),
            0.1,
            max_weight,
        )
        .unwrap();
        let depth = DepthMap::new(64, 48, WALL);
        let intr = Intrinsics::new(40.0, 40.0, 31.5, 23.5);
        (volume, depth, intr)
    }

    #[test]
    fn test_fuse_average() {
        let v = fuse(TsdfVoxel { tsdf: 0.5, weight: 1 }, -0.5, 10);
        assert_eq!(v, TsdfVoxel { tsdf: 0.0, weight: 2 });
        let capped = fuse(TsdfVoxel { tsdf: 0.2, weight: 10 }, 0.2, 10);
        assert_eq!(capped.weight, 10);
        assert!((capped.tsdf - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_integration_marks_truncation_band_only() {
        let (mut volume, depth, intr) = setup(64);
        volume.integrate(&depth, &intr, &Affine3A::IDENTITY);

        let voxel_size = volume.voxel_size().z;
        for z in 0..32 {
            let vx = volume.voxel(16, 16, z);
            let world_z = 0.2 + (z as f32 + 0.5) * voxel_size;
            let sdf = WALL - world_z;
            if sdf.abs() > 0.1 + 1e-4 {
                assert!(!vx.is_observed(), "z={z} should be outside the band");
            } else if sdf.abs() < 0.1 - 1e-4 {
                assert_eq!(vx.weight, 1);
                assert!((vx.tsdf - sdf / 0.1).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_repeated_integration_is_idempotent_on_distance() {
        let (mut volume, depth, intr) = setup(64);
        volume.integrate(&depth, &intr, &Affine3A::IDENTITY);
        let once = volume.voxels().to_vec();
        volume.integrate(&depth, &intr, &Affine3A::IDENTITY);

        for (a, b) in once.iter().zip(volume.voxels()) {
            if a.is_observed() {
                assert_eq!(b.weight, a.weight + 1);
                assert!((a.tsdf - b.tsdf).abs() < 1e-5);
            } else {
                assert!(!b.is_observed());
            }
        }
    }

    #[test]
    fn test_weight_is_capped() {
        let (mut volume, depth, intr) = setup(3);
        for _ in 0..5 {
            volume.integrate(&depth, &intr, &Affine3A::IDENTITY);
        }
        assert!(volume.voxels().iter().all(|v| v.weight <= 3));
        assert!(volume.voxels().iter().any(|v| v.weight == 3));
        assert!(volume.voxels().iter().all(|v| (-1.0..=1.0).contains(&v.tsdf)));
    }

    #[test]
    fn test_voxels_behind_camera_are_skipped() {
        let (mut volume, depth, intr) = setup(64);
        // Camera looking -z: the whole volume is behind it.
        let pose = Affine3A {
            matrix3: glam::Mat3A::from_rotation_y(std::f32::consts::PI),
            translation: Vec3A::ZERO,
        };
        volume.integrate(&depth, &intr, &pose);
        assert!(volume.voxels().iter().all(|v| !v.is_observed()));
    }

    #[test]
    fn test_invalid_depth_is_ignored() {
        let (mut volume, _, intr) = setup(64);
        let depth = DepthMap::new(64, 48, 0.0);
        volume.integrate(&depth, &intr, &Affine3A::IDENTITY);
        assert!(volume.voxels().iter().all(|v| !v.is_observed()));
    }
}
