//! Surface point extraction straight from the voxel grid.

use super::TsdfVolume;
use glam::UVec3;
use kinfu_data::{Point, PointCloud};
use rayon::prelude::*;

impl TsdfVolume {
    /// Collect zero crossings between axis-adjacent observed voxels.
    ///
    /// Points are placed by linear interpolation along the voxel edge and
    /// returned in world coordinates together with gradient normals.
    /// Crossings whose normal cannot be evaluated are dropped.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn fetch_cloud(&self, gradient_delta: f32) -> PointCloud {
        let dims = self.dims;

        let points = (0..dims.z)
            .into_par_iter()
            .flat_map_iter(|z| {
                let mut slice = Vec::new();
                for y in 0..dims.y {
                    for x in 0..dims.x {
                        let a = self.voxel(x, y, z);
                        if !a.is_observed() {
                            continue;
                        }
                        let here = UVec3::new(x, y, z);
                        for step in [UVec3::X, UVec3::Y, UVec3::Z] {
                            let next = here + step;
                            if next.cmpge(dims).any() {
                                continue;
                            }
                            let b = self.voxel(next.x, next.y, next.z);
                            if !b.is_observed() || (a.tsdf > 0.0) == (b.tsdf > 0.0) {
                                continue;
                            }
                            let t = a.tsdf / (a.tsdf - b.tsdf);
                            let pa = self.voxel_center(x, y, z);
                            let pb = self.voxel_center(next.x, next.y, next.z);
                            let p = pa + (pb - pa) * t;
                            if let Some(n) = self.normal_local(p, gradient_delta) {
                                slice.push(Point::new(
                                    self.pose.transform_point3(p),
                                    self.pose.transform_vector3(n),
                                ));
                            }
                        }
                    }
                }
                slice
            })
            .collect();

        PointCloud::new(points)
    }
}
