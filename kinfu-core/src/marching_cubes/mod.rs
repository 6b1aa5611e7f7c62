//! Surface extraction from a TSDF volume.

pub mod tables;

use crate::volume::TsdfVolume;
use glam::{UVec3, Vec3};
use kinfu_data::Mesh;
use rayon::prelude::*;
use tracing::info;

/// Extract the zero level set of `volume` as a world-space triangle soup.
///
/// Cubes touching any unobserved voxel are skipped, so the mesh only
/// covers space the sensor has seen. Triangles face free space.
#[tracing::instrument(skip_all)]
pub fn extract_mesh(volume: &TsdfVolume) -> Mesh {
    let dims = volume.dims();
    if dims.min_element() < 2 {
        return Mesh::new();
    }

    let slices: Vec<Vec<Vec3>> = (0..dims.z - 1)
        .into_par_iter()
        .map(|z| extract_slice(volume, z))
        .collect();
    let vertices: Vec<Vec3> = slices.into_iter().flatten().collect();

    let mesh = Mesh::from_triangle_soup(vertices);
    info!("Extracted mesh with {} triangles", mesh.triangle_count());
    mesh
}

fn extract_slice(volume: &TsdfVolume, z: u32) -> Vec<Vec3> {
    let dims = volume.dims();
    let pose = volume.pose();
    let mut out = Vec::new();

    for y in 0..dims.y - 1 {
        for x in 0..dims.x - 1 {
            let base = UVec3::new(x, y, z);
            let mut values = [0.0f32; 8];
            let mut observed = true;
            let mut case = 0u8;
            for (i, offset) in tables::CORNERS.iter().enumerate() {
                let c = base + UVec3::from_array(*offset);
                let voxel = volume.voxel(c.x, c.y, c.z);
                if !voxel.is_observed() {
                    observed = false;
                    break;
                }
                values[i] = voxel.tsdf;
                if voxel.tsdf < 0.0 {
                    case |= 1 << i;
                }
            }
            if !observed || case == 0 || case == u8::MAX {
                continue;
            }

            let mut points = [Vec3::ZERO; 12];
            let mask = tables::edge_mask(case);
            for (e, [a, b]) in tables::EDGES.iter().enumerate() {
                if mask & (1 << e) == 0 {
                    continue;
                }
                let pa = corner_center(volume, base, *a);
                let pb = corner_center(volume, base, *b);
                let t = values[*a] / (values[*a] - values[*b]);
                points[e] = pose.transform_point3(pa.lerp(pb, t));
            }

            for tri in &tables::TRIANGLES[case as usize] {
                out.extend(tri.iter().map(|&e| points[e as usize]));
            }
        }
    }
    out
}

#[inline]
fn corner_center(volume: &TsdfVolume, base: UVec3, corner: usize) -> Vec3 {
    let c = base + UVec3::from_array(tables::CORNERS[corner]);
    volume.voxel_center(c.x, c.y, c.z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::TsdfVoxel;
    use glam::Affine3A;

    fn volume(dims: u32) -> TsdfVolume {
        TsdfVolume::new(
            UVec3::splat(dims),
            Vec3::ONE,
            Affine3A::from_translation(Vec3::new(-0.5, -0.5, 0.0)),
            0.1,
            16,
        )
        .unwrap()
    }

    /// Fill every voxel from a field over volume coordinates.
    fn fill(volume: &mut TsdfVolume, field: impl Fn(Vec3) -> f32) {
        let dims = volume.dims();
        for z in 0..dims.z {
            for y in 0..dims.y {
                for x in 0..dims.x {
                    let tsdf = field(volume.voxel_center(x, y, z)).clamp(-1.0, 1.0);
                    let index = volume.index(x, y, z);
                    volume.voxels_mut()[index] = TsdfVoxel { tsdf, weight: 1 };
                }
            }
        }
    }

    #[test]
    fn test_empty_volume_gives_empty_mesh() {
        let mesh = extract_mesh(&volume(16));
        assert!(mesh.is_empty());
    }

    #[test]
    fn test_no_crossing_gives_empty_mesh() {
        let mut v = volume(16);
        fill(&mut v, |_| 0.5);
        assert!(extract_mesh(&v).is_empty());
    }

    #[test]
    fn test_plane_mesh_lies_on_plane_and_faces_free_space() {
        let mut v = volume(16);
        let wall = 0.37;
        // Free space at small x, behind the wall at large x.
        fill(&mut v, |p| (wall - p.x) / 0.1);
        let mesh = extract_mesh(&v);

        assert!(!mesh.is_empty());
        for p in &mesh.vertices {
            assert!((p.x - (wall - 0.5)).abs() < 1e-4, "vertex {p}");
        }
        for tri in mesh.triangles() {
            if tri.area() > 1e-9 {
                assert!(tri.unit_normal().dot(Vec3::NEG_X) > 0.99);
            }
        }
        // 15x15 cubes, two triangles each.
        assert_eq!(mesh.triangle_count(), 15 * 15 * 2);
    }

    #[test]
    fn test_sphere_normals_point_outward() {
        let mut v = volume(24);
        let center = Vec3::splat(0.5);
        let radius = 0.3;
        fill(&mut v, |p| (p.distance(center) - radius) / 0.1);
        let mesh = extract_mesh(&v);

        let world_center = Vec3::new(0.0, 0.0, 0.5);
        assert!(mesh.triangle_count() > 100);
        for tri in mesh.triangles() {
            assert!((tri.center().distance(world_center) - radius).abs() < 0.02);
            if tri.area() > 1e-10 {
                assert!(tri.normal().dot(tri.center() - world_center) > 0.0);
            }
        }
    }

    #[test]
    fn test_unobserved_cubes_are_skipped() {
        let mut v = volume(16);
        fill(&mut v, |p| (0.37 - p.x) / 0.1);
        let full = extract_mesh(&v).triangle_count();
        let index = v.index(5, 5, 5);
        v.voxels_mut()[index] = TsdfVoxel::EMPTY;
        let partial = extract_mesh(&v).triangle_count();
        // The plane at x = 0.37 crosses x in 5..6, so the hole removes cubes around (5,5,5).
        assert!(partial < full);
    }
}
