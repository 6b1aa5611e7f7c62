//! Vertex back-projection and normal estimation.

use glam::Vec3;
use kinfu_data::{DepthMap, Intrinsics, NormalMap, VertexMap, is_valid_depth, is_valid_vector};
use rayon::prelude::*;

/// Back-project every valid depth sample into camera space.
pub fn compute_vertices(depth: &DepthMap, intr: &Intrinsics, vertices: &mut VertexMap) {
    let width = depth.width();
    vertices
        .as_mut_slice()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                let d = depth.at(x, y);
                *out = if is_valid_depth(d) {
                    intr.back_project(x as f32, y as f32, d)
                } else {
                    Vec3::NAN
                };
            }
        });
}

/// Normals from forward-difference cross products, oriented toward the camera.
///
/// A normal is invalid on the last row/column, when a neighbour vertex is
/// invalid, or when the depth jump to a neighbour exceeds `max_depth_jump`.
pub fn compute_normals(vertices: &VertexMap, normals: &mut NormalMap, max_depth_jump: f32) {
    let (width, height) = vertices.dimensions();
    normals
        .as_mut_slice()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                *out = Vec3::NAN;
                if x + 1 >= width || y + 1 >= height {
                    continue;
                }
                let v00 = vertices.at(x, y);
                let v10 = vertices.at(x + 1, y);
                let v01 = vertices.at(x, y + 1);
                if !(is_valid_vector(v00) && is_valid_vector(v10) && is_valid_vector(v01)) {
                    continue;
                }
                if (v10.z - v00.z).abs() > max_depth_jump || (v01.z - v00.z).abs() > max_depth_jump
                {
                    continue;
                }
                let n = (v10 - v00).cross(v01 - v00).normalize_or_zero();
                if n == Vec3::ZERO {
                    continue;
                }
                *out = if n.dot(v00) > 0.0 { -n } else { n };
            }
        });
}
