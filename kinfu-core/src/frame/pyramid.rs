//! 2x downsampling for depth and vertex/normal maps.

use glam::Vec3;
use kinfu_data::{DepthMap, NormalMap, VertexMap, is_valid_depth, is_valid_vector};
use rayon::prelude::*;

/// Fewest in-range samples a coarse depth pixel needs to stay valid.
const MIN_SUPPORT: usize = 3;

/// Downsample `fine` into `coarse` (half resolution).
///
/// A coarse pixel averages the 5x5 fine neighbourhood around its source
/// pixel, keeping only samples within `3 * sigma_depth` of the source. It
/// is invalid when the source pixel is invalid or fewer than
/// [`MIN_SUPPORT`] samples agree with it.
pub fn downsample_depth(fine: &DepthMap, coarse: &mut DepthMap, sigma_depth: f32) {
    let (fw, fh) = fine.dimensions();
    let cw = coarse.width();
    let threshold = 3.0 * sigma_depth;

    coarse
        .as_mut_slice()
        .par_chunks_mut(cw)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                let (sx, sy) = (2 * x, 2 * y);
                let center = fine.at(sx, sy);
                if !is_valid_depth(center) {
                    *out = 0.0;
                    continue;
                }

                let mut sum = 0.0;
                let mut count = 0;
                for cy in sy.saturating_sub(2)..(sy + 3).min(fh) {
                    for cx in sx.saturating_sub(2)..(sx + 3).min(fw) {
                        let d = fine.at(cx, cy);
                        if is_valid_depth(d) && (d - center).abs() < threshold {
                            sum += d;
                            count += 1;
                        }
                    }
                }
                *out = if count >= MIN_SUPPORT {
                    sum / count as f32
                } else {
                    0.0
                };
            }
        });
}

/// Downsample vertex and normal maps by averaging 2x2 blocks.
///
/// A block with any invalid vertex or normal yields an invalid output.
pub fn downsample_points_normals(
    fine_vertices: &VertexMap,
    fine_normals: &NormalMap,
    coarse_vertices: &mut VertexMap,
    coarse_normals: &mut NormalMap,
) {
    let cw = coarse_vertices.width();

    coarse_vertices
        .as_mut_slice()
        .par_chunks_mut(cw)
        .zip(coarse_normals.as_mut_slice().par_chunks_mut(cw))
        .enumerate()
        .for_each(|(y, (vrow, nrow))| {
            for x in 0..cw {
                let mut v_sum = Vec3::ZERO;
                let mut n_sum = Vec3::ZERO;
                let mut valid = true;
                for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                    let v = fine_vertices.at(2 * x + dx, 2 * y + dy);
                    let n = fine_normals.at(2 * x + dx, 2 * y + dy);
                    if !is_valid_vector(v) || !is_valid_vector(n) {
                        valid = false;
                        break;
                    }
                    v_sum += v;
                    n_sum += n;
                }
                let n = n_sum.normalize_or_zero();
                if valid && n != Vec3::ZERO {
                    vrow[x] = v_sum * 0.25;
                    nrow[x] = n;
                } else {
                    vrow[x] = Vec3::NAN;
                    nrow[x] = Vec3::NAN;
                }
            }
        });
}
