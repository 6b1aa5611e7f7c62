//! Edge-preserving bilateral depth filter.

use kinfu_data::{DepthMap, is_valid_depth};
use rayon::prelude::*;

/// Bilateral-filter `src` into `dst`.
///
/// Each valid pixel becomes a weighted mean of valid neighbours inside a
/// `kernel_size` window, weighted by pixel distance (`sigma_spatial`,
/// pixels) and depth difference (`sigma_depth`, meters). Invalid pixels stay
/// invalid so filtering never invents depth across holes.
pub fn bilateral_filter(
    src: &DepthMap,
    dst: &mut DepthMap,
    kernel_size: usize,
    sigma_spatial: f32,
    sigma_depth: f32,
) {
    debug_assert_eq!(src.dimensions(), dst.dimensions());
    let (width, height) = src.dimensions();
    let radius = (kernel_size / 2) as isize;
    let spatial_inv_half = 0.5 / (sigma_spatial * sigma_spatial);
    let depth_inv_half = 0.5 / (sigma_depth * sigma_depth);

    dst.as_mut_slice()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                let center = src.at(x, y);
                if !is_valid_depth(center) {
                    *out = 0.0;
                    continue;
                }

                let y0 = (y as isize - radius).max(0) as usize;
                let y1 = (y as isize + radius).min(height as isize - 1) as usize;
                let x0 = (x as isize - radius).max(0) as usize;
                let x1 = (x as isize + radius).min(width as isize - 1) as usize;

                let mut sum = 0.0f32;
                let mut norm = 0.0f32;
                for cy in y0..=y1 {
                    for cx in x0..=x1 {
                        let d = src.at(cx, cy);
                        if !is_valid_depth(d) {
                            continue;
                        }
                        let dx = cx as f32 - x as f32;
                        let dy = cy as f32 - y as f32;
                        let dd = d - center;
                        let w = (-(dx * dx + dy * dy) * spatial_inv_half - dd * dd * depth_inv_half)
                            .exp();
                        sum += d * w;
                        norm += w;
                    }
                }
                *out = sum / norm;
            }
        });
}
