//! Display images from raycast maps.

use glam::Vec3;
use image::{RgbImage, imageops};
use kinfu_data::{NormalMap, VertexMap, is_valid_vector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

const AMBIENT: f32 = 0.3;
const DIFFUSE: f32 = 0.5;
const SPECULAR: f32 = 0.2;
const SHININESS: i32 = 20;

/// What [`crate::KinFu::render_image`] draws.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Phong-shaded surface lit from a camera-space point light.
    #[default]
    Shaded,
    /// Camera-space normals mapped to RGB.
    Normals,
    /// Shaded and normals side by side, twice the frame width.
    ShadedAndNormals,
}

/// Render camera-space maps with the given mode. `light` is in camera space.
pub fn render(mode: RenderMode, vertices: &VertexMap, normals: &NormalMap, light: Vec3) -> RgbImage {
    match mode {
        RenderMode::Shaded => render_shaded(vertices, normals, light),
        RenderMode::Normals => render_normals(normals),
        RenderMode::ShadedAndNormals => {
            let shaded = render_shaded(vertices, normals, light);
            let colored = render_normals(normals);
            let mut out = RgbImage::new(shaded.width() * 2, shaded.height());
            imageops::replace(&mut out, &shaded, 0, 0);
            imageops::replace(&mut out, &colored, i64::from(shaded.width()), 0);
            out
        }
    }
}

/// Phong shading. Pixels without a vertex or normal stay black.
pub fn render_shaded(vertices: &VertexMap, normals: &NormalMap, light: Vec3) -> RgbImage {
    let (width, height) = vertices.dimensions();
    let mut image = RgbImage::new(width as u32, height as u32);
    let pixels: &mut [u8] = &mut image;

    pixels
        .par_chunks_mut(width * 3)
        .enumerate()
        .for_each(|(y, row)| {
            for x in 0..width {
                let p = vertices.at(x, y);
                let n = normals.at(x, y);
                if !is_valid_vector(p) || !is_valid_vector(n) {
                    continue;
                }
                let value = (phong(p, n, light) * 255.0).round().clamp(0.0, 255.0) as u8;
                row[x * 3..x * 3 + 3].fill(value);
            }
        });
    image
}

/// Normals mapped to `(n * 0.5 + 0.5) * 255`. Invalid pixels stay black.
pub fn render_normals(normals: &NormalMap) -> RgbImage {
    let (width, height) = normals.dimensions();
    let mut image = RgbImage::new(width as u32, height as u32);
    let pixels: &mut [u8] = &mut image;

    pixels
        .par_chunks_mut(width * 3)
        .enumerate()
        .for_each(|(y, row)| {
            for x in 0..width {
                let n = normals.at(x, y);
                if !is_valid_vector(n) {
                    continue;
                }
                let c = ((n * 0.5 + 0.5) * 255.0).clamp(Vec3::ZERO, Vec3::splat(255.0));
                row[x * 3] = c.x as u8;
                row[x * 3 + 1] = c.y as u8;
                row[x * 3 + 2] = c.z as u8;
            }
        });
    image
}

fn phong(p: Vec3, n: Vec3, light: Vec3) -> f32 {
    let l = (light - p).normalize_or_zero();
    let v = (-p).normalize_or_zero();
    let diffuse = n.dot(l).max(0.0);
    let r = 2.0 * n.dot(l) * n - l;
    let specular = r.dot(v).max(0.0).powi(SHININESS);
    AMBIENT + DIFFUSE * diffuse + SPECULAR * specular
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facing_wall(width: usize, height: usize) -> (VertexMap, NormalMap) {
        let mut vertices = VertexMap::invalid(width, height);
        let mut normals = NormalMap::invalid(width, height);
        for y in 0..height {
            for x in 0..width / 2 {
                vertices.set(x, y, Vec3::new(0.0, 0.0, 1.0));
                normals.set(x, y, Vec3::NEG_Z);
            }
        }
        (vertices, normals)
    }

    #[test]
    fn test_head_on_light_is_brightest() {
        // Light at the eye, looking straight at the surface: all terms maxed.
        let value = phong(Vec3::Z, Vec3::NEG_Z, Vec3::ZERO);
        assert!((value - 1.0).abs() < 1e-5);
        let grazing = phong(Vec3::Z, Vec3::X, Vec3::ZERO);
        assert!((grazing - AMBIENT).abs() < 1e-5);
    }

    #[test]
    fn test_shaded_leaves_invalid_black() {
        let (vertices, normals) = facing_wall(8, 4);
        let image = render_shaded(&vertices, &normals, Vec3::ZERO);
        assert_eq!(image.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(image.get_pixel(7, 3).0, [0, 0, 0]);
    }

    #[test]
    fn test_normals_color_mapping() {
        let (_, normals) = facing_wall(8, 4);
        let image = render_normals(&normals);
        assert_eq!(image.get_pixel(1, 1).0, [127, 127, 0]);
    }

    #[test]
    fn test_side_by_side_layout() {
        let (vertices, normals) = facing_wall(8, 4);
        let image = render(RenderMode::ShadedAndNormals, &vertices, &normals, Vec3::ZERO);
        assert_eq!(image.dimensions(), (16, 4));
        assert_eq!(image.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(image.get_pixel(9, 0).0, [127, 127, 0]);
    }
}
