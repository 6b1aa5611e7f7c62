//! Volume raycasting
//!
//! Renders camera-space vertex and normal maps of the reconstructed surface
//! from an arbitrary pose. The maps serve as the ICP reference for the next
//! frame and as input to [`render`] for display images.

pub mod render;

pub use render::RenderMode;

use crate::config::KinfuConfig;
use crate::volume::TsdfVolume;
use glam::{Affine3A, Vec3};
use kinfu_data::{Intrinsics, NormalMap, VertexMap};
use rayon::prelude::*;
use tracing::debug;

/// Fixed-step ray marcher over a [`TsdfVolume`].
#[derive(Debug, Clone, Copy)]
pub struct Raycaster {
    step_factor: f32,
    gradient_delta_factor: f32,
}

impl Raycaster {
    pub fn new(config: &KinfuConfig) -> Self {
        Self {
            step_factor: config.raycast_step_factor,
            gradient_delta_factor: config.gradient_delta_factor,
        }
    }

    /// Render camera-space vertices and normals as seen from `camera_pose`.
    ///
    /// Pixels whose ray never crosses the surface from the front get NaN in
    /// both maps. A surface hit whose gradient cannot be evaluated keeps its
    /// vertex but gets a NaN normal.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn raycast(
        &self,
        volume: &TsdfVolume,
        camera_pose: &Affine3A,
        intr: &Intrinsics,
        vertices: &mut VertexMap,
        normals: &mut NormalMap,
    ) {
        debug_assert_eq!(vertices.dimensions(), normals.dimensions());
        let width = vertices.width();
        let vol_from_cam = volume.pose().inverse() * *camera_pose;
        let cam_from_vol = vol_from_cam.inverse();
        let origin: Vec3 = vol_from_cam.translation.into();
        let voxel = volume.voxel_size().min_element();
        let step = self.step_factor * voxel;
        let delta = self.gradient_delta_factor * voxel;

        let hits: usize = vertices
            .as_mut_slice()
            .par_chunks_mut(width)
            .zip(normals.as_mut_slice().par_chunks_mut(width))
            .enumerate()
            .map(|(y, (vrow, nrow))| {
                let mut hits = 0;
                for x in 0..width {
                    let dir = vol_from_cam
                        .transform_vector3(intr.ray(x as f32, y as f32))
                        .normalize();
                    vrow[x] = Vec3::NAN;
                    nrow[x] = Vec3::NAN;
                    let Some(p) = march(volume, origin, dir, step) else {
                        continue;
                    };
                    vrow[x] = cam_from_vol.transform_point3(p);
                    if let Some(n) = volume.normal_local(p, delta) {
                        nrow[x] = cam_from_vol.transform_vector3(n);
                    }
                    hits += 1;
                }
                hits
            })
            .sum();

        debug!("Raycast hit the surface in {} pixels", hits);
    }
}

/// March one ray and return the first front-facing zero crossing in volume coordinates.
fn march(volume: &TsdfVolume, origin: Vec3, dir: Vec3, step: f32) -> Option<Vec3> {
    let (t_enter, t_exit) = intersect_box(origin, dir, volume.size())?;
    let mut t = t_enter.max(0.0);
    let mut prev: Option<(f32, f32)> = None;

    while t <= t_exit {
        let value = volume.sample_local(origin + dir * t);
        match (prev, value) {
            (Some((t_prev, f_prev)), Some(f)) => {
                if f_prev > 0.0 && f <= 0.0 {
                    let t_hit = t_prev + step * f_prev / (f_prev - f);
                    return Some(origin + dir * t_hit);
                }
                if f_prev < 0.0 && f > 0.0 {
                    // Back face: the ray started behind a surface.
                    return None;
                }
            }
            _ => {}
        }
        prev = value.map(|f| (t, f));
        t += step;
    }
    None
}

/// Slab test against the box `[0, size]`. Returns the parametric entry and exit.
fn intersect_box(origin: Vec3, dir: Vec3, size: Vec3) -> Option<(f32, f32)> {
    let inv = dir.recip();
    let t0 = (Vec3::ZERO - origin) * inv;
    let t1 = (size - origin) * inv;
    let t_enter = t0.min(t1).max_element();
    let t_exit = t0.max(t1).min_element();
    (t_exit >= t_enter.max(0.0)).then_some((t_enter, t_exit))
}
