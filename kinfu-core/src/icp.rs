//! Dense projective point-to-plane ICP.
//!
//! Aligns the current frame's vertex/normal pyramid against the raycast
//! reference pyramid, coarsest level first. Correspondences come from
//! projecting each source vertex into the reference image; each accepted
//! pair contributes one row to a 6x6 Gauss-Newton system that is reduced
//! across all pixels in parallel and solved with a Cholesky factorization.

use crate::config::KinfuConfig;
use crate::frame::{Pyramid, PyramidLevel};
use glam::{Affine3A, Mat3, Vec3};
use kinfu_data::{Intrinsics, is_valid_vector};
use nalgebra::{Matrix6, Vector6};
use rayon::prelude::*;
use tracing::{debug, warn};

/// Updates larger than this (radians or meters) in a single step are treated as divergence.
const MAX_STEP: f32 = 0.5;
/// Updates smaller than this end the current level early.
const CONVERGED_STEP: f64 = 1e-7;

/// Accumulated normal equations `A x = b` for one iteration.
#[derive(Debug, Clone, Copy)]
struct NormalEquations {
    ata: Matrix6<f64>,
    atb: Vector6<f64>,
    count: usize,
    error: f64,
}

impl NormalEquations {
    fn zero() -> Self {
        Self {
            ata: Matrix6::zeros(),
            atb: Vector6::zeros(),
            count: 0,
            error: 0.0,
        }
    }

    /// Add one point-to-plane row `J = [p x n, n]` with residual `r`.
    fn push(&mut self, p: Vec3, n: Vec3, r: f32) {
        let c = p.cross(n);
        let j = Vector6::new(
            c.x as f64, c.y as f64, c.z as f64, n.x as f64, n.y as f64, n.z as f64,
        );
        let r = r as f64;
        self.ata += j * j.transpose();
        self.atb -= j * r;
        self.count += 1;
        self.error += r * r;
    }

    fn merge(mut self, other: Self) -> Self {
        self.ata += other.ata;
        self.atb += other.atb;
        self.count += other.count;
        self.error += other.error;
        self
    }

    fn rms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.error / self.count as f64).sqrt()
        }
    }

    /// Solve for `[omega, delta_t]`, or `None` if the system is not positive definite.
    fn solve(&self) -> Option<Vector6<f64>> {
        let x = self.ata.cholesky()?.solve(&self.atb);
        x.iter().all(|v| v.is_finite()).then_some(x)
    }
}

/// Coarse-to-fine projective ICP tracker.
#[derive(Debug, Clone)]
pub struct ProjectiveIcp {
    intrinsics: Intrinsics,
    dist_thres: f32,
    cos_angle_thres: f32,
    truncate_depth: f32,
    iterations: Vec<usize>,
    min_correspondences: usize,
}

impl ProjectiveIcp {
    pub fn new(config: &KinfuConfig) -> Self {
        Self {
            intrinsics: config.intrinsics,
            dist_thres: config.icp_dist_thres,
            cos_angle_thres: config.icp_angle_thres.cos(),
            truncate_depth: config.icp_truncate_depth_dist,
            iterations: config.icp_iter_num.clone(),
            min_correspondences: config.icp_min_correspondences,
        }
    }

    /// Estimate the transform taking `source` camera coordinates into
    /// `reference` camera coordinates.
    ///
    /// Returns `None` when tracking is lost on any level: too few
    /// correspondences, a singular system, or a diverging update.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn estimate_transform(&self, source: &Pyramid, reference: &Pyramid) -> Option<Affine3A> {
        let levels = self.iterations.len().min(source.len()).min(reference.len());
        let mut pose = Affine3A::IDENTITY;

        for level in (0..levels).rev() {
            let intr = self.intrinsics.level(level);
            let src = source.level(level);
            let dst = reference.level(level);
            let mut last = NormalEquations::zero();

            for iteration in 0..self.iterations[level] {
                let system = self.build_system(&pose, src, dst, &intr);
                if system.count < self.min_correspondences {
                    debug!(
                        "ICP level {} iteration {}: {} correspondences, below {}",
                        level, iteration, system.count, self.min_correspondences
                    );
                    return None;
                }
                let Some(x) = system.solve() else {
                    warn!("ICP level {} iteration {}: singular system", level, iteration);
                    return None;
                };

                let omega = Vec3::new(x[0] as f32, x[1] as f32, x[2] as f32);
                let delta_t = Vec3::new(x[3] as f32, x[4] as f32, x[5] as f32);
                if step_diverges(omega, delta_t) {
                    warn!(
                        "ICP level {} iteration {}: update diverged (rotation {:.3}, translation {:.3})",
                        level,
                        iteration,
                        omega.length(),
                        delta_t.length()
                    );
                    return None;
                }

                let increment =
                    Affine3A::from_mat3_translation(small_angle_rotation(omega), delta_t);
                pose = increment * pose;
                last = system;

                if x.norm() < CONVERGED_STEP {
                    break;
                }
            }
            debug!(
                "ICP level {} done: {} correspondences, rms {:.5}",
                level,
                last.count,
                last.rms()
            );
        }

        Some(pose)
    }

    /// Associate and accumulate one Gauss-Newton system at a pyramid level.
    fn build_system(
        &self,
        pose: &Affine3A,
        src: &PyramidLevel,
        dst: &PyramidLevel,
        intr: &Intrinsics,
    ) -> NormalEquations {
        let (width, height) = src.dimensions();
        let (ref_width, ref_height) = dst.dimensions();

        (0..height)
            .into_par_iter()
            .fold(NormalEquations::zero, |mut acc, y| {
                for x in 0..width {
                    let v = src.vertices.at(x, y);
                    let n = src.normals.at(x, y);
                    if !is_valid_vector(v) || !is_valid_vector(n) {
                        continue;
                    }
                    if self.truncate_depth > 0.0 && v.z > self.truncate_depth {
                        continue;
                    }

                    let p = pose.transform_point3(v);
                    if p.z <= 0.0 {
                        continue;
                    }
                    let uv = intr.project(p).round();
                    if uv.x < 0.0 || uv.y < 0.0 {
                        continue;
                    }
                    let (u, w) = (uv.x as usize, uv.y as usize);
                    if u >= ref_width || w >= ref_height {
                        continue;
                    }

                    let q = dst.vertices.at(u, w);
                    let nq = dst.normals.at(u, w);
                    if !is_valid_vector(q) || !is_valid_vector(nq) {
                        continue;
                    }
                    if p.distance(q) > self.dist_thres {
                        continue;
                    }
                    if pose.transform_vector3(n).dot(nq) < self.cos_angle_thres {
                        continue;
                    }

                    acc.push(p, nq, nq.dot(p - q));
                }
                acc
            })
            .reduce(NormalEquations::zero, NormalEquations::merge)
    }
}

#[inline]
fn step_diverges(omega: Vec3, delta_t: Vec3) -> bool {
    !(omega.length() <= MAX_STEP && delta_t.length() <= MAX_STEP)
}

/// `I + [omega]x`, re-orthonormalized by Gram-Schmidt.
fn small_angle_rotation(omega: Vec3) -> Mat3 {
    let linear = Mat3::from_cols(
        Vec3::new(1.0, omega.z, -omega.y),
        Vec3::new(-omega.z, 1.0, omega.x),
        Vec3::new(omega.y, -omega.x, 1.0),
    );
    orthonormalize(linear)
}

fn orthonormalize(m: Mat3) -> Mat3 {
    let x = m.x_axis.normalize();
    let y = (m.y_axis - x * x.dot(m.y_axis)).normalize();
    let z = x.cross(y);
    Mat3::from_cols(x, y, z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FramePreprocessor;
    use glam::Quat;
    use kinfu_data::DepthMap;

    fn config() -> KinfuConfig {
        KinfuConfig {
            cols: 128,
            rows: 96,
            intrinsics: Intrinsics::new(100.0, 100.0, 63.5, 47.5),
            icp_iter_num: vec![10, 10, 10],
            icp_min_correspondences: 50,
            ..Default::default()
        }
    }

    /// A bumpy surface that constrains all six degrees of freedom.
    fn bumpy_pyramid(config: &KinfuConfig) -> Pyramid {
        let mut depth = DepthMap::new(config.cols, config.rows, 0.0);
        for y in 0..config.rows {
            for x in 0..config.cols {
                let (fx, fy) = (x as f32 / 15.0, y as f32 / 12.0);
                depth.set(x, y, 1.2 + 0.1 * fx.sin() + 0.08 * fy.cos() + 0.001 * x as f32);
            }
        }
        let mut pyramid = Pyramid::try_new(config.cols, config.rows, config.levels()).unwrap();
        FramePreprocessor::new(config).process(&depth, &mut pyramid);
        pyramid
    }

    /// Express the reference geometry in a camera displaced by `motion`.
    fn moved(reference: &Pyramid, motion: &Affine3A) -> Pyramid {
        let inverse = motion.inverse();
        let mut source = reference.clone();
        for l in 0..source.len() {
            let level = source.level_mut(l);
            for v in level.vertices.as_mut_slice() {
                *v = inverse.transform_point3(*v);
            }
            for n in level.normals.as_mut_slice() {
                *n = inverse.transform_vector3(*n);
            }
        }
        source
    }

    #[test]
    fn test_small_angle_rotation_is_orthonormal() {
        let r = small_angle_rotation(Vec3::new(0.05, -0.02, 0.1));
        assert!((r.determinant() - 1.0).abs() < 1e-5);
        assert!((r * r.transpose()).abs_diff_eq(Mat3::IDENTITY, 1e-5));
    }

    #[test]
    fn test_identical_frames_converge_to_identity() {
        let config = config();
        let reference = bumpy_pyramid(&config);
        let pose = ProjectiveIcp::new(&config)
            .estimate_transform(&reference, &reference)
            .expect("tracking should succeed");
        assert!(pose.abs_diff_eq(Affine3A::IDENTITY, 1e-4), "{pose:?}");
    }

    #[test]
    fn test_recovers_small_motion() {
        let config = config();
        let reference = bumpy_pyramid(&config);
        let motion = Affine3A::from_rotation_translation(
            Quat::from_euler(glam::EulerRot::XYZ, 0.01, -0.015, 0.02),
            Vec3::new(0.01, -0.008, 0.015),
        );
        let source = moved(&reference, &motion);

        let pose = ProjectiveIcp::new(&config)
            .estimate_transform(&source, &reference)
            .expect("tracking should succeed");
        let translation_error = Vec3::from(pose.translation - motion.translation).length();
        assert!(translation_error < 2e-3, "translation error {translation_error}");
        assert!(pose.matrix3.abs_diff_eq(motion.matrix3, 2e-3));
    }

    #[test]
    fn test_step_divergence_limits() {
        assert!(!step_diverges(Vec3::splat(0.1), Vec3::new(0.0, 0.0, 0.3)));
        assert!(step_diverges(Vec3::ZERO, Vec3::new(0.0, 0.0, 0.6)));
        assert!(step_diverges(Vec3::new(0.6, 0.0, 0.0), Vec3::ZERO));
        assert!(step_diverges(Vec3::NAN, Vec3::ZERO));
    }

    #[test]
    fn test_diverging_update_is_lost() {
        // Loose gates let every pixel pair up, so the first Gauss-Newton
        // step tries to close a 0.7 m gap in one go.
        let config = KinfuConfig {
            icp_dist_thres: 2.0,
            ..config()
        };
        let reference = bumpy_pyramid(&config);
        let motion = Affine3A::from_translation(Vec3::new(0.0, 0.0, 0.7));
        let source = moved(&reference, &motion);
        assert!(ProjectiveIcp::new(&config).estimate_transform(&source, &reference).is_none());
    }

    #[test]
    fn test_empty_reference_is_lost() {
        let config = config();
        let source = bumpy_pyramid(&config);
        let reference = Pyramid::try_new(config.cols, config.rows, config.levels()).unwrap();
        assert!(ProjectiveIcp::new(&config).estimate_transform(&source, &reference).is_none());
    }

    #[test]
    fn test_normal_equations_merge_sums_counts() {
        let mut a = NormalEquations::zero();
        a.push(Vec3::Z, Vec3::NEG_Z, 0.1);
        let mut b = NormalEquations::zero();
        b.push(Vec3::X, Vec3::NEG_Z, -0.1);
        let merged = a.merge(b);
        assert_eq!(merged.count, 2);
        assert!((merged.error - 0.02).abs() < 1e-9);
    }
}
