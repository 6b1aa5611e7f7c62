//! Per-frame pipeline orchestration.

use crate::config::KinfuConfig;
use crate::error::{KinfuError, Result};
use crate::frame::{FramePreprocessor, Pyramid};
use crate::icp::ProjectiveIcp;
use crate::marching_cubes;
use crate::raycast::{RenderMode, Raycaster, render};
use crate::volume::TsdfVolume;
use glam::{Affine3A, Quat, Vec3};
use image::RgbImage;
use kinfu_data::{DepthMap, Mesh, NormalMap, PointCloud, VertexMap};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Tracker lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingState {
    /// No frame processed since construction or the last reset.
    Uninitialized,
    /// The last frame was aligned successfully.
    Tracking,
    /// The last frame failed to align; the model was left untouched.
    Lost,
}

/// KinectFusion-style reconstruction engine.
///
/// Owns the volume and every per-frame working buffer. Frames are processed
/// strictly one at a time: preprocess, track, integrate, raycast.
pub struct KinFu {
    config: KinfuConfig,
    preprocessor: FramePreprocessor,
    icp: ProjectiveIcp,
    raycaster: Raycaster,
    volume: TsdfVolume,
    /// Pyramid of the frame being processed.
    curr: Pyramid,
    /// Reference pyramid the next frame is tracked against.
    prev: Pyramid,
    render_vertices: VertexMap,
    render_normals: NormalMap,
    poses: Vec<Affine3A>,
    last_integrated: Option<Affine3A>,
    state: TrackingState,
}

impl KinFu {
    /// Validate `config` and allocate every buffer.
    pub fn new(config: KinfuConfig) -> Result<Self> {
        config.validate()?;

        let volume = TsdfVolume::from_config(&config)?;
        let levels = config.levels();
        let curr = Pyramid::try_new(config.cols, config.rows, levels)?;
        let prev = Pyramid::try_new(config.cols, config.rows, levels)?;
        let count = config.cols.saturating_mul(config.rows);
        let render_vertices = VertexMap::try_new(config.cols, config.rows, Vec3::NAN)
            .map_err(KinfuError::alloc::<Vec3>("render vertices", count))?;
        let render_normals = NormalMap::try_new(config.cols, config.rows, Vec3::NAN)
            .map_err(KinfuError::alloc::<Vec3>("render normals", count))?;

        info!(
            "KinFu ready: {}x{} frames, {} pyramid levels, {} voxels ({} MiB), {} worker threads",
            config.cols,
            config.rows,
            levels,
            volume.voxels().len(),
            volume.as_bytes().len() >> 20,
            rayon::current_num_threads()
        );

        Ok(Self {
            preprocessor: FramePreprocessor::new(&config),
            icp: ProjectiveIcp::new(&config),
            raycaster: Raycaster::new(&config),
            volume,
            curr,
            prev,
            render_vertices,
            render_normals,
            poses: Vec::new(),
            last_integrated: None,
            state: TrackingState::Uninitialized,
            config,
        })
    }

    pub fn config(&self) -> &KinfuConfig {
        &self.config
    }

    pub fn volume(&self) -> &TsdfVolume {
        &self.volume
    }

    pub fn tracking_state(&self) -> TrackingState {
        self.state
    }

    /// Camera-to-world poses, one per processed frame.
    pub fn poses(&self) -> &[Affine3A] {
        &self.poses
    }

    pub fn frame_count(&self) -> usize {
        self.poses.len()
    }

    /// Run one pipeline cycle.
    ///
    /// Returns `Ok(true)` when the frame was tracked (it may still be skipped
    /// for integration by the movement gate) and `Ok(false)` when tracking
    /// was lost, in which case the volume is untouched and the previous pose
    /// is repeated in the history. The color image is only checked for size.
    #[tracing::instrument(skip_all, fields(frame = self.poses.len()))]
    pub fn process(&mut self, depth: &DepthMap, color: Option<&RgbImage>) -> Result<bool> {
        let expected = (self.config.cols, self.config.rows);
        if depth.dimensions() != expected {
            return Err(KinfuError::FrameSizeMismatch {
                expected,
                actual: depth.dimensions(),
            });
        }
        if let Some(color) = color {
            let actual = (color.width() as usize, color.height() as usize);
            if actual != expected {
                return Err(KinfuError::FrameSizeMismatch { expected, actual });
            }
            debug!("Color frame supplied; fusion uses depth only");
        }

        self.preprocessor.process(depth, &mut self.curr);
        let intr = self.config.intrinsics;

        let Some(&prev_pose) = self.poses.last() else {
            let pose = self.config.initial_pose;
            self.volume.integrate(depth, &intr, &pose);
            self.last_integrated = Some(pose);
            // The measured pyramid is the first reference.
            std::mem::swap(&mut self.curr, &mut self.prev);
            self.poses.push(pose);
            self.state = TrackingState::Tracking;
            info!("First frame integrated");
            return Ok(true);
        };

        let Some(delta) = self.icp.estimate_transform(&self.curr, &self.prev) else {
            self.poses.push(prev_pose);
            self.state = TrackingState::Lost;
            warn!("Tracking lost at frame {}", self.poses.len() - 1);
            return Ok(false);
        };

        let pose = prev_pose * delta;
        if self.should_integrate(&pose) {
            self.volume.integrate(depth, &intr, &pose);
            self.last_integrated = Some(pose);
        } else {
            debug!("Camera barely moved; integration skipped");
        }

        let reference = self.prev.level_mut(0);
        self.raycaster.raycast(
            &self.volume,
            &pose,
            &intr,
            &mut reference.vertices,
            &mut reference.normals,
        );
        self.prev.downsample_vertices_and_normals();

        self.poses.push(pose);
        if self.state == TrackingState::Lost {
            info!("Tracking recovered");
        }
        self.state = TrackingState::Tracking;
        Ok(true)
    }

    /// Movement gate: mean of rotation angle (radians) and translation
    /// (meters) since the last integrated pose.
    fn should_integrate(&self, pose: &Affine3A) -> bool {
        let Some(last) = self.last_integrated else {
            return true;
        };
        let relative = last.inverse() * *pose;
        let (_, angle) = Quat::from_mat3a(&relative.matrix3).to_axis_angle();
        let movement = (angle.abs() + Vec3::from(relative.translation).length()) * 0.5;
        movement >= self.config.tsdf_min_camera_movement
    }

    /// Pose of frame `frame`, or of the latest frame for `None`.
    pub fn camera_pose(&self, frame: impl Into<Option<usize>>) -> Result<Affine3A> {
        let len = self.poses.len();
        let index = match frame.into() {
            Some(index) => index,
            None => len.checked_sub(1).ok_or(KinfuError::IndexOutOfRange { index: 0, len })?,
        };
        self.poses
            .get(index)
            .copied()
            .ok_or(KinfuError::IndexOutOfRange { index, len })
    }

    /// Raycast the model and shade it for display.
    ///
    /// Without a pose the latest tracked pose is used, or the initial pose
    /// before the first frame.
    pub fn render_image(&mut self, pose: Option<Affine3A>, mode: RenderMode) -> RgbImage {
        let pose = pose
            .or_else(|| self.poses.last().copied())
            .unwrap_or(self.config.initial_pose);
        self.raycaster.raycast(
            &self.volume,
            &pose,
            &self.config.intrinsics,
            &mut self.render_vertices,
            &mut self.render_normals,
        );
        render::render(
            mode,
            &self.render_vertices,
            &self.render_normals,
            self.config.light_position,
        )
    }

    /// Triangle soup of the current surface, in world coordinates.
    pub fn extract_mesh(&self) -> Mesh {
        marching_cubes::extract_mesh(&self.volume)
    }

    /// Oriented surface points of the current model, in world coordinates.
    pub fn fetch_cloud(&self) -> PointCloud {
        let delta = self.config.gradient_delta_factor * self.volume.voxel_size().min_element();
        self.volume.fetch_cloud(delta)
    }

    /// Clear the model and the pose history.
    pub fn reset(&mut self) {
        self.volume.clear();
        self.poses.clear();
        self.last_integrated = None;
        self.state = TrackingState::Uninitialized;
        info!("Reset");
    }

    /// Reset and move the volume to a new world pose.
    pub fn reset_with_volume_pose(&mut self, volume_pose: Affine3A) {
        self.config.volume_pose = volume_pose;
        self.volume.set_pose(volume_pose);
        self.reset();
    }
}
