//! KinFu Core Crate
//!
//! Real-time dense reconstruction from depth streams: every frame is
//! aligned against a raycast of the fused model and then integrated into a
//! truncated signed distance volume, from which meshes, point clouds and
//! shaded views can be extracted at any time.
//!
//! ## Modules
//!
//! - [`frame`]: depth filtering and the vertex/normal pyramid
//! - [`icp`]: coarse-to-fine point-to-plane pose tracking
//! - [`volume`]: the TSDF voxel grid, integration and point cloud export
//! - [`raycast`]: surface rendering for tracking and display
//! - [`marching_cubes`]: triangle mesh extraction
//! - [`kinfu`]: the per-frame pipeline tying it all together
//! - [`ingest`]: frame sources, including synthetic scenes

pub mod config;
pub mod error;
pub mod frame;
pub mod icp;
pub mod ingest;
pub mod kinfu;
pub mod marching_cubes;
pub mod raycast;
pub mod volume;

pub use config::KinfuConfig;
pub use error::{KinfuError, Result};
pub use kinfu::{KinFu, TrackingState};
pub use raycast::RenderMode;
pub use volume::{TsdfVolume, TsdfVoxel};
