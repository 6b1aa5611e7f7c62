//! Kinfu Data Crate
//!
//! Plain data types shared by the fusion engine and its collaborators:
//! 2D per-pixel maps (depth, vertices, normals), pinhole intrinsics, and the
//! mesh / point cloud snapshots produced from a reconstructed volume.
//! This crate carries no algorithms beyond small geometric helpers.

pub mod camera;
pub mod map;
pub mod mesh;
pub mod point_cloud;

pub use camera::Intrinsics;
pub use map::{DepthMap, Map2D, NormalMap, VertexMap, is_valid_depth, is_valid_vector};
pub use mesh::{Mesh, Triangle};
pub use point_cloud::{Point, PointCloud};
