//! Frame sources
//!
//! - [`stream`]: the depth stream interface consumed by runners
//! - [`synthetic`]: analytic scenes rendered along a camera trajectory

pub mod stream;
pub mod synthetic;

pub use stream::{DepthStream, ImageSequenceStream, RgbdFrame, StreamError, load_depth_png};
pub use synthetic::{Primitive, SyntheticScene, SyntheticStream, look_at};
