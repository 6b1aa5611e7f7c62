//! Synthetic reconstruction example
//!
//! Fuses a short camera sweep through an analytic room and reports how
//! closely the tracked trajectory follows the ground truth.
//!
//! Usage:
//!   cargo run --release --example synthetic_reconstruction -- [frames]

use glam::Vec3;
use kinfu_core::ingest::{DepthStream, SyntheticScene, SyntheticStream};
use kinfu_core::{KinFu, KinfuConfig};
use kinfu_data::Intrinsics;
use std::error::Error;
use tracing::{info, warn};

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let frames: usize = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 20,
    };

    let config = KinfuConfig {
        cols: 320,
        rows: 240,
        intrinsics: Intrinsics::new(262.5, 262.5, 159.5, 119.5),
        ..Default::default()
    };
    let trajectory = SyntheticStream::linear_trajectory(
        Vec3::new(-0.1, 0.0, 0.0),
        Vec3::new(0.1, -0.05, 0.1),
        Vec3::new(0.0, 0.1, 1.5),
        frames,
    );
    let mut stream = SyntheticStream::new(
        SyntheticScene::room(),
        config.intrinsics,
        config.cols,
        config.rows,
        trajectory.clone(),
    )?;

    let mut kinfu = KinFu::new(KinfuConfig {
        initial_pose: trajectory[0],
        ..config
    })?;

    while let Some(frame) = stream.next_frame()? {
        if !kinfu.process(&frame.depth, frame.color.as_ref())? {
            warn!("Frame at {:.2}s lost", frame.timestamp);
        }
    }

    let max_error = kinfu
        .poses()
        .iter()
        .zip(&trajectory)
        .map(|(estimate, truth)| Vec3::from(estimate.translation - truth.translation).length())
        .fold(0.0f32, f32::max);
    info!("Tracked {} frames, max translation error {:.4} m", kinfu.frame_count(), max_error);

    let mesh = kinfu.extract_mesh();
    if let Some((min, max)) = mesh.bounds() {
        info!(
            "Mesh: {} triangles, area {:.2} m^2, bounds {} .. {}",
            mesh.triangle_count(),
            mesh.area(),
            min,
            max
        );
    }
    info!("Point cloud: {} points", kinfu.fetch_cloud().len());
    Ok(())
}
