//! Run loop and logging setup.

use glam::Vec3;
use kinfu_core::ingest::{
    DepthStream, ImageSequenceStream, StreamError, SyntheticScene, SyntheticStream,
};
use kinfu_core::{KinFu, KinfuConfig, KinfuError, RenderMode};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Engine error: {0}")]
    Engine(#[from] KinfuError),
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("No frames to process")]
    NoFrames,
}

/// Logging configuration.
pub struct LoggingConfig {
    pub level: String,
    pub enable_tracy: bool,
}

pub fn init_logging(logging: &LoggingConfig) {
    #[cfg(feature = "tracy")]
    {
        if logging.enable_tracy {
            use tracing_subscriber::Layer;
            use tracing_subscriber::layer::SubscriberExt;
            use tracing_subscriber::util::SubscriberInitExt;
            tracing_subscriber::registry()
                .with(tracing_tracy::TracyLayer::default())
                .with(
                    tracing_subscriber::fmt::layer().with_filter(
                        tracing_subscriber::EnvFilter::try_from_default_env()
                            .unwrap_or_else(|_| logging.level.clone().into()),
                    ),
                )
                .init();
            return;
        }
    }
    #[cfg(not(feature = "tracy"))]
    if logging.enable_tracy {
        eprintln!("Tracy requested but kinfu was built without the `tracy` feature");
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level)),
        )
        .with_target(false)
        .init();
}

/// What to fuse and what to write out.
pub struct RunOptions {
    pub config: Option<PathBuf>,
    pub depth: Vec<PathBuf>,
    pub frames: usize,
    pub step: f32,
    pub render: Option<PathBuf>,
    pub mode: RenderMode,
}

pub fn run(options: RunOptions) -> Result<(), AppError> {
    let mut config = match &options.config {
        Some(path) => KinfuConfig::from_json_file(path)?,
        None => KinfuConfig::default(),
    };

    let mut stream: Box<dyn DepthStream> = if options.depth.is_empty() {
        if options.frames == 0 {
            return Err(AppError::NoFrames);
        }
        let travel = options.step * (options.frames - 1) as f32;
        let trajectory = SyntheticStream::linear_trajectory(
            Vec3::new(-travel * 0.5, 0.0, 0.0),
            Vec3::new(travel * 0.5, 0.0, 0.0),
            Vec3::new(0.0, 0.1, 1.5),
            options.frames,
        );
        config.initial_pose = trajectory[0];
        info!("Synthetic room sweep: {} frames, {:.3} m total", options.frames, travel);
        Box::new(SyntheticStream::new(
            SyntheticScene::room(),
            config.intrinsics,
            config.cols,
            config.rows,
            trajectory,
        )?)
    } else {
        info!("Playing back {} depth images", options.depth.len());
        let frames = options.depth.iter().map(|p| (p.clone(), None)).collect();
        Box::new(ImageSequenceStream::new(frames, 30.0))
    };

    let mut kinfu = KinFu::new(config)?;
    let mut lost = 0;
    let mut worst_error = 0.0f32;
    let start = Instant::now();

    while let Some(frame) = stream.next_frame()? {
        if !kinfu.process(&frame.depth, frame.color.as_ref())? {
            lost += 1;
            continue;
        }
        if let Some(truth) = frame.ground_truth {
            let estimate = kinfu.camera_pose(None)?;
            let error = Vec3::from(estimate.translation - truth.translation).length();
            worst_error = worst_error.max(error);
        }
    }

    if kinfu.frame_count() == 0 {
        return Err(AppError::NoFrames);
    }
    let elapsed = start.elapsed();
    info!(
        "Processed {} frames in {:.2?} ({:.1} fps), {} lost",
        kinfu.frame_count(),
        elapsed,
        kinfu.frame_count() as f64 / elapsed.as_secs_f64(),
        lost
    );
    if worst_error > 0.0 {
        info!("Worst translation error against ground truth: {:.4} m", worst_error);
    }
    if lost > 0 {
        warn!("Tracking was lost on {} frames", lost);
    }

    let mesh = kinfu.extract_mesh();
    info!(
        "Mesh: {} triangles, {:.2} m^2, {} KiB of vertex and index data",
        mesh.triangle_count(),
        mesh.area(),
        (mesh.vertex_bytes().len() + mesh.index_bytes().len()) >> 10
    );

    if let Some(path) = &options.render {
        let image = kinfu.render_image(None, options.mode);
        image.save(path)?;
        info!("Wrote render to {}", path.display());
    }
    Ok(())
}
