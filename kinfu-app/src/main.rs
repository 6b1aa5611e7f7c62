//! KinFu Runner
//!
//! Drives the fusion engine over a depth sequence and reports the result.
//!
//! Features:
//! - Synthetic room sweep with ground-truth error reporting
//! - Playback of explicit 16-bit depth PNG lists
//! - Optional shaded render of the final model

mod app;

use clap::{Parser, ValueEnum};
use kinfu_core::RenderMode;
use std::path::PathBuf;

/// Display image layout for `--render`.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Shaded,
    Normals,
    Both,
}

impl From<Mode> for RenderMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Shaded => RenderMode::Shaded,
            Mode::Normals => RenderMode::Normals,
            Mode::Both => RenderMode::ShadedAndNormals,
        }
    }
}

/// KinFu - dense TSDF reconstruction from depth streams
#[derive(Parser, Debug)]
#[command(name = "kinfu")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON engine config; missing fields take defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Depth PNGs (16-bit millimeters) to fuse in order; synthetic room if empty
    #[arg(short, long, num_args = 1..)]
    depth: Vec<PathBuf>,

    /// Number of synthetic frames
    #[arg(short, long, default_value_t = 30)]
    frames: usize,

    /// Synthetic camera travel per frame (meters)
    #[arg(long, default_value_t = 0.01)]
    step: f32,

    /// Write a render of the final model to this PNG
    #[arg(short, long)]
    render: Option<PathBuf>,

    /// Render layout
    #[arg(short, long, value_enum, default_value_t = Mode::Shaded)]
    mode: Mode,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Stream spans to Tracy (requires the `tracy` feature)
    #[arg(long)]
    tracy: bool,
}

fn main() {
    let args = Args::parse();

    app::init_logging(&app::LoggingConfig {
        level: args.log_level.clone(),
        enable_tracy: args.tracy,
    });

    let options = app::RunOptions {
        config: args.config,
        depth: args.depth,
        frames: args.frames,
        step: args.step,
        render: args.render,
        mode: args.mode.into(),
    };
    if let Err(e) = app::run(options) {
        eprintln!("Application error: {}", e);
        std::process::exit(1);
    }
}
