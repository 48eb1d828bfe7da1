// SPDX-License-Identifier: GPL-3.0-only

use barcode_camera::AppResult;
use barcode_camera::backends::camera::{CameraFacing, DeviceRotation};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "barcode-camera")]
#[command(about = "Scan barcodes from a live camera feed")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    /// Config file (default: ~/.config/barcode-camera/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras
    List,

    /// Scan barcodes until interrupted
    Scan {
        /// Camera facing to prefer (front, back, external)
        #[arg(short, long)]
        facing: Option<CameraFacing>,

        /// Fixed minimum capture width in pixels
        #[arg(short, long)]
        min_width: Option<u32>,

        /// Device rotation in degrees (0, 90, 180, 270)
        #[arg(short, long, default_value = "0")]
        rotation: DeviceRotation,

        /// Scan image files or directories through a virtual camera
        #[arg(short, long)]
        image: Vec<PathBuf>,

        /// Stop after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Stop after the first detection
        #[arg(long)]
        once: bool,
    },
}

fn main() -> AppResult<()> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=barcode_camera=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => cli::list_cameras(cli.config.as_deref()),
        Commands::Scan {
            facing,
            min_width,
            rotation,
            image,
            timeout,
            once,
        } => cli::scan(cli::ScanOptions {
            config: cli.config,
            facing,
            min_width,
            rotation,
            images: image,
            timeout,
            once,
        }),
    }
}
