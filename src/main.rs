// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use depthcap::BitratePreset;
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "depthcap")]
#[command(about = "Record, play back and convert depth camera captures")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record depth and color from the first device until Ctrl+C
    Record {
        /// Capture file path (default: ~/OrbbecCamera/build/projects/record_video.obs)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Play back every stream of a capture file
    Play {
        /// Capture file path (default: ~/OrbbecCamera/build/projects/record_video.obs)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Encode the color stream of a capture file to MP4
    Convert {
        /// Capture file path (default: ~/OrbbecCamera/build/projects/record_video.obs)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Video file path (default: ~/OrbbecCamera/build/projects/record_video.mp4)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Encoder bitrate preset
        #[arg(short, long, value_enum)]
        bitrate: Option<BitratePreset>,
    },

    /// List detected depth devices
    List,

    /// Show the streams of a capture file
    Info {
        /// Capture file path (default: ~/OrbbecCamera/build/projects/record_video.obs)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control log level, e.g. RUST_LOG=depthcap=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("depthcap=info,warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Record { output } => cli::record(output),
        Commands::Play { input } => cli::play(input),
        Commands::Convert {
            input,
            output,
            bitrate,
        } => cli::convert(input, output, bitrate),
        Commands::List => cli::list_devices(),
        Commands::Info { input, json } => cli::info(input, json),
    }
}
