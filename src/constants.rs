// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use crate::backends::types::{PixelFormat, StreamKind, StreamProfile};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Directory (relative to `$HOME`) holding captures and converted videos
pub const CAPTURE_DIR: &str = "OrbbecCamera/build/projects";

/// File name of the capture written by `record` and read by `play`/`convert`
pub const CAPTURE_FILE_NAME: &str = "record_video.obs";

/// File name of the video written by `convert`
pub const VIDEO_FILE_NAME: &str = "record_video.mp4";

/// Suffix appended to outputs while they are being written
pub const PARTIAL_SUFFIX: &str = "partial";

/// Capacity of the queue between the acquisition thread and the frame handler
pub const FRAME_QUEUE_CAPACITY: usize = 8;

/// Frames a writer pipeline may hold before its appsrc is full
pub const WRITER_QUEUE_FRAMES: u64 = 4;

/// Stream profiles requested when recording from a live device
pub mod record {
    /// Depth stream width
    pub const DEPTH_WIDTH: u32 = 640;
    /// Depth stream height
    pub const DEPTH_HEIGHT: u32 = 400;
    /// Depth stream framerate
    pub const DEPTH_FPS: u32 = 15;

    /// Color stream width
    pub const COLOR_WIDTH: u32 = 640;
    /// Color stream height
    pub const COLOR_HEIGHT: u32 = 480;
    /// Color stream framerate
    pub const COLOR_FPS: u32 = 15;
}

/// Depth (Y16) and color (RGB24) profiles used by `record`
pub fn record_profiles() -> Vec<StreamProfile> {
    vec![
        StreamProfile::new(
            StreamKind::Depth,
            record::DEPTH_WIDTH,
            record::DEPTH_HEIGHT,
            record::DEPTH_FPS,
            PixelFormat::Y16,
        ),
        StreamProfile::new(
            StreamKind::Color,
            record::COLOR_WIDTH,
            record::COLOR_HEIGHT,
            record::COLOR_FPS,
            PixelFormat::Rgb24,
        ),
    ]
}

/// Video written by `convert`
pub mod video_output {
    /// Output width; color frames of any other size are skipped
    pub const WIDTH: u32 = 640;
    /// Output height
    pub const HEIGHT: u32 = 480;
    /// Output framerate
    pub const FPS: u32 = 15;
}

/// Depth visualization
pub mod depth_display {
    /// Depth (mm) mapped to the top of the colormap; 255/10000 per unit
    pub const RANGE_MM: f32 = 10_000.0;
}

/// Timing constants
pub mod timing {
    use super::Duration;

    /// How often the controlling thread checks for a stop request
    pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

    /// Sleep of the delivery loop when the frame queue is empty
    pub const DELIVERY_IDLE_WAIT: Duration = Duration::from_millis(5);

    /// Frame counter modulo for periodic logging
    pub const FRAME_LOG_INTERVAL: u64 = 30;

    /// Time allowed for a capture file to preroll
    pub const PREROLL_TIMEOUT_SECS: u64 = 5;

    /// Window in which errors right after starting a pipeline are reported
    pub const START_ERROR_CHECK_MS: u64 = 500;

    /// Time allowed for a writer pipeline to flush after EOS
    pub const EOS_TIMEOUT_SECS: u64 = 5;
}

/// V4L2 capture constants
pub mod v4l2 {
    /// Number of memory-mapped buffers per stream
    pub const CAPTURE_BUFFERS: u32 = 4;

    /// Device node directory
    pub const DEV_DIR: &str = "/dev";

    /// Failed dequeues in a row after which a node is treated as gone
    pub const MAX_CONSECUTIVE_ERRORS: u32 = 50;

    /// Pause between dequeue retries
    pub const ERROR_RETRY_MS: u64 = 10;
}

/// Video encoder bitrate presets for `convert`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BitratePreset {
    /// 1 Mbps
    Low,
    /// 2 Mbps
    #[default]
    Medium,
    /// 4 Mbps
    High,
}

impl BitratePreset {
    /// All presets, lowest first
    pub const ALL: [BitratePreset; 3] = [
        BitratePreset::Low,
        BitratePreset::Medium,
        BitratePreset::High,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            BitratePreset::Low => "Low",
            BitratePreset::Medium => "Medium",
            BitratePreset::High => "High",
        }
    }

    /// Bitrate in kbps for the 640x480 converted video
    pub fn bitrate_kbps(&self) -> u32 {
        match self {
            BitratePreset::Low => 1_000,
            BitratePreset::Medium => 2_000,
            BitratePreset::High => 4_000,
        }
    }
}

/// Human-readable bitrate, e.g. "2 Mbps" or "2.5 Mbps"
pub fn format_bitrate(kbps: u32) -> String {
    let mbps = kbps as f64 / 1000.0;
    if mbps == mbps.floor() {
        format!("{} Mbps", mbps as u32)
    } else {
        format!("{:.1} Mbps", mbps)
    }
}
