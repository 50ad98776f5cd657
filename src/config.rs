// SPDX-License-Identifier: GPL-3.0-only

//! Resolved paths and timing for a run
//!
//! There is no configuration file: defaults come from fixed constants and
//! `$HOME`, and command line flags override individual fields.

use crate::constants::{self, BitratePreset};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capture written by `record`, read by `play`, `convert` and `info`
    pub capture_path: PathBuf,
    /// Video written by `convert`
    pub video_path: PathBuf,
    /// Bitrate preset for `convert`
    pub bitrate: BitratePreset,
    /// How often the run loop checks for a stop request, in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let dir = default_output_dir();
        Self {
            capture_path: dir.join(constants::CAPTURE_FILE_NAME),
            video_path: dir.join(constants::VIDEO_FILE_NAME),
            bitrate: BitratePreset::default(),
            poll_interval_ms: constants::timing::POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl Config {
    pub fn with_capture_path(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.capture_path = path;
        }
        self
    }

    pub fn with_video_path(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.video_path = path;
        }
        self
    }

    pub fn with_bitrate(mut self, bitrate: Option<BitratePreset>) -> Self {
        if let Some(bitrate) = bitrate {
            self.bitrate = bitrate;
        }
        self
    }

    /// Poll interval, never zero
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// `$HOME/OrbbecCamera/build/projects`, or relative to the working directory without a home
pub fn default_output_dir() -> PathBuf {
    output_dir_in(dirs::home_dir().as_deref())
}

fn output_dir_in(home: Option<&Path>) -> PathBuf {
    match home {
        Some(home) => home.join(constants::CAPTURE_DIR),
        None => PathBuf::from(constants::CAPTURE_DIR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_dir_under_home() {
        assert_eq!(
            output_dir_in(Some(Path::new("/home/user"))),
            PathBuf::from("/home/user/OrbbecCamera/build/projects")
        );
        assert_eq!(
            output_dir_in(None),
            PathBuf::from("OrbbecCamera/build/projects")
        );
    }
}
