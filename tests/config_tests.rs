// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use depthcap::constants::{self, timing};
use depthcap::{BitratePreset, Config};
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn test_config_default() {
    let config = Config::default();

    assert!(config.capture_path.ends_with(constants::CAPTURE_FILE_NAME));
    assert!(config.video_path.ends_with(constants::VIDEO_FILE_NAME));
    assert_eq!(config.capture_path.parent(), config.video_path.parent());
    assert!(
        config
            .capture_path
            .parent()
            .is_some_and(|dir| dir.ends_with(constants::CAPTURE_DIR))
    );
    assert_eq!(config.bitrate, BitratePreset::Medium);
    assert_eq!(config.poll_interval(), timing::POLL_INTERVAL);
}

#[test]
fn test_config_overrides() {
    let config = Config::default()
        .with_capture_path(Some(PathBuf::from("/tmp/in.obs")))
        .with_video_path(Some(PathBuf::from("/tmp/out.mp4")))
        .with_bitrate(Some(BitratePreset::High));

    assert_eq!(config.capture_path, PathBuf::from("/tmp/in.obs"));
    assert_eq!(config.video_path, PathBuf::from("/tmp/out.mp4"));
    assert_eq!(config.bitrate, BitratePreset::High);
}

#[test]
fn test_config_missing_overrides_keep_defaults() {
    let default = Config::default();
    let config = Config::default()
        .with_capture_path(None)
        .with_video_path(None)
        .with_bitrate(None);
    assert_eq!(config, default);
}

#[test]
fn test_poll_interval_never_zero() {
    let config = Config {
        poll_interval_ms: 0,
        ..Config::default()
    };
    assert_eq!(config.poll_interval(), Duration::from_millis(1));
}

#[test]
fn test_config_serde() {
    let config = Config::default().with_bitrate(Some(BitratePreset::Low));
    let json = serde_json::to_string(&config).expect("serialize");
    assert!(json.contains("\"bitrate\":\"low\""));

    let parsed: Config = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(parsed, config);

    // Missing fields fall back to defaults
    let partial: Config = serde_json::from_str(r#"{"bitrate":"high"}"#).expect("deserialize");
    assert_eq!(partial.bitrate, BitratePreset::High);
    assert_eq!(partial.capture_path, Config::default().capture_path);
}
