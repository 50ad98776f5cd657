// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for constants module

use depthcap::backends::types::{PixelFormat, StreamKind};
use depthcap::constants::{self, BitratePreset, format_bitrate, video_output};

#[test]
fn test_bitrate_preset_values() {
    // Test that all presets exist (Low, Medium, High)
    assert_eq!(BitratePreset::ALL.len(), 3);
}

#[test]
fn test_bitrate_preset_ordering() {
    // Presets are ordered from lowest to highest bitrate
    let mut prev_bitrate = 0u32;
    for preset in BitratePreset::ALL {
        let bitrate = preset.bitrate_kbps();
        assert!(
            bitrate > prev_bitrate,
            "Presets should be ordered from lowest to highest"
        );
        prev_bitrate = bitrate;
    }
}

#[test]
fn test_converted_video_bitrates() {
    assert_eq!(BitratePreset::Low.bitrate_kbps(), 1_000);
    assert_eq!(BitratePreset::Medium.bitrate_kbps(), 2_000);
    assert_eq!(BitratePreset::High.bitrate_kbps(), 4_000);
}

#[test]
fn test_bitrate_preset_display_names() {
    for preset in BitratePreset::ALL {
        assert!(!preset.display_name().is_empty());
    }
    assert_eq!(BitratePreset::default(), BitratePreset::Medium);
}

#[test]
fn test_format_bitrate() {
    assert_eq!(format_bitrate(2_000), "2 Mbps");
    assert_eq!(format_bitrate(2_500), "2.5 Mbps");
    assert_eq!(format_bitrate(16_000), "16 Mbps");
}

#[test]
fn test_record_profiles() {
    let profiles = constants::record_profiles();
    assert_eq!(profiles.len(), 2);

    let depth = &profiles[0];
    assert_eq!(depth.kind, StreamKind::Depth);
    assert_eq!((depth.width, depth.height, depth.fps), (640, 400, 15));
    assert_eq!(depth.format, PixelFormat::Y16);

    let color = &profiles[1];
    assert_eq!(color.kind, StreamKind::Color);
    assert_eq!((color.width, color.height, color.fps), (640, 480, 15));
    assert_eq!(color.format, PixelFormat::Rgb24);
}

#[test]
fn test_output_file_names() {
    assert!(constants::CAPTURE_FILE_NAME.ends_with(".obs"));
    assert!(constants::VIDEO_FILE_NAME.ends_with(".mp4"));
    assert_eq!(
        (video_output::WIDTH, video_output::HEIGHT, video_output::FPS),
        (640, 480, 15)
    );
}
