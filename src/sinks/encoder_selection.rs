// SPDX-License-Identifier: GPL-3.0-only

//! H.264 encoder selection with hardware acceleration priority

use gstreamer as gst;
use gstreamer::prelude::*;
use tracing::{debug, info};

/// Candidate H.264 encoders, best first: (element, display name, hardware)
pub const H264_ENCODERS: [(&str, &str, bool); 6] = [
    ("vah264enc", "VA-API H.264 (HW)", true),
    ("vaapih264enc", "VA-API H.264 (HW, legacy)", true),
    ("nvh264enc", "NVIDIA H.264 (HW)", true),
    ("v4l2h264enc", "V4L2 H.264 (HW)", true),
    ("x264enc", "x264 H.264 (SW)", false),
    ("openh264enc", "OpenH264 H.264 (SW)", false),
];

/// Parser placed between encoder and muxer
pub const H264_PARSER: &str = "h264parse";

/// An encoder element ready to link
pub struct SelectedEncoder {
    pub encoder: gst::Element,
    /// `None` when h264parse is not installed
    pub parser: Option<gst::Element>,
    pub element_name: &'static str,
    pub is_hardware: bool,
}

/// Names of the H.264 encoders installed on this system, best first
pub fn available_encoders() -> Vec<&'static str> {
    if gst::init().is_err() {
        return Vec::new();
    }
    H264_ENCODERS
        .iter()
        .filter(|(name, _, _)| gst::ElementFactory::find(name).is_some())
        .map(|(name, _, _)| *name)
        .collect()
}

/// Create the best available H.264 encoder configured for `bitrate_kbps`
pub fn select_h264_encoder(bitrate_kbps: u32) -> Result<SelectedEncoder, String> {
    gst::init().map_err(|e| format!("Failed to initialize GStreamer: {}", e))?;

    for (element_name, display_name, is_hardware) in H264_ENCODERS {
        let Ok(encoder) = gst::ElementFactory::make(element_name).build() else {
            continue;
        };
        info!(
            encoder = element_name,
            name = display_name,
            hardware = is_hardware,
            bitrate_kbps,
            "Selected video encoder"
        );
        configure_encoder(&encoder, element_name, bitrate_kbps);

        let parser = match gst::ElementFactory::make(H264_PARSER).build() {
            Ok(parser) => Some(parser),
            Err(e) => {
                debug!("Failed to create parser {}: {}", H264_PARSER, e);
                None
            }
        };

        return Ok(SelectedEncoder {
            encoder,
            parser,
            element_name,
            is_hardware,
        });
    }

    Err("No H.264 encoder available. Please install gstreamer1-plugins-ugly (x264enc) or gstreamer1-plugin-openh264".to_string())
}

/// Apply bitrate and low-latency settings per encoder family
fn configure_encoder(encoder: &gst::Element, element_name: &str, bitrate_kbps: u32) {
    match element_name {
        "x264enc" => {
            encoder.set_property_from_str("speed-preset", "veryfast");
            encoder.set_property_from_str("tune", "zerolatency");
            encoder.set_property("bitrate", bitrate_kbps);
        }
        "vaapih264enc" => {
            encoder.set_property_from_str("rate-control", "cbr");
            encoder.set_property("bitrate", bitrate_kbps);
        }
        "vah264enc" => {
            encoder.set_property_from_str("rate-control", "cbr");
            encoder.set_property("bitrate", bitrate_kbps);
        }
        "nvh264enc" => {
            encoder.set_property("bitrate", bitrate_kbps);
            encoder.set_property_from_str("rc-mode", "vbr");
        }
        "openh264enc" => {
            encoder.set_property_from_str("rate-control", "bitrate");
            // Bits per second
            encoder.set_property("bitrate", bitrate_kbps * 1000);
            encoder.set_property_from_str("usage-type", "camera");
        }
        // V4L2 encoders expose few controls
        _ => {}
    }
    debug!(encoder = element_name, bitrate_kbps, "Configured encoder");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardware_encoders_first() {
        let first_software = H264_ENCODERS
            .iter()
            .position(|(_, _, hw)| !hw)
            .unwrap();
        assert!(H264_ENCODERS[first_software..].iter().all(|(_, _, hw)| !hw));
    }

    #[test]
    fn test_software_fallbacks_present() {
        let names: Vec<_> = H264_ENCODERS.iter().map(|(n, _, _)| *n).collect();
        assert!(names.contains(&"x264enc"));
        assert_eq!(names.last(), Some(&"openh264enc"));
    }
}
