// SPDX-License-Identifier: GPL-3.0-only

//! Frame payloads as GStreamer buffers

use crate::backends::types::{Frame, PixelFormat, StreamProfile};
use gstreamer as gst;
use std::time::Duration;

/// Raw video caps for a stream profile
pub fn raw_caps(format: PixelFormat, width: u32, height: u32, fps: u32) -> gst::Caps {
    gst::Caps::builder("video/x-raw")
        .field("format", format.gst_format())
        .field("width", width as i32)
        .field("height", height as i32)
        .field("framerate", gst::Fraction::new(fps.max(1) as i32, 1))
        .build()
}

/// Raw video caps matching `profile`
pub fn profile_caps(profile: &StreamProfile) -> gst::Caps {
    raw_caps(profile.format, profile.width, profile.height, profile.fps)
}

/// Copy `data` into a new buffer, stamped with `pts` and `duration` when given
pub fn buffer_from_bytes(
    data: &[u8],
    pts: Option<Duration>,
    duration: Option<Duration>,
) -> Result<gst::Buffer, String> {
    let mut buffer = gst::Buffer::with_size(data.len())
        .map_err(|e| format!("Failed to create buffer: {}", e))?;
    {
        let buffer_ref = buffer
            .get_mut()
            .ok_or_else(|| "Failed to get mutable buffer reference".to_string())?;
        if let Some(pts) = pts {
            buffer_ref.set_pts(gst::ClockTime::from_nseconds(pts.as_nanos() as u64));
        }
        if let Some(duration) = duration {
            buffer_ref.set_duration(gst::ClockTime::from_nseconds(duration.as_nanos() as u64));
        }
        let mut map = buffer_ref
            .map_writable()
            .map_err(|e| format!("Failed to map buffer: {}", e))?;
        map.copy_from_slice(data);
    }
    Ok(buffer)
}

/// Tightly packed copy of a frame's payload as a buffer
pub fn frame_buffer(
    frame: &Frame,
    pts: Option<Duration>,
    duration: Option<Duration>,
) -> Result<gst::Buffer, String> {
    buffer_from_bytes(&frame.packed(), pts, duration)
}

/// Output timeline anchored at the first capture timestamp it sees
///
/// Shared by every track of a writer so streams stay aligned; timestamps
/// before the anchor clamp to zero.
#[derive(Debug, Default)]
pub struct Timeline {
    origin: Option<Duration>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Presentation time of a frame captured at `timestamp`
    pub fn pts(&mut self, timestamp: Duration) -> Duration {
        let origin = *self.origin.get_or_insert(timestamp);
        timestamp.saturating_sub(origin)
    }
}

/// Nominal duration of one frame at `fps`
pub fn frame_duration(fps: u32) -> Option<Duration> {
    (fps > 0).then(|| Duration::from_nanos(1_000_000_000 / fps as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::backends::types::StreamKind;
    use std::sync::Arc;

    #[test]
    fn test_timeline_aligns_streams_on_first_frame() {
        let mut timeline = Timeline::new();
        // Depth captured first anchors the timeline
        assert_eq!(timeline.pts(Duration::from_millis(500)), Duration::ZERO);
        // Color captured 10ms later, whenever it is written
        assert_eq!(
            timeline.pts(Duration::from_millis(510)),
            Duration::from_millis(10)
        );
        assert_eq!(
            timeline.pts(Duration::from_millis(566)),
            Duration::from_millis(66)
        );
        // Captured before the anchor but written after it
        assert_eq!(timeline.pts(Duration::from_millis(490)), Duration::ZERO);
    }

    #[test]
    fn test_frame_buffer_carries_capture_time() {
        gst::init().unwrap();
        let frame = Frame {
            kind: StreamKind::Depth,
            width: 2,
            height: 1,
            format: PixelFormat::Y16,
            stride: 4,
            data: Arc::from(&[1u8, 0, 2, 0][..]),
            sequence: 3,
            timestamp: Duration::from_millis(200),
        };

        let mut timeline = Timeline::new();
        timeline.pts(Duration::from_millis(150));
        let pts = timeline.pts(frame.timestamp);
        let buffer = frame_buffer(&frame, Some(pts), frame_duration(15)).unwrap();

        assert_eq!(buffer.pts(), Some(gst::ClockTime::from_mseconds(50)));
        assert_eq!(buffer.duration(), Some(gst::ClockTime::from_nseconds(66_666_666)));
        assert_eq!(buffer.size(), 4);
    }

    #[test]
    fn test_frame_duration() {
        assert_eq!(frame_duration(0), None);
        assert_eq!(frame_duration(15), Some(Duration::from_nanos(66_666_666)));
    }
}
