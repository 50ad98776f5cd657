// SPDX-License-Identifier: GPL-3.0-only

//! Per-node V4L2 capture

use crate::backends::types::*;
use crate::constants::{self, timing};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::{FourCC, video::capture::Parameters};

/// A node with its format applied, ready to stream
pub(super) struct ConfiguredNode {
    pub path: String,
    pub device: Device,
    pub profile: StreamProfile,
    pub stride: u32,
}

/// Apply `profile` to the node at `path` and verify the driver accepted it
pub(super) fn configure_node(path: &str, profile: &StreamProfile) -> BackendResult<ConfiguredNode> {
    let device = Device::with_path(path)
        .map_err(|e| BackendError::DeviceNotFound(format!("{}: {}", path, e)))?;

    let mut format = device
        .format()
        .map_err(|e| BackendError::InitializationFailed(format!("query format: {}", e)))?;
    let fourccs = profile.format.fourccs();

    let mut applied = None;
    for repr in fourccs {
        format.width = profile.width;
        format.height = profile.height;
        format.fourcc = FourCC::new(repr);
        match device.set_format(&format) {
            Ok(f) if f.fourcc.repr == *repr => {
                applied = Some(f);
                break;
            }
            Ok(f) => debug!(path, wanted = %format.fourcc, got = %f.fourcc, "FourCC not accepted"),
            Err(e) => debug!(path, error = %e, "set_format failed"),
        }
    }

    let applied = applied.ok_or_else(|| {
        BackendError::FormatNotSupported(format!("{} rejected {}", path, profile))
    })?;
    if applied.width != profile.width || applied.height != profile.height {
        return Err(BackendError::FormatNotSupported(format!(
            "{} negotiated {}x{} instead of {}x{}",
            path, applied.width, applied.height, profile.width, profile.height
        )));
    }

    if let Err(e) = device.set_params(&Parameters::with_fps(profile.fps)) {
        warn!(path, fps = profile.fps, error = %e, "Could not set frame rate");
    }

    let row_bytes = profile.width * profile.format.bytes_per_pixel();
    let stride = applied.stride.max(row_bytes);

    info!(
        path,
        width = applied.width,
        height = applied.height,
        fourcc = %applied.fourcc,
        stride,
        "Configured V4L2 node"
    );

    Ok(ConfiguredNode {
        path: path.to_string(),
        device,
        profile: *profile,
        stride,
    })
}

/// Consecutive dequeue failures on one node
#[derive(Debug, Default)]
pub(super) struct ErrorStreak {
    count: u32,
}

impl ErrorStreak {
    /// Count a failure; true once the node should be given up
    pub fn failed(&mut self) -> bool {
        self.count += 1;
        self.count >= constants::v4l2::MAX_CONSECUTIVE_ERRORS
    }

    pub fn succeeded(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Stream buffers from one node until `running` clears or the session goes away
///
/// `ready` receives the outcome of creating the buffer stream before any
/// frame is captured. A node that keeps failing, as an unplugged camera
/// does, ends the session.
pub(super) fn capture_loop(
    node: ConfiguredNode,
    sender: FrameSender,
    running: Arc<AtomicBool>,
    ready: SyncSender<BackendResult<()>>,
) {
    let ConfiguredNode {
        path,
        mut device,
        profile,
        stride,
    } = node;

    let mut stream = match MmapStream::with_buffers(
        &mut device,
        Type::VideoCapture,
        constants::v4l2::CAPTURE_BUFFERS,
    ) {
        Ok(stream) => stream,
        Err(e) => {
            error!(path = %path, error = %e, "Failed to create buffer stream");
            let _ = ready.send(Err(BackendError::InitializationFailed(format!(
                "{}: buffer stream: {}",
                path, e
            ))));
            return;
        }
    };
    let _ = ready.send(Ok(()));
    drop(ready);

    info!(path = %path, kind = %profile.kind, "V4L2 capture stream started");

    let mut errors = ErrorStreak::default();
    let expected = profile.frame_size();
    let mut sequence = 0u64;
    let mut short_frames = 0u64;

    while running.load(Ordering::SeqCst) && !sender.is_closed() {
        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) => {
                if errors.failed() {
                    error!(
                        path = %path,
                        error = %e,
                        failures = errors.count(),
                        "Device stopped delivering frames, ending session"
                    );
                    sender.end_of_stream();
                    break;
                }
                warn!(path = %path, error = %e, "Failed to capture frame");
                std::thread::sleep(Duration::from_millis(constants::v4l2::ERROR_RETRY_MS));
                continue;
            }
        };
        errors.succeeded();

        let used = (meta.bytesused as usize).min(buf.len());
        let payload = if used > 0 { &buf[..used] } else { buf };
        if payload.len() < expected {
            log_periodic_warning(short_frames, "Short V4L2 buffer, frame skipped");
            short_frames += 1;
            continue;
        }

        let frame = Frame {
            kind: profile.kind,
            width: profile.width,
            height: profile.height,
            format: profile.format,
            stride,
            data: Arc::from(payload),
            sequence,
            timestamp: sender.elapsed(),
        };
        sequence += 1;

        if sequence % timing::FRAME_LOG_INTERVAL == 0 {
            debug!(path = %path, sequence, driver_sequence = meta.sequence, "Frame captured");
        }
        sender.send(vec![frame]);
    }

    info!(path = %path, frames = sequence, "V4L2 capture loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_streak_gives_up_after_limit() {
        let mut errors = ErrorStreak::default();
        for _ in 1..constants::v4l2::MAX_CONSECUTIVE_ERRORS {
            assert!(!errors.failed());
        }
        assert!(errors.failed());
        assert_eq!(errors.count(), constants::v4l2::MAX_CONSECUTIVE_ERRORS);
    }

    #[test]
    fn test_error_streak_resets_on_frame() {
        let mut errors = ErrorStreak::default();
        for _ in 1..constants::v4l2::MAX_CONSECUTIVE_ERRORS {
            errors.failed();
        }
        errors.succeeded();
        assert_eq!(errors.count(), 0);
        assert!(!errors.failed());
    }
}
