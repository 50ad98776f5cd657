// SPDX-License-Identifier: GPL-3.0-only

//! Color stream to H.264 MP4
//!
//! ```text
//! appsrc ─ videoconvert ─ encoder ─ h264parse ─ mp4mux ─ filesink (<path>.partial)
//! ```
//!
//! The output has a fixed size and frame rate; color frames of any other
//! size are skipped. Timestamps come from the frame count so the output
//! plays at the nominal rate however fast frames arrive.

use super::encoder_selection::select_h264_encoder;
use super::{FrameSink, SinkError, SinkResult, flow_error, pipeline};
use crate::backends::types::{FrameEvent, PixelFormat, StreamKind, log_periodic_warning};
use crate::constants::{BitratePreset, format_bitrate, video_output};
use crate::media::buffers;
use crate::storage;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Encodes color frames into an MP4 file
pub struct VideoFileSink {
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
    format: PixelFormat,
    frame_duration: Option<Duration>,
    written: u64,
    skipped: u64,
    partial: PathBuf,
    path: PathBuf,
    done: bool,
}

impl VideoFileSink {
    /// Build and start the encoder for color frames in `format`
    pub fn create(path: &Path, format: PixelFormat, bitrate: BitratePreset) -> SinkResult<Self> {
        pipeline::init()?;

        let (width, height, fps) = (video_output::WIDTH, video_output::HEIGHT, video_output::FPS);
        let bitrate_kbps = bitrate.bitrate_kbps();
        let encoder = select_h264_encoder(bitrate_kbps).map_err(SinkError::Open)?;

        let partial = storage::prepare_output(path)
            .map_err(|e| SinkError::Open(format!("{}: {}", path.display(), e)))?;

        info!(
            path = %path.display(),
            width,
            height,
            fps,
            encoder = encoder.element_name,
            hardware = encoder.is_hardware,
            bitrate = %format_bitrate(bitrate_kbps),
            preset = bitrate.display_name(),
            "Creating video file sink"
        );

        let gst_pipeline = gst::Pipeline::new();
        let caps = buffers::raw_caps(format, width, height, fps);
        let frame_size = (width * height * format.bytes_per_pixel()) as usize;
        // Backpressure reaches the delivery thread instead of queueing the capture
        let appsrc = pipeline::make_blocking_appsrc(
            "color_src",
            &caps,
            pipeline::writer_queue_bytes(frame_size),
        )?;
        let convert = pipeline::make("videoconvert", "convert")?;
        let mux = pipeline::make("mp4mux", "mux")?;
        let filesink = pipeline::make_filesink(&partial)?;

        let mut chain: Vec<&gst::Element> = vec![appsrc.upcast_ref(), &convert, &encoder.encoder];
        if let Some(parser) = encoder.parser.as_ref() {
            chain.push(parser);
        }
        chain.push(&mux);
        chain.push(&filesink);

        let built = gst_pipeline
            .add_many(&chain)
            .map_err(|e| SinkError::Open(format!("Failed to add elements: {}", e)))
            .and_then(|_| {
                gst::Element::link_many(&chain)
                    .map_err(|e| SinkError::Open(format!("Failed to link encoder chain: {}", e)))
            })
            .and_then(|_| pipeline::start(&gst_pipeline));
        if let Err(e) = built {
            pipeline::shutdown(&gst_pipeline);
            storage::discard(&partial);
            return Err(e);
        }

        Ok(Self {
            pipeline: gst_pipeline,
            appsrc,
            format,
            frame_duration: buffers::frame_duration(fps),
            written: 0,
            skipped: 0,
            partial,
            path: path.to_path_buf(),
            done: false,
        })
    }
}

impl FrameSink for VideoFileSink {
    fn name(&self) -> &'static str {
        "video-file"
    }

    fn write(&mut self, event: &FrameEvent) -> SinkResult<()> {
        let Some(frame) = event.frame(StreamKind::Color) else {
            return Ok(());
        };

        if frame.width != video_output::WIDTH
            || frame.height != video_output::HEIGHT
            || frame.format != self.format
            || !frame.is_complete()
        {
            log_periodic_warning(self.skipped, "Color frame size differs from output, skipped");
            debug!(width = frame.width, height = frame.height, format = %frame.format, "Skipped frame");
            self.skipped += 1;
            return Ok(());
        }

        let pts = self
            .frame_duration
            .map(|d| d * self.written as u32)
            .unwrap_or_default();
        let buffer =
            buffers::frame_buffer(frame, Some(pts), self.frame_duration).map_err(SinkError::Write)?;
        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| flow_error("color", e))?;
        self.written += 1;

        if let Some(message) = pipeline::pending_error(&self.pipeline) {
            return Err(SinkError::Write(message));
        }
        Ok(())
    }

    fn finish(&mut self) -> SinkResult<Option<PathBuf>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        info!(frames = self.written, skipped = self.skipped, "Finalizing video");
        let drained = pipeline::drain(&self.pipeline, &[&self.appsrc]);
        pipeline::shutdown(&self.pipeline);

        if let Err(e) = drained {
            storage::discard(&self.partial);
            return Err(e);
        }
        let path = storage::finalize(&self.partial, &self.path)?;
        Ok(Some(path))
    }

    fn abort(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        pipeline::shutdown(&self.pipeline);
        storage::discard(&self.partial);
    }
}

impl Drop for VideoFileSink {
    fn drop(&mut self) {
        if !self.done {
            debug!("VideoFileSink dropped without finishing");
            self.abort();
        }
    }
}
