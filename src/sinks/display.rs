// SPDX-License-Identifier: GPL-3.0-only

//! On-screen display of playback streams
//!
//! One window per stream kind: `appsrc ! videoconvert ! autovideosink`.
//! Depth is shown JET-colored, other streams as recorded.

use super::{FrameSink, SinkError, SinkResult, flow_error, pipeline};
use crate::backends::types::{Frame, FrameEvent, PixelFormat, StreamKind, StreamProfile};
use crate::media::{buffers, depth_viz};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use std::path::PathBuf;
use tracing::{debug, info, warn};

struct Window {
    kind: StreamKind,
    width: u32,
    height: u32,
    appsrc: AppSrc,
    shown: u64,
    mismatched: bool,
}

/// Displays frame events in video windows
pub struct DisplaySink {
    pipeline: gst::Pipeline,
    windows: Vec<Window>,
    closed: bool,
}

impl DisplaySink {
    /// Open one window per profile
    pub fn create(profiles: &[StreamProfile]) -> SinkResult<Self> {
        if profiles.is_empty() {
            return Err(SinkError::Open("no streams to display".into()));
        }
        pipeline::init()?;

        let gst_pipeline = gst::Pipeline::new();
        let mut windows = Vec::with_capacity(profiles.len());

        for profile in profiles {
            let name = profile.kind.name();
            // Depth is colorized before display
            let format = match profile.format {
                PixelFormat::Y16 => PixelFormat::Rgb24,
                other => other,
            };
            let caps = buffers::raw_caps(format, profile.width, profile.height, profile.fps);

            let appsrc = pipeline::make_appsrc(&format!("{}_src", name), &caps, true)?;
            // Shown on arrival
            appsrc.set_do_timestamp(true);
            let convert = pipeline::make("videoconvert", &format!("{}_convert", name))?;
            let sink = pipeline::make("autovideosink", &format!("{}_window", name))?;
            sink.set_property("sync", false);

            gst_pipeline
                .add_many([appsrc.upcast_ref(), &convert, &sink])
                .map_err(|e| SinkError::Open(format!("Failed to add elements: {}", e)))?;
            gst::Element::link_many([appsrc.upcast_ref(), &convert, &sink])
                .map_err(|e| SinkError::Open(format!("Failed to link {} window: {}", name, e)))?;

            debug!(stream = %profile, "Display window added");
            windows.push(Window {
                kind: profile.kind,
                width: profile.width,
                height: profile.height,
                appsrc,
                shown: 0,
                mismatched: false,
            });
        }

        pipeline::start(&gst_pipeline)?;
        info!(windows = windows.len(), "Display started");

        Ok(Self {
            pipeline: gst_pipeline,
            windows,
            closed: false,
        })
    }
}

/// Payload to show for a frame: depth colorized, anything else packed as is
fn display_bytes(frame: &Frame) -> Vec<u8> {
    match frame.depth_values() {
        Some(depth) => depth_viz::depth_to_rgb(&depth),
        None => frame.packed().into_owned(),
    }
}

impl FrameSink for DisplaySink {
    fn name(&self) -> &'static str {
        "display"
    }

    fn write(&mut self, event: &FrameEvent) -> SinkResult<()> {
        for frame in event.frames() {
            let Some(window) = self.windows.iter_mut().find(|w| w.kind == frame.kind) else {
                continue;
            };

            if frame.width != window.width || frame.height != window.height || !frame.is_complete()
            {
                if !window.mismatched {
                    warn!(
                        kind = %frame.kind,
                        width = frame.width,
                        height = frame.height,
                        "Frame size differs from window, skipped"
                    );
                    window.mismatched = true;
                }
                continue;
            }

            let bytes = display_bytes(frame);
            let buffer = buffers::buffer_from_bytes(&bytes, None, None).map_err(SinkError::Write)?;
            window
                .appsrc
                .push_buffer(buffer)
                .map_err(|e| flow_error(frame.kind.name(), e))?;
            window.shown += 1;
        }

        if let Some(message) = pipeline::pending_error(&self.pipeline) {
            return Err(SinkError::Write(message));
        }
        Ok(())
    }

    fn finish(&mut self) -> SinkResult<Option<PathBuf>> {
        if !self.closed {
            self.closed = true;
            for window in &self.windows {
                debug!(kind = %window.kind, frames = window.shown, "Window closed");
            }
            pipeline::shutdown(&self.pipeline);
        }
        Ok(None)
    }

    fn abort(&mut self) {
        if !self.closed {
            self.closed = true;
            pipeline::shutdown(&self.pipeline);
        }
    }
}

impl Drop for DisplaySink {
    fn drop(&mut self) {
        self.abort();
    }
}
