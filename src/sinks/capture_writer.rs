// SPDX-License-Identifier: GPL-3.0-only

//! Capture file writer
//!
//! Records every stream of a session into one Matroska file:
//!
//! ```text
//! appsrc (depth) ─ queue ─┐
//!                         ├─ matroskamux ─ filesink (<path>.partial)
//! appsrc (color) ─ queue ─┘
//! ```
//!
//! Tracks hold raw video, so a capture replays bit-exact depth values.
//! Every track is stamped on one timeline starting at the first frame
//! written. A track whose queue is full drops frames rather than stall
//! the delivery thread.

use super::{FrameSink, SinkError, SinkResult, flow_error, pipeline};
use crate::backends::types::{FrameEvent, StreamProfile, log_periodic_warning};
use crate::media::buffers;
use crate::storage;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

struct Track {
    profile: StreamProfile,
    appsrc: AppSrc,
    written: u64,
    rejected: u64,
    overflowed: u64,
}

/// Writes frame events to a Matroska capture
pub struct CaptureWriter {
    pipeline: gst::Pipeline,
    tracks: Vec<Track>,
    timeline: buffers::Timeline,
    partial: PathBuf,
    path: PathBuf,
    done: bool,
}

impl CaptureWriter {
    /// Build and start the writer for `profiles`, writing to `path` once finished
    pub fn create(path: &Path, profiles: &[StreamProfile]) -> SinkResult<Self> {
        if profiles.is_empty() {
            return Err(SinkError::Open("no streams to record".into()));
        }
        pipeline::init()?;

        let partial = storage::prepare_output(path)
            .map_err(|e| SinkError::Open(format!("{}: {}", path.display(), e)))?;

        info!(
            path = %path.display(),
            streams = profiles.len(),
            "Creating capture writer"
        );

        let gst_pipeline = gst::Pipeline::new();
        let mux = pipeline::make("matroskamux", "mux")?;
        if mux.has_property("streamable") {
            mux.set_property("streamable", false);
        }
        let filesink = pipeline::make_filesink(&partial)?;
        gst_pipeline
            .add_many([&mux, &filesink])
            .map_err(|e| SinkError::Open(format!("Failed to add elements: {}", e)))?;
        pipeline::link(&mux, &filesink)?;

        let mut tracks = Vec::with_capacity(profiles.len());
        for profile in profiles {
            let kind = profile.kind.name();
            let appsrc =
                pipeline::make_appsrc(&format!("{}_src", kind), &buffers::profile_caps(profile), true)?;
            appsrc.set_max_bytes(pipeline::writer_queue_bytes(profile.frame_size()));
            let queue = pipeline::make("queue", &format!("{}_queue", kind))?;

            gst_pipeline
                .add_many([appsrc.upcast_ref(), &queue])
                .map_err(|e| SinkError::Open(format!("Failed to add elements: {}", e)))?;
            pipeline::link(appsrc.upcast_ref(), &queue)?;
            pipeline::link(&queue, &mux)?;

            debug!(stream = %profile, "Capture track added");
            tracks.push(Track {
                profile: *profile,
                appsrc,
                written: 0,
                rejected: 0,
                overflowed: 0,
            });
        }

        if let Err(e) = pipeline::start(&gst_pipeline) {
            storage::discard(&partial);
            return Err(e);
        }

        Ok(Self {
            pipeline: gst_pipeline,
            tracks,
            timeline: buffers::Timeline::new(),
            partial,
            path: path.to_path_buf(),
            done: false,
        })
    }
}

impl FrameSink for CaptureWriter {
    fn name(&self) -> &'static str {
        "capture-writer"
    }

    fn write(&mut self, event: &FrameEvent) -> SinkResult<()> {
        for frame in event.frames() {
            let Some(track) = self.tracks.iter_mut().find(|t| t.profile.kind == frame.kind) else {
                continue;
            };

            let profile = &track.profile;
            if frame.width != profile.width
                || frame.height != profile.height
                || frame.format != profile.format
                || !frame.is_complete()
            {
                if track.rejected == 0 {
                    warn!(
                        kind = %frame.kind,
                        width = frame.width,
                        height = frame.height,
                        expected = %profile,
                        "Frame does not match recorded stream, skipped"
                    );
                }
                track.rejected += 1;
                continue;
            }

            if pipeline::queue_full(track.appsrc.current_level_bytes(), track.appsrc.max_bytes()) {
                log_periodic_warning(track.overflowed, "Capture writer queue full, frame dropped");
                track.overflowed += 1;
                continue;
            }

            let pts = self.timeline.pts(frame.timestamp);
            let buffer = buffers::frame_buffer(frame, Some(pts), buffers::frame_duration(profile.fps))
                .map_err(SinkError::Write)?;
            track
                .appsrc
                .push_buffer(buffer)
                .map_err(|e| flow_error(frame.kind.name(), e))?;
            track.written += 1;
        }

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

        info!(path = %self.path.display(), "Finalizing capture");
        let appsrcs: Vec<&AppSrc> = self.tracks.iter().map(|t| &t.appsrc).collect();
        let drained = pipeline::drain(&self.pipeline, &appsrcs);
        pipeline::shutdown(&self.pipeline);

        if let Err(e) = drained {
            storage::discard(&self.partial);
            return Err(e);
        }

        for track in &self.tracks {
            info!(
                kind = %track.profile.kind,
                frames = track.written,
                skipped = track.rejected,
                dropped = track.overflowed,
                "Track recorded"
            );
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

impl Drop for CaptureWriter {
    fn drop(&mut self) {
        if !self.done {
            debug!("CaptureWriter dropped without finishing");
            self.abort();
        }
    }
}
