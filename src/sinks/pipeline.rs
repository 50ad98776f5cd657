// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline plumbing shared by the appsrc-fed sinks

use super::{SinkError, SinkResult};
use crate::constants::{WRITER_QUEUE_FRAMES, timing};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, warn};

pub(super) fn init() -> SinkResult<()> {
    gst::init().map_err(|e| SinkError::Open(format!("Failed to initialize GStreamer: {}", e)))
}

pub(super) fn make(factory: &str, name: &str) -> SinkResult<gst::Element> {
    gst::ElementFactory::make(factory)
        .name(name)
        .build()
        .map_err(|e| SinkError::Open(format!("Failed to create {}: {}", factory, e)))
}

/// An appsrc in time format; buffers carry their own timestamps
pub(super) fn make_appsrc(name: &str, caps: &gst::Caps, live: bool) -> SinkResult<AppSrc> {
    let appsrc = make("appsrc", name)?
        .downcast::<AppSrc>()
        .map_err(|_| SinkError::Open("Failed to downcast to AppSrc".into()))?;

    appsrc.set_caps(Some(caps));
    appsrc.set_format(gst::Format::Time);
    appsrc.set_is_live(live);
    appsrc.set_do_timestamp(false);
    Ok(appsrc)
}

/// A non-live appsrc whose `push_buffer` blocks once `max_bytes` are queued
pub(super) fn make_blocking_appsrc(
    name: &str,
    caps: &gst::Caps,
    max_bytes: u64,
) -> SinkResult<AppSrc> {
    let appsrc = make_appsrc(name, caps, false)?;
    appsrc.set_property("block", true);
    appsrc.set_max_bytes(max_bytes);
    Ok(appsrc)
}

/// Bytes a writer appsrc may queue for frames of `frame_size` bytes
pub(super) fn writer_queue_bytes(frame_size: usize) -> u64 {
    frame_size as u64 * WRITER_QUEUE_FRAMES
}

/// Whether an appsrc has reached its queue limit
pub(super) fn queue_full(level_bytes: u64, max_bytes: u64) -> bool {
    max_bytes > 0 && level_bytes >= max_bytes
}

pub(super) fn make_filesink(location: &Path) -> SinkResult<gst::Element> {
    let location = location
        .to_str()
        .ok_or_else(|| SinkError::Open(format!("{} is not valid UTF-8", location.display())))?;
    gst::ElementFactory::make("filesink")
        .name("filesink")
        .property("location", location)
        .build()
        .map_err(|e| SinkError::Open(format!("Failed to create filesink: {}", e)))
}

pub(super) fn link(upstream: &gst::Element, downstream: &gst::Element) -> SinkResult<()> {
    upstream.link(downstream).map_err(|_| {
        SinkError::Open(format!(
            "Failed to link {} to {}",
            upstream.name(),
            downstream.name()
        ))
    })
}

/// Set the pipeline playing and surface errors posted right after
pub(super) fn start(pipeline: &gst::Pipeline) -> SinkResult<()> {
    pipeline
        .set_state(gst::State::Playing)
        .map_err(|e| SinkError::Open(format!("Failed to start pipeline: {}", e)))?;

    let bus = pipeline
        .bus()
        .ok_or_else(|| SinkError::Open("No bus available".into()))?;
    if let Some(msg) = bus.timed_pop_filtered(
        gst::ClockTime::from_mseconds(timing::START_ERROR_CHECK_MS),
        &[gst::MessageType::Error, gst::MessageType::Warning],
    ) {
        match msg.view() {
            gst::MessageView::Error(err) => {
                error!(
                    error = %err.error(),
                    debug = ?err.debug(),
                    source = ?err.src().map(|s| s.name()),
                    "GStreamer error during start"
                );
                let _ = pipeline.set_state(gst::State::Null);
                return Err(SinkError::Open(format!("Pipeline start error: {}", err.error())));
            }
            gst::MessageView::Warning(w) => {
                warn!(
                    warning = %w.error(),
                    debug = ?w.debug(),
                    source = ?w.src().map(|s| s.name()),
                    "GStreamer warning during start"
                );
            }
            _ => {}
        }
    }
    Ok(())
}

/// Error posted on the bus since the last check, if any
pub(super) fn pending_error(pipeline: &gst::Pipeline) -> Option<String> {
    let bus = pipeline.bus()?;
    let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
    match msg.view() {
        gst::MessageView::Error(err) => Some(err.error().to_string()),
        _ => None,
    }
}

/// Send EOS through every appsrc and wait for it to reach the sinks
pub(super) fn drain(pipeline: &gst::Pipeline, appsrcs: &[&AppSrc]) -> SinkResult<()> {
    for appsrc in appsrcs {
        if let Err(e) = appsrc.end_of_stream() {
            warn!(appsrc = %appsrc.name(), ?e, "Failed to send EOS");
        }
    }

    let bus = pipeline
        .bus()
        .ok_or_else(|| SinkError::Finish("No bus available".into()))?;
    let timeout = Duration::from_secs(timing::EOS_TIMEOUT_SECS);
    let msg = bus.timed_pop_filtered(
        gst::ClockTime::from_nseconds(timeout.as_nanos() as u64),
        &[gst::MessageType::Eos, gst::MessageType::Error],
    );

    match msg.as_ref().map(|m| m.view()) {
        Some(gst::MessageView::Eos(_)) => {
            debug!("Pipeline drained");
            Ok(())
        }
        Some(gst::MessageView::Error(err)) => {
            Err(SinkError::Finish(format!("Pipeline error: {}", err.error())))
        }
        _ => Err(SinkError::Finish(format!(
            "Timed out after {}s waiting for end of stream",
            timing::EOS_TIMEOUT_SECS
        ))),
    }
}

/// Set the pipeline to Null, logging failures
pub(super) fn shutdown(pipeline: &gst::Pipeline) {
    if let Err(e) = pipeline.set_state(gst::State::Null) {
        error!(?e, "Failed to set pipeline to Null");
    }
}
