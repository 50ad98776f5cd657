// SPDX-License-Identifier: GPL-3.0-only

//! Playback of recorded capture files
//!
//! A capture is a Matroska file holding one raw video track per stream, as
//! written by [`crate::sinks::CaptureWriter`]. The stream kind of a track
//! follows from its pixel format (GRAY16_LE is depth, GRAY8 infrared, RGB
//! and YUY2 color).
//!
//! Opening builds `filesrc ! matroskademux` and links every demuxed raw video
//! pad to `queue ! appsink`, then prerolls so the negotiated caps give the
//! stream profiles. Starting installs appsink callbacks that forward samples
//! from the GStreamer streaming threads to the session.

use super::types::*;
use super::{AcquisitionSource, Pacing};
use crate::constants::timing;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video::VideoInfo;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// One demuxed raw video track
struct Track {
    appsink: gst_app::AppSink,
    profile: StreamProfile,
    stride: u32,
}

/// An opened capture file
pub struct CaptureFileSource {
    path: PathBuf,
    pipeline: gst::Pipeline,
    tracks: Vec<Track>,
    pacing: Pacing,
    started: bool,
}

impl CaptureFileSource {
    /// Open and preroll `path`
    pub fn open(path: &Path, pacing: Pacing) -> BackendResult<Self> {
        std::fs::File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                BackendError::DeviceNotFound(format!("{} does not exist", path.display()))
            }
            _ => BackendError::IoError(e.to_string()),
        })?;
        let location = path.to_str().ok_or_else(|| {
            BackendError::InitializationFailed(format!("{} is not valid UTF-8", path.display()))
        })?;

        gst::init().map_err(|e| {
            BackendError::InitializationFailed(format!("GStreamer init failed: {}", e))
        })?;

        info!(path = %path.display(), ?pacing, "Opening capture file");

        let pipeline = gst::Pipeline::new();
        let filesrc = gst::ElementFactory::make("filesrc")
            .property("location", location)
            .build()
            .map_err(|e| BackendError::NotAvailable(format!("filesrc: {}", e)))?;
        let demux = gst::ElementFactory::make("matroskademux")
            .build()
            .map_err(|e| BackendError::NotAvailable(format!("matroskademux: {}", e)))?;

        pipeline
            .add_many([&filesrc, &demux])
            .map_err(|e| BackendError::InitializationFailed(format!("add elements: {}", e)))?;
        filesrc
            .link(&demux)
            .map_err(|_| BackendError::InitializationFailed("link filesrc to demuxer".into()))?;

        let appsinks: Arc<Mutex<Vec<gst_app::AppSink>>> = Arc::new(Mutex::new(Vec::new()));
        let no_more_pads = Arc::new(AtomicBool::new(false));

        let pipeline_weak = pipeline.downgrade();
        let sinks_clone = Arc::clone(&appsinks);
        let realtime = pacing == Pacing::Realtime;
        demux.connect_pad_added(move |_, pad| {
            let Some(pipeline) = pipeline_weak.upgrade() else {
                return;
            };
            if let Err(e) = link_demuxed_pad(&pipeline, pad, &sinks_clone, realtime) {
                warn!(pad = %pad.name(), error = %e, "Failed to link demuxed pad");
            }
        });

        let pads_done = Arc::clone(&no_more_pads);
        demux.connect_no_more_pads(move |_| {
            pads_done.store(true, Ordering::SeqCst);
        });

        if let Err(e) = pipeline.set_state(gst::State::Paused) {
            let message = bus_error(&pipeline).unwrap_or_else(|| format!("{:?}", e));
            let _ = pipeline.set_state(gst::State::Null);
            return Err(BackendError::FormatNotSupported(format!(
                "{}: {}",
                path.display(),
                message
            )));
        }

        let tracks = match wait_for_tracks(&pipeline, &appsinks, &no_more_pads) {
            Ok(tracks) => tracks,
            Err(e) => {
                let _ = pipeline.set_state(gst::State::Null);
                return Err(e);
            }
        };

        for track in &tracks {
            info!(stream = %track.profile, "Capture track");
        }

        Ok(Self {
            path: path.to_path_buf(),
            pipeline,
            tracks,
            pacing,
            started: false,
        })
    }
}

/// Link a new demuxer pad: raw video to `queue ! appsink`, anything else to `fakesink`
fn link_demuxed_pad(
    pipeline: &gst::Pipeline,
    pad: &gst::Pad,
    appsinks: &Mutex<Vec<gst_app::AppSink>>,
    realtime: bool,
) -> Result<(), String> {
    let caps = pad
        .current_caps()
        .unwrap_or_else(|| pad.query_caps(None));
    let is_raw_video = caps
        .structure(0)
        .map(|s| s.name().as_str() == "video/x-raw")
        .unwrap_or(false);

    let queue = gst::ElementFactory::make("queue")
        .build()
        .map_err(|e| format!("queue: {}", e))?;

    let sink: gst::Element = if is_raw_video {
        let appsink = gst_app::AppSink::builder()
            .sync(realtime)
            .max_buffers(1)
            .drop(true)
            .build();
        appsink.upcast()
    } else {
        debug!(pad = %pad.name(), caps = %caps, "Discarding non-video track");
        gst::ElementFactory::make("fakesink")
            .property("sync", false)
            .build()
            .map_err(|e| format!("fakesink: {}", e))?
    };

    pipeline
        .add_many([&queue, &sink])
        .map_err(|e| format!("add elements: {}", e))?;
    queue
        .link(&sink)
        .map_err(|_| "link queue to sink".to_string())?;
    let queue_pad = queue
        .static_pad("sink")
        .ok_or_else(|| "queue has no sink pad".to_string())?;
    pad.link(&queue_pad)
        .map_err(|e| format!("link pad: {:?}", e))?;

    queue
        .sync_state_with_parent()
        .map_err(|e| format!("sync queue state: {}", e))?;
    sink.sync_state_with_parent()
        .map_err(|e| format!("sync sink state: {}", e))?;

    if let Ok(appsink) = sink.downcast::<gst_app::AppSink>()
        && let Ok(mut sinks) = appsinks.lock()
    {
        sinks.push(appsink);
    }
    Ok(())
}

/// Wait until all pads are linked and every appsink has negotiated caps
fn wait_for_tracks(
    pipeline: &gst::Pipeline,
    appsinks: &Mutex<Vec<gst_app::AppSink>>,
    no_more_pads: &AtomicBool,
) -> BackendResult<Vec<Track>> {
    let bus = pipeline
        .bus()
        .ok_or_else(|| BackendError::Other("No bus on pipeline".into()))?;
    let deadline = Instant::now() + Duration::from_secs(timing::PREROLL_TIMEOUT_SECS);

    while Instant::now() < deadline {
        if let Some(msg) = bus.timed_pop(gst::ClockTime::from_mseconds(100)) {
            if let gst::MessageView::Error(err) = msg.view() {
                return Err(BackendError::FormatNotSupported(format!(
                    "Pipeline error: {}",
                    err.error()
                )));
            }
        }

        if !no_more_pads.load(Ordering::SeqCst) {
            continue;
        }
        let sinks = appsinks
            .lock()
            .map_err(|_| BackendError::Other("appsink list poisoned".into()))?;
        if sinks.is_empty() {
            return Err(BackendError::FormatNotSupported(
                "capture holds no raw video tracks".into(),
            ));
        }

        let statuses = sinks.iter().map(track_status).collect();
        if let Some(tracks) = settle_tracks(statuses) {
            return tracks;
        }
    }

    Err(BackendError::InitializationFailed(
        "Timed out waiting for capture to preroll".into(),
    ))
}

/// Negotiation state of one demuxed raw video track
enum TrackStatus<T> {
    /// Caps not negotiated yet
    Pending,
    /// Raw video in a format no stream kind maps to
    Unsupported(String),
    Ready(T),
}

/// The usable tracks once every appsink has settled; `None` while any is pending
fn settle_tracks<T>(statuses: Vec<TrackStatus<T>>) -> Option<BackendResult<Vec<T>>> {
    let mut ready = Vec::with_capacity(statuses.len());
    let mut skipped = Vec::new();
    for status in statuses {
        match status {
            TrackStatus::Pending => return None,
            TrackStatus::Unsupported(format) => skipped.push(format),
            TrackStatus::Ready(track) => ready.push(track),
        }
    }

    for format in &skipped {
        warn!(format = %format, "Skipping track in unsupported format");
    }
    if ready.is_empty() {
        return Some(Err(BackendError::FormatNotSupported(format!(
            "capture has no track in a supported format (found {})",
            skipped.join(", ")
        ))));
    }
    Some(Ok(ready))
}

/// Build a track once the appsink's caps are known
fn track_status(appsink: &gst_app::AppSink) -> TrackStatus<Track> {
    let Some(caps) = appsink.static_pad("sink").and_then(|pad| pad.current_caps()) else {
        return TrackStatus::Pending;
    };
    let info = match VideoInfo::from_caps(&caps) {
        Ok(info) => info,
        Err(_) => return TrackStatus::Unsupported(caps.to_string()),
    };

    let Some(format) = PixelFormat::from_gst_format(info.format().to_str().as_str()) else {
        return TrackStatus::Unsupported(info.format().to_str().to_string());
    };
    let fps = info.fps();
    let fps = if fps.numer() > 0 && fps.denom() > 0 {
        (fps.numer() / fps.denom()) as u32
    } else {
        0
    };

    TrackStatus::Ready(Track {
        appsink: appsink.clone(),
        profile: StreamProfile::new(
            format.stream_kind(),
            info.width(),
            info.height(),
            fps,
            format,
        ),
        stride: info.stride()[0] as u32,
    })
}

/// Error message pending on the bus, if any
fn bus_error(pipeline: &gst::Pipeline) -> Option<String> {
    let bus = pipeline.bus()?;
    let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
    match msg.view() {
        gst::MessageView::Error(err) => Some(err.error().to_string()),
        _ => None,
    }
}

/// Copy a sample into a [`Frame`]
fn sample_to_frame(
    sample: &gst::Sample,
    track: &StreamProfile,
    stride: u32,
    sequence: u64,
) -> Option<Frame> {
    let buffer = sample.buffer()?;
    let timestamp = buffer
        .pts()
        .map(|pts| Duration::from_nanos(pts.nseconds()))
        .unwrap_or_default();
    let map = buffer.map_readable().ok()?;

    Some(Frame {
        kind: track.kind,
        width: track.width,
        height: track.height,
        format: track.format,
        stride,
        data: Arc::from(map.as_slice()),
        sequence,
        timestamp,
    })
}

impl AcquisitionSource for CaptureFileSource {
    fn kind(&self) -> SourceKind {
        SourceKind::CaptureFile
    }

    fn description(&self) -> String {
        self.path.display().to_string()
    }

    fn available_streams(&self) -> Vec<StreamProfile> {
        self.tracks.iter().map(|t| t.profile).collect()
    }

    fn start(&mut self, profiles: &[StreamProfile], sender: FrameSender) -> BackendResult<()> {
        if self.started {
            return Err(BackendError::InvalidState("capture already started".into()));
        }

        let selected: Vec<&Track> = self
            .tracks
            .iter()
            .filter(|t| profiles.contains(&t.profile))
            .collect();
        if selected.is_empty() {
            return Err(BackendError::FormatNotSupported(
                "none of the requested streams are in the capture".into(),
            ));
        }

        let remaining = Arc::new(AtomicUsize::new(selected.len()));
        let blocking = self.pacing == Pacing::AsFastAsPossible;

        for track in &selected {
            let profile = track.profile;
            let stride = track.stride;
            let sample_sender = sender.clone();
            let eos_sender = sender.clone();
            let eos_remaining = Arc::clone(&remaining);
            let mut sequence = 0u64;

            // Backpressure instead of dropping when not pacing in realtime
            track.appsink.set_drop(!blocking);

            track.appsink.set_callbacks(
                gst_app::AppSinkCallbacks::builder()
                    .new_sample(move |appsink| {
                        let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                        let Some(frame) = sample_to_frame(&sample, &profile, stride, sequence)
                        else {
                            log_periodic_warning(sequence, "Unreadable sample skipped");
                            return Ok(gst::FlowSuccess::Ok);
                        };
                        sequence += 1;

                        if blocking {
                            if !sample_sender.send_blocking(vec![frame]) {
                                return Err(gst::FlowError::Flushing);
                            }
                        } else if sample_sender.is_closed() {
                            return Err(gst::FlowError::Flushing);
                        } else {
                            sample_sender.send(vec![frame]);
                        }
                        Ok(gst::FlowSuccess::Ok)
                    })
                    .eos(move |_| {
                        debug!(kind = %profile.kind, "Track reached end of stream");
                        if eos_remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                            eos_sender.end_of_stream();
                        }
                    })
                    .build(),
            );
        }

        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| BackendError::InitializationFailed(format!("start playback: {}", e)))?;

        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| BackendError::Other("No bus on pipeline".into()))?;
        if let Some(msg) = bus.timed_pop_filtered(
            gst::ClockTime::from_mseconds(timing::START_ERROR_CHECK_MS),
            &[gst::MessageType::Error],
        ) && let gst::MessageView::Error(err) = msg.view()
        {
            error!(
                error = %err.error(),
                debug = ?err.debug(),
                source = ?err.src().map(|s| s.name()),
                "GStreamer error during start"
            );
            let _ = self.pipeline.set_state(gst::State::Null);
            return Err(BackendError::InitializationFailed(format!(
                "Playback start error: {}",
                err.error()
            )));
        }

        // Errors past this point end the session like end of file
        let error_sender = sender;
        bus.set_sync_handler(move |_, msg| {
            if let gst::MessageView::Error(err) = msg.view() {
                error!(
                    error = %err.error(),
                    source = ?err.src().map(|s| s.name()),
                    "Playback error"
                );
                error_sender.end_of_stream();
            }
            gst::BusSyncReply::Drop
        });

        self.started = true;
        info!(path = %self.path.display(), streams = selected.len(), "Capture playback started");
        Ok(())
    }

    fn stop(&mut self) -> BackendResult<()> {
        info!(path = %self.path.display(), "Stopping capture playback");
        if let Some(bus) = self.pipeline.bus() {
            bus.unset_sync_handler();
        }
        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| BackendError::Other(format!("Failed to stop pipeline: {}", e)))?;
        self.started = false;
        Ok(())
    }
}

impl Drop for CaptureFileSource {
    fn drop(&mut self) {
        if let Some(bus) = self.pipeline.bus() {
            bus.unset_sync_handler();
        }
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settle_waits_for_pending_tracks() {
        let statuses = vec![TrackStatus::Ready(1u32), TrackStatus::Pending];
        assert!(settle_tracks(statuses).is_none());
    }

    #[test]
    fn test_settle_skips_unsupported_tracks() {
        let statuses = vec![
            TrackStatus::Unsupported("I420".to_string()),
            TrackStatus::Ready(1u32),
            TrackStatus::Ready(2u32),
        ];
        let tracks = settle_tracks(statuses).unwrap().unwrap();
        assert_eq!(tracks, vec![1, 2]);
    }

    #[test]
    fn test_settle_fails_without_usable_tracks() {
        let statuses: Vec<TrackStatus<u32>> = vec![
            TrackStatus::Unsupported("I420".to_string()),
            TrackStatus::Unsupported("NV12".to_string()),
        ];
        let err = settle_tracks(statuses).unwrap().unwrap_err();
        assert!(matches!(
            err,
            BackendError::FormatNotSupported(msg) if msg.contains("I420, NV12")
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_path_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(OsStr::from_bytes(b"capture\xff.obs"));
        std::fs::write(&path, b"").unwrap();

        let err = CaptureFileSource::open(&path, Pacing::Realtime).err().unwrap();
        assert!(matches!(
            err,
            BackendError::InitializationFailed(msg) if msg.contains("UTF-8")
        ));
    }
}
