// SPDX-License-Identifier: GPL-3.0-only

//! Session lifecycle controller
//!
//! A session drives one acquisition source from setup to teardown:
//!
//! ```text
//! Idle -[open + configure + start]-> Running -[stop requested]-> StopRequested -[stop]-> Stopped
//! ```
//!
//! Frames are delivered to the handler on a dedicated delivery thread. The
//! controlling thread blocks in [`SessionController::run_until_cancelled`]
//! until the shared [`StopSignal`] is raised (Ctrl+C, end of file, or an
//! explicit [`SessionController::request_stop`]), then calls
//! [`SessionController::stop`] to release the source and finish the sink.
//! A stopped controller cannot be restarted.

mod delivery;
mod signal;

pub use signal::StopSignal;

use crate::backends::types::{
    DeliveryStats, FrameEvent, FrameSender, SourceDescriptor, SourceKind, StreamKind,
    StreamProfile, StreamSelection,
};
use crate::backends::{AcquisitionBackend, AcquisitionSource};
use crate::constants::FRAME_QUEUE_CAPACITY;
use crate::errors::{SessionError, SessionResult};
use crate::sinks::FrameSink;
use delivery::DeliveryLoop;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    StopRequested,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Running => write!(f, "Running"),
            SessionState::StopRequested => write!(f, "StopRequested"),
            SessionState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Summary of a finished session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Events handed to the frame handler
    pub events_delivered: u64,
    /// Events dropped because the queue was full
    pub events_dropped: u64,
    /// File written by the sink, if any
    pub output: Option<PathBuf>,
}

/// Drives a single acquisition session
pub struct SessionController {
    state: SessionState,
    stop_signal: StopSignal,
    source: Option<Box<dyn AcquisitionSource>>,
    active_streams: Vec<StreamProfile>,
    delivery: Option<DeliveryLoop>,
    stats: Arc<DeliveryStats>,
}

impl SessionController {
    /// Create an idle controller observing `stop_signal`
    pub fn new(stop_signal: StopSignal) -> Self {
        Self {
            state: SessionState::Idle,
            stop_signal,
            source: None,
            active_streams: Vec::new(),
            delivery: None,
            stats: Arc::new(DeliveryStats::default()),
        }
    }

    /// Current state; a raised stop signal shows as `StopRequested` while running
    pub fn state(&self) -> SessionState {
        if self.state == SessionState::Running && self.stop_signal.is_stop_requested() {
            SessionState::StopRequested
        } else {
            self.state
        }
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop_signal.clone()
    }

    /// Streams activated by [`configure`](Self::configure)
    pub fn active_streams(&self) -> &[StreamProfile] {
        &self.active_streams
    }

    /// Streams offered by the open source
    pub fn available_streams(&self) -> Vec<StreamProfile> {
        self.source
            .as_ref()
            .map(|source| source.available_streams())
            .unwrap_or_default()
    }

    pub fn source_description(&self) -> Option<String> {
        self.source.as_ref().map(|source| source.description())
    }

    fn invalid_state(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidState {
            operation,
            state: self.state(),
        }
    }

    /// Resolve and open the acquisition source
    ///
    /// `FirstDevice` fails with `NoDeviceFound` when nothing is attached;
    /// a capture file that cannot be opened fails with `SourceUnavailable`.
    pub fn open(
        &mut self,
        backend: &dyn AcquisitionBackend,
        descriptor: &SourceDescriptor,
    ) -> SessionResult<SourceKind> {
        if self.state != SessionState::Idle || self.source.is_some() {
            return Err(self.invalid_state("open"));
        }

        let source = match descriptor {
            SourceDescriptor::FirstDevice => {
                let devices = backend
                    .enumerate_devices()
                    .map_err(|e| SessionError::SourceUnavailable(e.to_string()))?;
                let device = devices.first().ok_or(SessionError::NoDeviceFound)?;
                info!(device = %device.name, bus = %device.bus, "Opening device");
                backend
                    .open_device(device)
                    .map_err(|e| SessionError::SourceUnavailable(e.to_string()))?
            }
            SourceDescriptor::CaptureFile(path) => {
                info!(path = %path.display(), "Opening capture file");
                backend.open_capture(path).map_err(|e| {
                    SessionError::SourceUnavailable(format!("{}: {}", path.display(), e))
                })?
            }
        };

        let kind = source.kind();
        debug!(source = %source.description(), streams = source.available_streams().len(), "Source opened");
        self.source = Some(source);
        Ok(kind)
    }

    /// Validate `selection` against the source and store the resulting streams
    ///
    /// Nothing is stored unless every requested stream is offered.
    pub fn configure(&mut self, selection: &StreamSelection) -> SessionResult<&[StreamProfile]> {
        if self.state != SessionState::Idle {
            return Err(self.invalid_state("configure"));
        }
        let Some(source) = self.source.as_ref() else {
            return Err(self.invalid_state("configure"));
        };

        let available = source.available_streams();
        let resolved = resolve_selection(selection, &available)?;

        for profile in &resolved {
            info!(stream = %profile, "Stream enabled");
        }
        self.active_streams = resolved;
        Ok(&self.active_streams)
    }

    /// Start acquisition, delivering events to `on_frame` with `sink`
    ///
    /// On failure the sink is aborted, the source released and the session
    /// ends in `Stopped`.
    pub fn start<S, F>(&mut self, sink: S, on_frame: F) -> SessionResult<()>
    where
        S: FrameSink,
        F: FnMut(&FrameEvent, &mut S) + Send + 'static,
    {
        if self.state != SessionState::Idle
            || self.source.is_none()
            || self.active_streams.is_empty()
        {
            return Err(self.invalid_state("start"));
        }

        let (tx, rx) = mpsc::channel(FRAME_QUEUE_CAPACITY);
        self.stats = Arc::new(DeliveryStats::default());

        let mut delivery =
            match DeliveryLoop::start("session", rx, sink, on_frame, self.stop_signal.clone()) {
                Ok(delivery) => delivery,
                Err(e) => {
                    self.source = None;
                    self.state = SessionState::Stopped;
                    return Err(SessionError::Backend(format!(
                        "failed to spawn delivery thread: {}",
                        e
                    )));
                }
            };

        let sender = FrameSender::new(tx, Arc::clone(&self.stats), self.stop_signal.clone());
        let Some(source) = self.source.as_mut() else {
            return Err(self.invalid_state("start"));
        };

        if let Err(e) = source.start(&self.active_streams, sender) {
            error!(error = %e, "Failed to start source");
            if let Some(mut outcome) = delivery.stop() {
                outcome.sink.abort();
            }
            if let Some(mut source) = self.source.take() {
                let _ = source.stop();
            }
            self.state = SessionState::Stopped;
            return Err(e.into());
        }

        self.delivery = Some(delivery);
        self.state = SessionState::Running;
        info!(streams = self.active_streams.len(), "Session running");
        Ok(())
    }

    /// Block until a stop is requested, checking every `poll_interval`
    ///
    /// Also returns, with the stop raised, if the frame handler panicked.
    pub fn run_until_cancelled(&mut self, poll_interval: Duration) -> SessionResult<()> {
        match self.state() {
            SessionState::Running | SessionState::StopRequested => {}
            _ => return Err(self.invalid_state("run")),
        }

        while !self.stop_signal.wait_timeout(poll_interval) {
            let delivering = self.delivery.as_ref().is_some_and(|d| d.is_running());
            debug!(
                sent = self.stats.sent(),
                dropped = self.stats.dropped(),
                delivering,
                "Session running"
            );
            // Only a panicked handler ends delivery without raising the stop
            if !delivering && !self.stop_signal.is_stop_requested() {
                warn!("Delivery loop ended without a stop request");
                self.stop_signal.request_stop();
                break;
            }
        }

        info!("Stop requested");
        Ok(())
    }

    /// Raise the stop signal; idempotent and callable from any thread via [`StopSignal`]
    pub fn request_stop(&self) {
        self.stop_signal.request_stop();
    }

    /// Halt delivery, release the source and finish the sink
    ///
    /// Valid once after a successful [`start`](Self::start). Every resource
    /// is released even when an earlier step fails; the first error is
    /// returned.
    pub fn stop(&mut self) -> SessionResult<StopReport> {
        match self.state() {
            SessionState::Running | SessionState::StopRequested => {}
            _ => return Err(self.invalid_state("stop")),
        }

        info!("Stopping session");
        self.stop_signal.request_stop();
        let mut first_error: Option<SessionError> = None;

        let outcome = self.delivery.take().and_then(|mut delivery| delivery.stop());

        if let Some(mut source) = self.source.take()
            && let Err(e) = source.stop()
        {
            warn!(error = %e, "Failed to stop source");
            first_error.get_or_insert(e.into());
        }

        let mut report = StopReport {
            events_delivered: 0,
            events_dropped: self.stats.dropped(),
            output: None,
        };

        match outcome {
            Some(mut outcome) => {
                report.events_delivered = outcome.delivered;
                match outcome.sink.finish() {
                    Ok(output) => report.output = output,
                    Err(e) => {
                        warn!(sink = outcome.sink.name(), error = %e, "Failed to finish sink");
                        outcome.sink.abort();
                        first_error.get_or_insert(e.into());
                    }
                }
            }
            None => {
                first_error.get_or_insert(SessionError::Backend(
                    "frame handler panicked".to_string(),
                ));
            }
        }

        self.state = SessionState::Stopped;
        info!(
            delivered = report.events_delivered,
            dropped = report.events_dropped,
            "Session stopped"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if matches!(
            self.state(),
            SessionState::Running | SessionState::StopRequested
        ) {
            debug!("SessionController dropped while running, stopping");
            if let Err(e) = self.stop() {
                warn!(error = %e, "Failed to stop session on drop");
            }
        }
    }
}

/// Turn a selection into concrete profiles the source offers
///
/// Kinds come out in the order requested; `All` yields one profile per
/// offered kind, in [`StreamKind`] order.
pub fn resolve_selection(
    selection: &StreamSelection,
    available: &[StreamProfile],
) -> SessionResult<Vec<StreamProfile>> {
    let first_of = |kind: StreamKind| available.iter().find(|p| p.kind == kind).copied();

    let resolved = match selection {
        StreamSelection::Explicit(profiles) => {
            let mut resolved: Vec<StreamProfile> = Vec::with_capacity(profiles.len());
            for profile in profiles {
                if resolved.iter().any(|p| p.kind == profile.kind) {
                    return Err(SessionError::UnsupportedStream(format!(
                        "{} requested more than once",
                        profile.kind
                    )));
                }
                if first_of(profile.kind).is_none() {
                    return Err(SessionError::UnsupportedStream(format!(
                        "{} stream not offered by source",
                        profile.kind
                    )));
                }
                if !available.contains(profile) {
                    let offered: Vec<String> = available
                        .iter()
                        .filter(|p| p.kind == profile.kind)
                        .map(|p| p.to_string())
                        .collect();
                    return Err(SessionError::UnsupportedStream(format!(
                        "{} not offered (available: {})",
                        profile,
                        offered.join(", ")
                    )));
                }
                resolved.push(*profile);
            }
            resolved
        }
        StreamSelection::Kinds(kinds) => {
            let mut resolved: Vec<StreamProfile> = Vec::with_capacity(kinds.len());
            for &kind in kinds {
                if resolved.iter().any(|p| p.kind == kind) {
                    continue;
                }
                let profile = first_of(kind).ok_or_else(|| {
                    SessionError::UnsupportedStream(format!("{} stream not offered by source", kind))
                })?;
                resolved.push(profile);
            }
            resolved
        }
        StreamSelection::All => StreamKind::ALL
            .iter()
            .filter_map(|&kind| first_of(kind))
            .collect(),
    };

    if resolved.is_empty() {
        return Err(SessionError::UnsupportedStream(
            "no streams selected".to_string(),
        ));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::types::PixelFormat;

    fn depth() -> StreamProfile {
        StreamProfile::new(StreamKind::Depth, 640, 400, 15, PixelFormat::Y16)
    }

    fn color() -> StreamProfile {
        StreamProfile::new(StreamKind::Color, 640, 480, 15, PixelFormat::Rgb24)
    }

    #[test]
    fn test_resolve_all_one_per_kind() {
        let hd_color = StreamProfile::new(StreamKind::Color, 1280, 720, 30, PixelFormat::Yuyv);
        let available = [color(), hd_color, depth()];
        let resolved = resolve_selection(&StreamSelection::All, &available).unwrap();
        assert_eq!(resolved, vec![depth(), color()]);
    }

    #[test]
    fn test_resolve_explicit_requires_exact_profile() {
        let available = [depth(), color()];
        let mut wrong = color();
        wrong.fps = 30;
        let result = resolve_selection(&StreamSelection::Explicit(vec![depth(), wrong]), &available);
        assert!(matches!(result, Err(SessionError::UnsupportedStream(_))));
    }

    #[test]
    fn test_resolve_explicit_rejects_duplicates() {
        let available = [depth(), color()];
        let result = resolve_selection(&StreamSelection::Explicit(vec![depth(), depth()]), &available);
        assert!(matches!(result, Err(SessionError::UnsupportedStream(_))));
    }

    #[test]
    fn test_resolve_kinds_missing_kind() {
        let available = [color()];
        let result = resolve_selection(&StreamSelection::Kinds(vec![StreamKind::Depth]), &available);
        assert!(matches!(result, Err(SessionError::UnsupportedStream(_))));
    }

    #[test]
    fn test_resolve_empty_source() {
        let result = resolve_selection(&StreamSelection::All, &[]);
        assert!(matches!(result, Err(SessionError::UnsupportedStream(_))));
    }

    #[test]
    fn test_state_reflects_signal() {
        let signal = StopSignal::new();
        let controller = SessionController::new(signal.clone());
        signal.request_stop();
        // Only a running session moves to StopRequested
        assert_eq!(controller.state(), SessionState::Idle);
    }
}
