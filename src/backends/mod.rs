// SPDX-License-Identifier: GPL-3.0-only

//! Acquisition backends for live devices and recorded captures
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             SessionController                │
//! └────────────────────┬────────────────────────┘
//!                      │ AcquisitionBackend / AcquisitionSource
//! ┌────────────────────┴────────────────────────┐
//! │  ┌─────────────┐    ┌──────────────────┐   │
//! │  │    V4L2     │    │   Capture file   │   │
//! │  │ (live, UVC) │    │ (GStreamer MKV)  │   │
//! │  └─────────────┘    └──────────────────┘   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`v4l2`]: live depth devices exposing depth and color nodes
//! - [`capture_file`]: playback of captures written by `record`
//! - [`types`]: profiles, frames, events and the frame sender

pub mod capture_file;
pub mod types;
pub mod v4l2;

pub use types::*;

use std::path::Path;

/// Entry point to a family of acquisition sources
pub trait AcquisitionBackend {
    /// Depth devices currently attached, in a stable order
    fn enumerate_devices(&self) -> BackendResult<Vec<DeviceInfo>>;

    /// Open a live device returned by [`enumerate_devices`](Self::enumerate_devices)
    fn open_device(&self, device: &DeviceInfo) -> BackendResult<Box<dyn AcquisitionSource>>;

    /// Open a recorded capture file
    fn open_capture(&self, path: &Path) -> BackendResult<Box<dyn AcquisitionSource>>;
}

/// An opened device or capture file
///
/// A source produces frames on its own threads once started and pushes them
/// through the [`FrameSender`] it was given. It must stop producing and
/// release the underlying handle in [`stop`](Self::stop).
pub trait AcquisitionSource: Send {
    fn kind(&self) -> SourceKind;

    /// Human-readable name (device card or file path)
    fn description(&self) -> String;

    /// Profiles the source can deliver, preferred first within each kind
    fn available_streams(&self) -> Vec<StreamProfile>;

    /// Begin producing frames for `profiles`
    fn start(&mut self, profiles: &[StreamProfile], sender: FrameSender) -> BackendResult<()>;

    /// Stop producing frames and release the source
    fn stop(&mut self) -> BackendResult<()>;
}

/// How a capture file is replayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pacing {
    /// At the recorded frame rate, dropping frames the handler cannot keep up with
    #[default]
    Realtime,
    /// As fast as the handler consumes frames, without dropping any
    AsFastAsPossible,
}

/// V4L2 devices and GStreamer capture files
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBackend {
    pacing: Pacing,
}

impl SystemBackend {
    pub fn new(pacing: Pacing) -> Self {
        Self { pacing }
    }
}

impl AcquisitionBackend for SystemBackend {
    fn enumerate_devices(&self) -> BackendResult<Vec<DeviceInfo>> {
        v4l2::enumerate_devices()
    }

    fn open_device(&self, device: &DeviceInfo) -> BackendResult<Box<dyn AcquisitionSource>> {
        Ok(Box::new(v4l2::V4l2Source::open(device)?))
    }

    fn open_capture(&self, path: &Path) -> BackendResult<Box<dyn AcquisitionSource>> {
        Ok(Box::new(capture_file::CaptureFileSource::open(
            path,
            self.pacing,
        )?))
    }
}
