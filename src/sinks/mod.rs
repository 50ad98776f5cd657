// SPDX-License-Identifier: GPL-3.0-only

//! Frame sinks
//!
//! A sink consumes frame events on the delivery thread:
//!
//! - [`CaptureWriter`]: Matroska capture file, one track per stream (record)
//! - [`DisplaySink`]: one window per stream kind (play)
//! - [`VideoFileSink`]: H.264 MP4 of the color stream (convert)
//!
//! Sinks that write files write to a `.partial` path and only rename it to
//! the target in [`FrameSink::finish`].

pub mod capture_writer;
pub mod display;
pub mod encoder_selection;
mod pipeline;
pub mod video_file;

pub use capture_writer::CaptureWriter;
pub use display::DisplaySink;
pub use video_file::VideoFileSink;

use crate::backends::types::FrameEvent;
use std::fmt;
use std::path::PathBuf;

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Sink errors
#[derive(Debug, Clone)]
pub enum SinkError {
    /// Pipeline could not be built or started
    Open(String),
    /// A frame could not be written
    Write(String),
    /// Output could not be flushed or finalized
    Finish(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Open(msg) => write!(f, "Failed to open sink: {}", msg),
            SinkError::Write(msg) => write!(f, "Failed to write frame: {}", msg),
            SinkError::Finish(msg) => write!(f, "Failed to finish output: {}", msg),
        }
    }
}

impl std::error::Error for SinkError {}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Finish(err.to_string())
    }
}

/// Destination for frame events
pub trait FrameSink: Send + 'static {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Consume one event; frames the sink does not handle are ignored
    fn write(&mut self, event: &FrameEvent) -> SinkResult<()>;

    /// Flush and close the output, returning the finished file if any
    fn finish(&mut self) -> SinkResult<Option<PathBuf>>;

    /// Tear down without finalizing output
    fn abort(&mut self);
}

/// Convert a GStreamer flow error into a write error
pub(crate) fn flow_error(element: &str, err: gstreamer::FlowError) -> SinkError {
    SinkError::Write(format!("{} push failed: {:?}", element, err))
}
