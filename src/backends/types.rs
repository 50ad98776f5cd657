// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for acquisition backends

use crate::session::StopSignal;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Named category of data channel within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Depth,
    Color,
    Infrared,
}

impl StreamKind {
    pub const ALL: [StreamKind; 3] = [StreamKind::Depth, StreamKind::Color, StreamKind::Infrared];

    /// Lowercase name, also used for element and window names
    pub fn name(&self) -> &'static str {
        match self {
            StreamKind::Depth => "depth",
            StreamKind::Color => "color",
            StreamKind::Infrared => "infrared",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Depth => write!(f, "Depth"),
            StreamKind::Color => write!(f, "Color"),
            StreamKind::Infrared => write!(f, "Infrared"),
        }
    }
}

/// Pixel layout of a frame payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 16-bit little-endian depth in millimeters
    Y16,
    /// 8-bit grayscale (infrared)
    Gray8,
    /// Packed 8-bit RGB
    Rgb24,
    /// Packed YUV 4:2:2
    Yuyv,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Y16 | PixelFormat::Yuyv => 2,
            PixelFormat::Rgb24 => 3,
        }
    }

    /// GStreamer raw video format string
    pub fn gst_format(&self) -> &'static str {
        match self {
            PixelFormat::Y16 => "GRAY16_LE",
            PixelFormat::Gray8 => "GRAY8",
            PixelFormat::Rgb24 => "RGB",
            PixelFormat::Yuyv => "YUY2",
        }
    }

    pub fn from_gst_format(format: &str) -> Option<Self> {
        match format {
            "GRAY16_LE" => Some(PixelFormat::Y16),
            "GRAY8" => Some(PixelFormat::Gray8),
            "RGB" => Some(PixelFormat::Rgb24),
            "YUY2" => Some(PixelFormat::Yuyv),
            _ => None,
        }
    }

    /// V4L2 FourCC codes accepted for this format
    pub fn fourccs(&self) -> &'static [[u8; 4]] {
        match self {
            PixelFormat::Y16 => const { &[*b"Y16 ", *b"Z16 "] },
            PixelFormat::Gray8 => const { &[*b"GREY"] },
            PixelFormat::Rgb24 => const { &[*b"RGB3"] },
            PixelFormat::Yuyv => const { &[*b"YUYV"] },
        }
    }

    pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"Y16 " | b"Z16 " => Some(PixelFormat::Y16),
            b"GREY" => Some(PixelFormat::Gray8),
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"YUYV" => Some(PixelFormat::Yuyv),
            _ => None,
        }
    }

    /// Stream kind a node offering this format carries
    pub fn stream_kind(&self) -> StreamKind {
        match self {
            PixelFormat::Y16 => StreamKind::Depth,
            PixelFormat::Gray8 => StreamKind::Infrared,
            PixelFormat::Rgb24 | PixelFormat::Yuyv => StreamKind::Color,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelFormat::Y16 => write!(f, "Y16"),
            PixelFormat::Gray8 => write!(f, "GRAY8"),
            PixelFormat::Rgb24 => write!(f, "RGB888"),
            PixelFormat::Yuyv => write!(f, "YUYV"),
        }
    }
}

/// One stream as offered by a source or requested for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamProfile {
    pub kind: StreamKind,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
}

impl StreamProfile {
    pub fn new(kind: StreamKind, width: u32, height: u32, fps: u32, format: PixelFormat) -> Self {
        Self {
            kind,
            width,
            height,
            fps,
            format,
        }
    }

    /// Size of one tightly packed frame in bytes
    pub fn frame_size(&self) -> usize {
        (self.width * self.height * self.format.bytes_per_pixel()) as usize
    }
}

impl std::fmt::Display for StreamProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}x{}@{}fps {}",
            self.kind, self.width, self.height, self.fps, self.format
        )
    }
}

/// Which streams a session activates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSelection {
    /// Exactly these profiles (live recording)
    Explicit(Vec<StreamProfile>),
    /// These kinds, at the first profile the source offers for each
    Kinds(Vec<StreamKind>),
    /// Every kind the source offers
    All,
}

/// Where a session acquires frames from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    /// First enumerated live device
    FirstDevice,
    /// Previously recorded capture file
    CaptureFile(std::path::PathBuf),
}

/// Kind of an opened acquisition source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    LiveDevice,
    CaptureFile,
}

/// One video node of a live device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNode {
    /// Device path (e.g., /dev/video2)
    pub path: String,
    /// Stream kind carried by this node
    pub kind: StreamKind,
    /// Discrete profiles the node offers, preferred first
    pub profiles: Vec<StreamProfile>,
}

/// A live depth device, possibly spanning several video nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device name (V4L2 card)
    pub name: String,
    /// Driver name (V4L2 driver)
    pub driver: String,
    /// Bus the nodes share (V4L2 bus_info)
    pub bus: String,
    pub nodes: Vec<DeviceNode>,
}

impl DeviceInfo {
    pub fn profiles(&self) -> Vec<StreamProfile> {
        self.nodes
            .iter()
            .flat_map(|node| node.profiles.iter().copied())
            .collect()
    }

    pub fn node_for(&self, kind: StreamKind) -> Option<&DeviceNode> {
        self.nodes.iter().find(|node| node.kind == kind)
    }
}

/// A decoded frame of one stream
#[derive(Clone)]
pub struct Frame {
    pub kind: StreamKind,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Bytes per row, including any padding
    pub stride: u32,
    pub data: Arc<[u8]>,
    /// Per-stream sequence number from the source
    pub sequence: u64,
    /// Presentation time relative to the start of the stream
    pub timestamp: Duration,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("kind", &self.kind)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("stride", &self.stride)
            .field("bytes", &self.data.len())
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl Frame {
    /// Bytes of one row without padding
    pub fn row_bytes(&self) -> usize {
        (self.width * self.format.bytes_per_pixel()) as usize
    }

    /// Whether the payload holds `height` rows of `stride` bytes
    pub fn is_complete(&self) -> bool {
        let stride = self.stride as usize;
        stride >= self.row_bytes()
            && self.data.len() >= stride * self.height.saturating_sub(1) as usize + self.row_bytes()
    }

    /// Payload with row padding removed
    pub fn packed(&self) -> Cow<'_, [u8]> {
        let row = self.row_bytes();
        let stride = self.stride as usize;
        if stride == row {
            return Cow::Borrowed(&self.data[..(row * self.height as usize).min(self.data.len())]);
        }
        let mut out = Vec::with_capacity(row * self.height as usize);
        for line in self.data.chunks(stride).take(self.height as usize) {
            out.extend_from_slice(&line[..row.min(line.len())]);
        }
        Cow::Owned(out)
    }

    /// Depth values in millimeters (Y16 frames only)
    pub fn depth_values(&self) -> Option<Cow<'_, [u16]>> {
        if self.format != PixelFormat::Y16 {
            return None;
        }
        let packed = self.packed();
        if cfg!(target_endian = "little")
            && let Cow::Borrowed(bytes) = packed
            && let Ok(values) = bytemuck::try_cast_slice::<u8, u16>(bytes)
        {
            return Some(Cow::Borrowed(values));
        }
        Some(Cow::Owned(
            packed
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect(),
        ))
    }
}

/// Frames available at a single acquisition tick
#[derive(Debug, Clone, Default)]
pub struct FrameEvent {
    sequence: u64,
    frames: Vec<Frame>,
}

impl FrameEvent {
    pub fn new(sequence: u64, frames: Vec<Frame>) -> Self {
        Self { sequence, frames }
    }

    /// Position of this event in the session, starting at 0
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn frame(&self, kind: StreamKind) -> Option<&Frame> {
        self.frames.iter().find(|frame| frame.kind == kind)
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn kinds(&self) -> impl Iterator<Item = StreamKind> + '_ {
        self.frames.iter().map(|frame| frame.kind)
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Message carried from a source to the delivery loop
#[derive(Debug)]
pub(crate) enum Delivery {
    Event(FrameEvent),
    EndOfStream,
}

/// Counters shared between a session's sender and its controller
#[derive(Debug, Default)]
pub struct DeliveryStats {
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl DeliveryStats {
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Producer half of a session's frame queue, handed to a source on start
///
/// Cloneable so sources with several capture threads can share it. Event
/// sequence numbers are assigned here and are unique per session, and all
/// clones share one session clock for capture timestamps.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Delivery>,
    next_sequence: Arc<AtomicU64>,
    stats: Arc<DeliveryStats>,
    stop_signal: StopSignal,
    epoch: Instant,
}

impl FrameSender {
    pub(crate) fn new(
        tx: mpsc::Sender<Delivery>,
        stats: Arc<DeliveryStats>,
        stop_signal: StopSignal,
    ) -> Self {
        Self {
            tx,
            next_sequence: Arc::new(AtomicU64::new(0)),
            stats,
            stop_signal,
            epoch: Instant::now(),
        }
    }

    /// Time since the session started; live sources stamp frames with it
    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn event(&self, frames: Vec<Frame>) -> FrameEvent {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        FrameEvent::new(sequence, frames)
    }

    /// Queue frames without blocking; returns false if the event was dropped
    pub fn send(&self, frames: Vec<Frame>) -> bool {
        let event = self.event(frames);
        let sequence = event.sequence();
        match self.tx.try_send(Delivery::Event(event)) {
            Ok(()) => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                if dropped % crate::constants::timing::FRAME_LOG_INTERVAL == 0 {
                    debug!(sequence, dropped = dropped + 1, "Frame event dropped (queue full)");
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Queue frames, waiting for room; returns false once the session stopped
    ///
    /// Must not be called from inside an async runtime.
    pub fn send_blocking(&self, frames: Vec<Frame>) -> bool {
        let event = self.event(frames);
        if self.tx.blocking_send(Delivery::Event(event)).is_ok() {
            self.stats.sent.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// The source has no more frames; the session stops once queued events are handled
    pub fn end_of_stream(&self) {
        debug!("Source reached end of stream");
        if self.tx.blocking_send(Delivery::EndOfStream).is_err() {
            self.stop_signal.request_stop();
        }
    }

    /// Whether the consuming side has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for backend operations
#[derive(Debug, Clone)]
pub enum BackendError {
    /// Backend is not available on this system
    NotAvailable(String),
    /// Failed to initialize backend
    InitializationFailed(String),
    /// Device or file not found
    DeviceNotFound(String),
    /// Format not supported
    FormatNotSupported(String),
    /// Source was started twice or stopped before starting
    InvalidState(String),
    /// General I/O error
    IoError(String),
    /// Other errors
    Other(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::NotAvailable(msg) => write!(f, "Backend not available: {}", msg),
            BackendError::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            BackendError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            BackendError::FormatNotSupported(msg) => write!(f, "Format not supported: {}", msg),
            BackendError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            BackendError::IoError(msg) => write!(f, "I/O error: {}", msg),
            BackendError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::IoError(err.to_string())
    }
}

/// Log once per `FRAME_LOG_INTERVAL` frames
pub(crate) fn log_periodic_warning(counter: u64, message: &str) {
    if counter % crate::constants::timing::FRAME_LOG_INTERVAL == 0 {
        warn!(count = counter + 1, "{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(format: PixelFormat, width: u32, height: u32, stride: u32, data: Vec<u8>) -> Frame {
        Frame {
            kind: format.stream_kind(),
            width,
            height,
            format,
            stride,
            data: Arc::from(data.into_boxed_slice()),
            sequence: 0,
            timestamp: Duration::ZERO,
        }
    }

    #[test]
    fn test_packed_strips_row_padding() {
        // 2x2 GRAY8 with 2 bytes of padding per row
        let f = frame(PixelFormat::Gray8, 2, 2, 4, vec![1, 2, 0, 0, 3, 4, 0, 0]);
        assert!(f.is_complete());
        assert_eq!(f.packed().as_ref(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_depth_values_little_endian() {
        let f = frame(PixelFormat::Y16, 2, 1, 4, vec![0x10, 0x27, 0xE8, 0x03]);
        let depth = f.depth_values().unwrap();
        assert_eq!(depth.as_ref(), &[10_000, 1_000]);
    }

    #[test]
    fn test_depth_values_only_for_y16() {
        let f = frame(PixelFormat::Rgb24, 1, 1, 3, vec![1, 2, 3]);
        assert!(f.depth_values().is_none());
    }

    #[test]
    fn test_incomplete_frame() {
        let f = frame(PixelFormat::Rgb24, 2, 2, 6, vec![0; 7]);
        assert!(!f.is_complete());
    }

    #[test]
    fn test_format_mappings() {
        for format in [
            PixelFormat::Y16,
            PixelFormat::Gray8,
            PixelFormat::Rgb24,
            PixelFormat::Yuyv,
        ] {
            assert_eq!(PixelFormat::from_gst_format(format.gst_format()), Some(format));
            for fourcc in format.fourccs() {
                assert_eq!(PixelFormat::from_fourcc(fourcc), Some(format));
            }
        }
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), None);
        assert_eq!(PixelFormat::Y16.stream_kind(), StreamKind::Depth);
        assert_eq!(PixelFormat::Yuyv.stream_kind(), StreamKind::Color);
    }

    #[test]
    fn test_event_lookup_by_kind() {
        let depth = frame(PixelFormat::Y16, 1, 1, 2, vec![0, 0]);
        let event = FrameEvent::new(7, vec![depth]);
        assert_eq!(event.sequence(), 7);
        assert!(event.frame(StreamKind::Depth).is_some());
        assert!(event.frame(StreamKind::Color).is_none());
        assert_eq!(event.kinds().collect::<Vec<_>>(), vec![StreamKind::Depth]);
    }

    #[test]
    fn test_sender_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let stats = Arc::new(DeliveryStats::default());
        let sender = FrameSender::new(tx, Arc::clone(&stats), StopSignal::new());

        assert!(sender.send(Vec::new()));
        assert!(!sender.send(Vec::new()));
        assert_eq!(stats.sent(), 1);
        assert_eq!(stats.dropped(), 1);

        match rx.try_recv() {
            Ok(Delivery::Event(event)) => assert_eq!(event.sequence(), 0),
            other => panic!("unexpected delivery: {:?}", other),
        }
    }

    #[test]
    fn test_end_of_stream_after_close_requests_stop() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let signal = StopSignal::new();
        let sender = FrameSender::new(tx, Arc::new(DeliveryStats::default()), signal.clone());

        assert!(sender.is_closed());
        sender.end_of_stream();
        assert!(signal.is_stop_requested());
    }

    #[test]
    fn test_clones_share_session_clock() {
        let (tx, _rx) = mpsc::channel(1);
        let sender = FrameSender::new(tx, Arc::new(DeliveryStats::default()), StopSignal::new());
        std::thread::sleep(Duration::from_millis(20));

        // A clone made later still measures from the session start
        let clone = sender.clone();
        let later = clone.elapsed();
        assert!(later >= Duration::from_millis(20));
        assert!(sender.elapsed() >= later);
    }
}
