// SPDX-License-Identifier: GPL-3.0-only

//! Live depth devices over V4L2
//!
//! UVC depth cameras expose one video node per sensor. Nodes are classified
//! by the pixel formats they offer and grouped by bus into devices; only
//! groups containing a depth node are reported.

mod capture;

use super::types::*;
use super::AcquisitionSource;
use crate::constants;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, sync_channel};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};
use v4l::framesize::FrameSizeEnum;
use v4l::frameinterval::FrameIntervalEnum;
use v4l::prelude::*;
use v4l::video::Capture;

/// A queried video node before grouping
#[derive(Debug)]
struct NodeInfo {
    path: String,
    card: String,
    driver: String,
    bus: String,
    kind: StreamKind,
    profiles: Vec<StreamProfile>,
}

/// Enumerate attached depth devices
pub fn enumerate_devices() -> BackendResult<Vec<DeviceInfo>> {
    let paths = list_video_nodes(Path::new(constants::v4l2::DEV_DIR))?;
    let queried: Vec<NodeInfo> = paths.iter().filter_map(|path| query_node(path)).collect();
    let devices = group_nodes(queried);

    info!(count = devices.len(), "Enumerated depth devices");
    Ok(devices)
}

/// Sorted `video*` entries of `dir`; a missing directory has none
fn list_video_nodes(dir: &Path) -> BackendResult<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "No device directory");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };
    let mut paths: Vec<String> = entries
        .flatten()
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|n| n.starts_with("video"))
                .unwrap_or(false)
        })
        .map(|e| e.path().to_string_lossy().to_string())
        .collect();
    paths.sort();
    Ok(paths)
}

/// Block until a capture thread reports whether its stream came up
fn wait_ready(ready: &Receiver<BackendResult<()>>, path: &str) -> BackendResult<()> {
    ready.recv().map_err(|_| {
        BackendError::InitializationFailed(format!("{}: capture thread died during startup", path))
    })?
}

/// Query capabilities and discrete profiles of one node
fn query_node(path: &str) -> Option<NodeInfo> {
    let dev = match Device::with_path(path) {
        Ok(dev) => dev,
        Err(e) => {
            debug!(path, error = %e, "Skipping node");
            return None;
        }
    };
    let caps = dev.query_caps().ok()?;

    let mut profiles = Vec::new();
    for desc in dev.enum_formats().ok()? {
        let Some(format) = PixelFormat::from_fourcc(&desc.fourcc.repr) else {
            continue;
        };
        let Ok(sizes) = dev.enum_framesizes(desc.fourcc) else {
            continue;
        };
        for size in sizes {
            let FrameSizeEnum::Discrete(discrete) = size.size else {
                debug!(path, fourcc = %desc.fourcc, "Ignoring stepwise frame sizes");
                continue;
            };
            let Ok(intervals) =
                dev.enum_frameintervals(desc.fourcc, discrete.width, discrete.height)
            else {
                continue;
            };
            for interval in intervals {
                if let FrameIntervalEnum::Discrete(frac) = interval.interval
                    && frac.numerator > 0
                {
                    profiles.push(StreamProfile::new(
                        format.stream_kind(),
                        discrete.width,
                        discrete.height,
                        frac.denominator / frac.numerator,
                        format,
                    ));
                }
            }
        }
    }

    let kind = classify(&profiles)?;
    profiles.retain(|p| p.kind == kind);

    debug!(
        path,
        kind = %kind,
        card = %caps.card,
        bus = %caps.bus,
        profiles = profiles.len(),
        "Queried video node"
    );

    Some(NodeInfo {
        path: path.to_string(),
        card: caps.card,
        driver: caps.driver,
        bus: caps.bus,
        kind,
        profiles,
    })
}

/// Depth wins over infrared, infrared over color
fn classify(profiles: &[StreamProfile]) -> Option<StreamKind> {
    [StreamKind::Depth, StreamKind::Infrared, StreamKind::Color]
        .into_iter()
        .find(|kind| profiles.iter().any(|p| p.kind == *kind))
}

/// Group nodes sharing a bus into devices, keeping those with a depth node
fn group_nodes(nodes: Vec<NodeInfo>) -> Vec<DeviceInfo> {
    let mut by_bus: BTreeMap<String, Vec<NodeInfo>> = BTreeMap::new();
    for node in nodes {
        by_bus.entry(node.bus.clone()).or_default().push(node);
    }

    let mut devices = Vec::new();
    for (bus, nodes) in by_bus {
        let Some(depth_node) = nodes.iter().find(|n| n.kind == StreamKind::Depth) else {
            debug!(bus = %bus, "No depth node on bus, skipping");
            continue;
        };
        let name = depth_node.card.clone();
        let driver = depth_node.driver.clone();

        let mut device_nodes: Vec<DeviceNode> = Vec::new();
        for node in nodes {
            // First node per kind wins
            if device_nodes.iter().any(|n| n.kind == node.kind) {
                continue;
            }
            device_nodes.push(DeviceNode {
                path: node.path,
                kind: node.kind,
                profiles: node.profiles,
            });
        }
        device_nodes.sort_by_key(|n| n.kind);

        devices.push(DeviceInfo {
            name,
            driver,
            bus,
            nodes: device_nodes,
        });
    }
    devices
}

/// An opened live device
pub struct V4l2Source {
    device: DeviceInfo,
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl V4l2Source {
    /// Check every node can be opened
    pub fn open(device: &DeviceInfo) -> BackendResult<Self> {
        for node in &device.nodes {
            Device::with_path(&node.path).map_err(|e| {
                BackendError::DeviceNotFound(format!("{}: {}", node.path, e))
            })?;
        }
        Ok(Self {
            device: device.clone(),
            running: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
        })
    }

    fn join_threads(&mut self) {
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("Capture thread panicked");
            }
        }
    }
}

impl AcquisitionSource for V4l2Source {
    fn kind(&self) -> SourceKind {
        SourceKind::LiveDevice
    }

    fn description(&self) -> String {
        format!("{} ({})", self.device.name, self.device.bus)
    }

    fn available_streams(&self) -> Vec<StreamProfile> {
        self.device.profiles()
    }

    fn start(&mut self, profiles: &[StreamProfile], sender: FrameSender) -> BackendResult<()> {
        if !self.threads.is_empty() {
            return Err(BackendError::InvalidState("device already started".into()));
        }

        // Configure every node before spawning anything
        let mut configured = Vec::with_capacity(profiles.len());
        for profile in profiles {
            let node = self.device.node_for(profile.kind).ok_or_else(|| {
                BackendError::FormatNotSupported(format!("no {} node", profile.kind))
            })?;
            configured.push(capture::configure_node(&node.path, profile)?);
        }

        self.running.store(true, Ordering::SeqCst);
        for node in configured {
            let running = Arc::clone(&self.running);
            let sender = sender.clone();
            let path = node.path.clone();
            let name = format!("{}-capture", node.profile.kind.name());
            let (ready_tx, ready_rx) = sync_channel::<BackendResult<()>>(1);
            let started = std::thread::Builder::new()
                .name(name)
                .spawn(move || capture::capture_loop(node, sender, running, ready_tx))
                .map_err(|e| BackendError::InitializationFailed(e.to_string()))
                .and_then(|handle| {
                    self.threads.push(handle);
                    wait_ready(&ready_rx, &path)
                });
            if let Err(e) = started {
                warn!(path = %path, error = %e, "Capture thread failed to start");
                self.running.store(false, Ordering::SeqCst);
                self.join_threads();
                return Err(e);
            }
        }

        info!(device = %self.device.name, streams = profiles.len(), "V4L2 capture started");
        Ok(())
    }

    fn stop(&mut self) -> BackendResult<()> {
        info!(device = %self.device.name, "Stopping V4L2 capture");
        self.running.store(false, Ordering::SeqCst);
        self.join_threads();
        Ok(())
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            debug!("V4l2Source dropped while capturing");
            self.running.store(false, Ordering::SeqCst);
            self.join_threads();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(path: &str, bus: &str, kind: StreamKind) -> NodeInfo {
        let format = match kind {
            StreamKind::Depth => PixelFormat::Y16,
            StreamKind::Color => PixelFormat::Rgb24,
            StreamKind::Infrared => PixelFormat::Gray8,
        };
        NodeInfo {
            path: path.to_string(),
            card: format!("{} camera", bus),
            driver: "uvcvideo".to_string(),
            bus: bus.to_string(),
            kind,
            profiles: vec![StreamProfile::new(kind, 640, 480, 30, format)],
        }
    }

    #[test]
    fn test_group_requires_depth_node() {
        let devices = group_nodes(vec![
            node("/dev/video0", "usb-1", StreamKind::Color),
            node("/dev/video2", "usb-2", StreamKind::Color),
            node("/dev/video4", "usb-2", StreamKind::Depth),
            node("/dev/video6", "usb-2", StreamKind::Infrared),
        ]);

        assert_eq!(devices.len(), 1);
        let device = &devices[0];
        assert_eq!(device.bus, "usb-2");
        let kinds: Vec<_> = device.nodes.iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![StreamKind::Depth, StreamKind::Color, StreamKind::Infrared]
        );
        assert_eq!(device.node_for(StreamKind::Depth).unwrap().path, "/dev/video4");
    }

    #[test]
    fn test_group_keeps_first_node_per_kind() {
        let devices = group_nodes(vec![
            node("/dev/video0", "usb-1", StreamKind::Depth),
            node("/dev/video1", "usb-1", StreamKind::Depth),
        ]);
        assert_eq!(devices[0].nodes.len(), 1);
        assert_eq!(devices[0].nodes[0].path, "/dev/video0");
    }

    #[test]
    fn test_missing_device_dir_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let nodes = list_video_nodes(&dir.path().join("dev")).unwrap();
        assert!(nodes.is_empty());
    }

    #[test]
    fn test_lists_sorted_video_nodes() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["video2", "video0", "media0"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let nodes = list_video_nodes(dir.path()).unwrap();
        let expected: Vec<String> = ["video0", "video2"]
            .iter()
            .map(|n| dir.path().join(n).to_string_lossy().to_string())
            .collect();
        assert_eq!(nodes, expected);
    }

    #[test]
    fn test_wait_ready_reports_thread_outcome() {
        let (tx, rx) = sync_channel::<BackendResult<()>>(1);
        tx.send(Ok(())).unwrap();
        assert!(wait_ready(&rx, "/dev/video0").is_ok());

        tx.send(Err(BackendError::InitializationFailed("no buffers".into())))
            .unwrap();
        assert!(matches!(
            wait_ready(&rx, "/dev/video0"),
            Err(BackendError::InitializationFailed(msg)) if msg == "no buffers"
        ));

        drop(tx);
        assert!(matches!(
            wait_ready(&rx, "/dev/video0"),
            Err(BackendError::InitializationFailed(msg)) if msg.contains("died")
        ));
    }

    #[test]
    fn test_classify_prefers_depth() {
        let profiles = [
            StreamProfile::new(StreamKind::Color, 640, 480, 30, PixelFormat::Yuyv),
            StreamProfile::new(StreamKind::Depth, 640, 400, 15, PixelFormat::Y16),
        ];
        assert_eq!(classify(&profiles), Some(StreamKind::Depth));
        assert_eq!(classify(&[]), None);
    }
}
