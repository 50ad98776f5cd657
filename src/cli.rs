// SPDX-License-Identifier: GPL-3.0-only

//! CLI command implementations
//!
//! Each session command opens its source before creating a sink, so a
//! missing device or capture never leaves an output file behind.

use depthcap::backends::types::{
    FrameEvent, SourceDescriptor, StreamKind, StreamProfile, StreamSelection,
};
use depthcap::backends::{AcquisitionBackend, Pacing, SystemBackend};
use depthcap::constants::{self, BitratePreset, format_bitrate, video_output};
use depthcap::sinks::encoder_selection::available_encoders;
use depthcap::sinks::{CaptureWriter, DisplaySink, FrameSink, VideoFileSink};
use depthcap::{Config, SessionController, StopReport, StopSignal};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Install the Ctrl+C handler raising `signal`
fn install_interrupt_handler(signal: &StopSignal) -> Result<(), Box<dyn std::error::Error>> {
    let signal = signal.clone();
    ctrlc::set_handler(move || {
        if signal.request_stop() {
            println!();
            println!("Stopping...");
        }
    })?;
    Ok(())
}

/// Write the event to the sink, logging failures without stopping the session
fn write_or_warn<S: FrameSink>(event: &FrameEvent, sink: &mut S) {
    if let Err(e) = sink.write(event) {
        warn!(sink = sink.name(), sequence = event.sequence(), error = %e, "Frame skipped");
    }
}

fn print_report(report: &StopReport) {
    println!("Events delivered: {}", report.events_delivered);
    if report.events_dropped > 0 {
        println!("Events dropped: {}", report.events_dropped);
    }
    if let Some(path) = report.output.as_ref() {
        println!("Saved: {}", path.display());
    }
}

fn print_streams(profiles: &[StreamProfile]) {
    for profile in profiles {
        println!("  {}", profile);
    }
}

/// Record depth and color from the first device until Ctrl+C
pub fn record(output: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default().with_capture_path(output);
    let signal = StopSignal::new();
    install_interrupt_handler(&signal)?;

    let backend = SystemBackend::new(Pacing::Realtime);
    let mut session = SessionController::new(signal);
    session.open(&backend, &SourceDescriptor::FirstDevice)?;
    if let Some(description) = session.source_description() {
        println!("Using device: {}", description);
    }

    let profiles = session
        .configure(&StreamSelection::Explicit(constants::record_profiles()))?
        .to_vec();
    println!("Recording streams:");
    print_streams(&profiles);

    let writer = CaptureWriter::create(&config.capture_path, &profiles)?;
    println!("Output: {}", config.capture_path.display());

    session.start(writer, |event, writer| {
        if let Some(depth) = event.frame(StreamKind::Depth) {
            info!("Depth frame: {}x{}", depth.width, depth.height);
        }
        if let Some(color) = event.frame(StreamKind::Color) {
            info!("Color frame: {}x{}", color.width, color.height);
        }
        write_or_warn(event, writer);
    })?;

    println!();
    println!("Recording... (press Ctrl+C to stop)");
    session.run_until_cancelled(config.poll_interval())?;

    let report = session.stop()?;
    print_report(&report);
    Ok(())
}

/// Show every stream of a capture until Ctrl+C or the end of the file
pub fn play(input: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default().with_capture_path(input);
    let signal = StopSignal::new();
    install_interrupt_handler(&signal)?;

    let backend = SystemBackend::new(Pacing::Realtime);
    let mut session = SessionController::new(signal);
    session.open(
        &backend,
        &SourceDescriptor::CaptureFile(config.capture_path.clone()),
    )?;

    let profiles = session.configure(&StreamSelection::All)?.to_vec();
    println!("Playing {}:", config.capture_path.display());
    print_streams(&profiles);

    let display = DisplaySink::create(&profiles)?;
    session.start(display, write_or_warn)?;

    println!();
    println!("Playing... (press Ctrl+C to stop)");
    session.run_until_cancelled(config.poll_interval())?;

    let report = session.stop()?;
    print_report(&report);
    Ok(())
}

/// Encode the color stream of a capture to MP4
pub fn convert(
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    bitrate: Option<BitratePreset>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default()
        .with_capture_path(input)
        .with_video_path(output)
        .with_bitrate(bitrate);
    let signal = StopSignal::new();
    install_interrupt_handler(&signal)?;

    let backend = SystemBackend::new(Pacing::AsFastAsPossible);
    let mut session = SessionController::new(signal);
    session.open(
        &backend,
        &SourceDescriptor::CaptureFile(config.capture_path.clone()),
    )?;

    let profiles = session
        .configure(&StreamSelection::Kinds(vec![StreamKind::Color]))?
        .to_vec();
    let Some(color) = profiles.iter().find(|p| p.kind == StreamKind::Color) else {
        return Err("capture has no color stream".into());
    };

    println!("Input: {}", config.capture_path.display());
    println!("Color stream: {}", color);
    println!(
        "Output: {} ({}x{} @ {}fps, {})",
        config.video_path.display(),
        video_output::WIDTH,
        video_output::HEIGHT,
        video_output::FPS,
        format_bitrate(config.bitrate.bitrate_kbps())
    );

    let sink = VideoFileSink::create(&config.video_path, color.format, config.bitrate)?;
    session.start(sink, write_or_warn)?;

    println!();
    println!("Converting... (press Ctrl+C to stop)");
    session.run_until_cancelled(config.poll_interval())?;

    let report = session.stop()?;
    print_report(&report);
    Ok(())
}

/// List detected depth devices and their streams
pub fn list_devices() -> Result<(), Box<dyn std::error::Error>> {
    let backend = SystemBackend::default();
    let devices = backend.enumerate_devices()?;

    if devices.is_empty() {
        println!("No depth devices found");
    } else {
        println!("Available depth devices:");
        println!();
    }
    for (index, device) in devices.iter().enumerate() {
        println!("  [{}] {} ({}, {})", index, device.name, device.driver, device.bus);
        for node in &device.nodes {
            println!("      {}: {}", node.kind, node.path);
            for profile in &node.profiles {
                println!(
                    "        {}x{} @ {}fps {}",
                    profile.width, profile.height, profile.fps, profile.format
                );
            }
        }
    }

    let encoders = available_encoders();
    println!();
    if encoders.is_empty() {
        println!("No H.264 encoders installed (convert unavailable)");
    } else {
        println!("H.264 encoders: {}", encoders.join(", "));
    }

    Ok(())
}

#[derive(Serialize)]
struct CaptureInfo<'a> {
    path: &'a Path,
    source: String,
    streams: Vec<StreamProfile>,
}

/// Print the streams of a capture file
pub fn info(input: Option<PathBuf>, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default().with_capture_path(input);
    let backend = SystemBackend::default();
    let source = backend.open_capture(&config.capture_path)?;

    let capture = CaptureInfo {
        path: &config.capture_path,
        source: source.description(),
        streams: source.available_streams(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&capture)?);
        return Ok(());
    }

    println!("Capture: {}", capture.path.display());
    println!("Source: {}", capture.source);
    if capture.streams.is_empty() {
        println!("No video streams");
    } else {
        println!("Streams:");
        print_streams(&capture.streams);
    }
    Ok(())
}
