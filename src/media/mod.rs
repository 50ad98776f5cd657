// SPDX-License-Identifier: GPL-3.0-only

//! Media helpers shared by the sinks
//!
//! - [`depth_viz`]: depth to JET-colored RGB
//! - [`buffers`]: frame payloads to GStreamer buffers and caps

pub mod buffers;
pub mod depth_viz;

pub use depth_viz::depth_to_rgb;
