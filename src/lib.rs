// SPDX-License-Identifier: GPL-3.0-only

//! depthcap - record, play back and convert depth camera captures
//!
//! The crate is organized into several modules:
//!
//! - [`session`]: session lifecycle controller and stop signal
//! - [`backends`]: live V4L2 depth devices and recorded capture files
//! - [`sinks`]: capture writer, display windows and video encoding
//! - [`media`]: depth visualization and GStreamer buffer helpers
//! - [`config`]: output paths and run settings
//! - [`storage`]: partial-file handling for outputs

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod media;
pub mod session;
pub mod sinks;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use constants::BitratePreset;
pub use errors::{SessionError, SessionResult};
pub use session::{SessionController, SessionState, StopReport, StopSignal};
