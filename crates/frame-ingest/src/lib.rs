//! Frame delivery for the marker pipeline.
//!
//! Capture sources run on their own thread and hand every frame to a
//! caller-supplied callback. Whether a frame is processed or dropped is the
//! callback's decision; sources never queue.

mod synthetic;
mod types;

pub use synthetic::{CaptureHandle, SyntheticSource, spawn_synthetic_source};
pub use types::{CaptureError, Frame, FrameFormat, monotonic_seconds};
