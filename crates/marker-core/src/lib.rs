//! Per-frame marker observations and the interface of the external pose
//! detector that produces them.
//!
//! The detection algorithm itself lives outside this workspace; everything
//! here describes what goes in and what comes out of it.

pub mod detector;
mod observation;

pub use detector::{DetectionRequest, DetectorError, ImageView, MarkerDetector};
pub use observation::{
    AxisProjection, CameraIntrinsics, DetectionResult, MarkerId, MarkerObservation, Point2,
};

/// Physical side length of the printed markers, in meters.
pub const DEFAULT_MARKER_SIDE_M: f64 = 0.133;
