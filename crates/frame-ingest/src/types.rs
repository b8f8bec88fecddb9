use std::{sync::OnceLock, time::Instant};

use glam::Mat4;
use marker_core::{CameraIntrinsics, ImageView};
use thiserror::Error;

/// Captured image plus the metadata the detector and the pipeline need.
///
/// Owned by the pipeline from delivery until the detector call returns.
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    /// Presentation timestamp in seconds on a monotonic clock.
    pub timestamp: f64,
    /// Calibration delivered with this frame, when the device provides it.
    pub intrinsics: Option<CameraIntrinsics>,
    /// World-from-camera transform at capture time, when known.
    pub camera_pose: Option<Mat4>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
    Gray8,
}

impl FrameFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            FrameFormat::Bgr8 => 3,
            FrameFormat::Gray8 => 1,
        }
    }
}

impl Frame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
        timestamp: f64,
    ) -> Self {
        Self {
            data,
            width,
            height,
            format,
            timestamp,
            intrinsics: None,
            camera_pose: None,
        }
    }

    pub fn with_intrinsics(mut self, intrinsics: CameraIntrinsics) -> Self {
        self.intrinsics = Some(intrinsics);
        self
    }

    pub fn with_camera_pose(mut self, pose: Mat4) -> Self {
        self.camera_pose = Some(pose);
        self
    }

    pub fn view(&self) -> ImageView<'_> {
        ImageView {
            data: &self.data,
            width: self.width,
            height: self.height,
            stride: self.width as usize * self.format.bytes_per_pixel(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    /// No frame buffer could be obtained for this tick; the frame is skipped.
    #[error("no frame buffer available: {0}")]
    Acquisition(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

static CLOCK_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Seconds elapsed on the process-wide monotonic clock used for frame timestamps.
pub fn monotonic_seconds() -> f64 {
    CLOCK_EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64()
}
