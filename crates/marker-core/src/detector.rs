use thiserror::Error;

use crate::observation::{CameraIntrinsics, DetectionResult};

/// Borrowed pixels handed to the detector for the duration of one call.
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// Bytes per row.
    pub stride: usize,
}

/// Everything a pose detector needs for one frame.
#[derive(Debug, Clone, Copy)]
pub struct DetectionRequest<'a> {
    pub image: ImageView<'a>,
    pub intrinsics: &'a CameraIntrinsics,
    pub distortion: Option<&'a [f64]>,
    /// Physical side length of the markers in meters.
    pub marker_side_m: f64,
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("unsupported image: {0}")]
    UnsupportedImage(String),
    #[error("detector backend failed: {0}")]
    Backend(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Synchronous, blocking pose estimator.
///
/// Implementations are called from at most one thread at a time by the frame
/// pipeline, but must still be shareable across the capture and worker threads.
pub trait MarkerDetector: Send + Sync {
    fn detect(&self, request: &DetectionRequest<'_>) -> Result<DetectionResult, DetectorError>;
}

impl<F> MarkerDetector for F
where
    F: Fn(&DetectionRequest<'_>) -> Result<DetectionResult, DetectorError> + Send + Sync,
{
    fn detect(&self, request: &DetectionRequest<'_>) -> Result<DetectionResult, DetectorError> {
        self(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MarkerObservation;

    #[test]
    fn closures_act_as_detectors() {
        let detector = |request: &DetectionRequest<'_>| {
            if request.image.data.is_empty() {
                return Err(DetectorError::UnsupportedImage("empty buffer".into()));
            }
            Ok(DetectionResult::from(vec![MarkerObservation::new(
                1,
                [0.0, 0.0, request.marker_side_m as f32],
                [0.0; 3],
            )]))
        };

        let pixels = [0u8; 4];
        let intrinsics = CameraIntrinsics::zeroed();
        let request = DetectionRequest {
            image: ImageView {
                data: &pixels,
                width: 2,
                height: 2,
                stride: 2,
            },
            intrinsics: &intrinsics,
            distortion: None,
            marker_side_m: 0.5,
        };
        let result = detector.detect(&request).unwrap();
        assert_eq!(result.markers[0].position[2], 0.5);

        let empty = DetectionRequest {
            image: ImageView {
                data: &[],
                ..request.image
            },
            ..request
        };
        assert!(matches!(
            detector.detect(&empty),
            Err(DetectorError::UnsupportedImage(_))
        ));
    }
}
