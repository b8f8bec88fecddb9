//! Detector stand-in that replays recorded observations.

use std::{
    fs,
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
};

use anyhow::{Context, Result};
use marker_core::{
    DetectionRequest, DetectionResult, DetectorError, MarkerDetector, MarkerObservation,
};
use tracing::info;

/// Cycles through a fixed list of per-frame results, one per detect call.
#[derive(Debug)]
pub struct ReplayDetector {
    frames: Vec<DetectionResult>,
    cursor: AtomicUsize,
}

impl ReplayDetector {
    /// Read a JSON Lines file: each non-blank line is an array of observations.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read detections from {}", path.display()))?;
        let detector = Self::parse(&text)
            .with_context(|| format!("invalid detections file {}", path.display()))?;
        info!(
            frames = detector.frames.len(),
            path = %path.display(),
            "loaded recorded detections"
        );
        Ok(detector)
    }

    fn parse(text: &str) -> Result<Self> {
        let frames = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str::<DetectionResult>(line)
                    .with_context(|| format!("line {}", idx + 1))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_frames(frames))
    }

    pub fn from_frames(frames: Vec<DetectionResult>) -> Self {
        Self {
            frames,
            cursor: AtomicUsize::new(0),
        }
    }

    /// A single marker circling the optical axis, one step per frame.
    pub fn demo() -> Self {
        const STEPS: usize = 120;
        let frames = (0..STEPS)
            .map(|step| {
                let angle = step as f32 / STEPS as f32 * std::f32::consts::TAU;
                DetectionResult::from(vec![MarkerObservation::new(
                    7,
                    [0.1 * angle.cos(), 0.1 * angle.sin(), 0.5],
                    [0.0, 0.0, angle],
                )])
            })
            .collect();
        Self::from_frames(frames)
    }
}

impl MarkerDetector for ReplayDetector {
    fn detect(&self, request: &DetectionRequest<'_>) -> Result<DetectionResult, DetectorError> {
        if request.image.data.is_empty() {
            return Err(DetectorError::UnsupportedImage("empty frame buffer".into()));
        }
        if self.frames.is_empty() {
            return Ok(DetectionResult::empty());
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.frames.len();
        Ok(self.frames[idx].clone())
    }
}
