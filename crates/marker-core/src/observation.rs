use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Identifier of a marker pattern; unique within one frame.
pub type MarkerId = u32;

/// Image-space point in pixels.
pub type Point2 = [f32; 2];

/// Projection of a marker's local axes into the image, used for overlay drawing.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisProjection {
    pub base: Point2,
    pub x: Point2,
    pub y: Point2,
    pub z: Point2,
}

/// One detected marker in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerObservation {
    pub id: MarkerId,
    /// Camera-relative translation in meters.
    pub position: [f32; 3],
    /// Rotation as returned by the detector (a Rodrigues vector for OpenCV
    /// style back-ends). Passed through to the wire unchanged.
    pub orientation: [f32; 3],
    /// Top-left, top-right, bottom-right, bottom-left.
    #[serde(default)]
    pub corners: [Point2; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_vectors: Option<AxisProjection>,
}

impl MarkerObservation {
    pub fn new(id: MarkerId, position: [f32; 3], orientation: [f32; 3]) -> Self {
        Self {
            id,
            position,
            orientation,
            corners: [[0.0; 2]; 4],
            image_vectors: None,
        }
    }

    pub fn with_corners(mut self, corners: [Point2; 4]) -> Self {
        self.corners = corners;
        self
    }

    /// Axis-aligned bounds of the corner quad as `[min_x, min_y, max_x, max_y]`.
    pub fn corner_bounds(&self) -> [f32; 4] {
        let mut bounds = [f32::MAX, f32::MAX, f32::MIN, f32::MIN];
        for [x, y] in self.corners {
            bounds[0] = bounds[0].min(x);
            bounds[1] = bounds[1].min(y);
            bounds[2] = bounds[2].max(x);
            bounds[3] = bounds[3].max(y);
        }
        bounds
    }
}

/// Markers found in a single frame, in detector order.
///
/// Order carries no meaning across frames; the marker id is the only stable key.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectionResult {
    pub markers: Vec<MarkerObservation>,
}

impl DetectionResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MarkerObservation> {
        self.markers.iter()
    }
}

impl From<Vec<MarkerObservation>> for DetectionResult {
    fn from(markers: Vec<MarkerObservation>) -> Self {
        Self { markers }
    }
}

impl<'a> IntoIterator for &'a DetectionResult {
    type Item = &'a MarkerObservation;
    type IntoIter = std::slice::Iter<'a, MarkerObservation>;

    fn into_iter(self) -> Self::IntoIter {
        self.markers.iter()
    }
}

/// Pinhole camera matrix, stored row-major:
///
/// ```text
/// fx  0 cx
///  0 fy cy
///  0  0  1
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub matrix: [f64; 9],
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            matrix: [fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0],
        }
    }

    pub fn from_row_major(matrix: [f64; 9]) -> Self {
        Self { matrix }
    }

    /// All-zero matrix handed to the detector when no calibration is known.
    pub fn zeroed() -> Self {
        Self { matrix: [0.0; 9] }
    }

    pub fn is_zeroed(&self) -> bool {
        self.matrix.iter().all(|v| *v == 0.0)
    }

    pub fn fx(&self) -> f64 {
        self.matrix[0]
    }

    pub fn fy(&self) -> f64 {
        self.matrix[4]
    }

    pub fn cx(&self) -> f64 {
        self.matrix[2]
    }

    pub fn cy(&self) -> f64 {
        self.matrix[5]
    }

    /// Element at `row`, `col` (both in `0..3`).
    pub fn at(&self, row: usize, col: usize) -> f64 {
        self.matrix[row * 3 + col]
    }
}

impl fmt::Display for CameraIntrinsics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fx={:.2} fy={:.2} cx={:.2} cy={:.2}",
            self.fx(),
            self.fy(),
            self.cx(),
            self.cy()
        )
    }
}

/// Parses nine comma-separated numbers in row-major order.
impl FromStr for CameraIntrinsics {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| format!("intrinsics must be numbers: {err}"))?;
        let matrix: [f64; 9] = values
            .try_into()
            .map_err(|values: Vec<f64>| format!("intrinsics need 9 values, got {}", values.len()))?;
        Ok(Self::from_row_major(matrix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intrinsics_accessors_follow_row_major_layout() {
        let k = CameraIntrinsics::new(800.0, 810.0, 320.0, 240.0);
        assert_eq!(k.fx(), 800.0);
        assert_eq!(k.fy(), 810.0);
        assert_eq!(k.cx(), 320.0);
        assert_eq!(k.cy(), 240.0);
        assert_eq!(k.at(2, 2), 1.0);
        assert!(!k.is_zeroed());
        assert!(CameraIntrinsics::zeroed().is_zeroed());
    }

    #[test]
    fn intrinsics_parse_from_csv() {
        let k: CameraIntrinsics = "800, 0, 320, 0, 800, 240, 0, 0, 1".parse().unwrap();
        assert_eq!(k, CameraIntrinsics::new(800.0, 800.0, 320.0, 240.0));
        assert!("1,2,3".parse::<CameraIntrinsics>().unwrap_err().contains("9 values"));
        assert!("a,b".parse::<CameraIntrinsics>().is_err());
    }

    #[test]
    fn corner_bounds_cover_quad() {
        let obs = MarkerObservation::new(3, [0.0; 3], [0.0; 3]).with_corners([
            [10.0, 12.0],
            [30.0, 11.0],
            [31.0, 40.0],
            [9.0, 38.0],
        ]);
        assert_eq!(obs.corner_bounds(), [9.0, 11.0, 31.0, 40.0]);
    }

    #[test]
    fn detection_result_reads_plain_json_array() {
        let json = r#"[{"id": 7, "position": [0.1, 0.2, 0.3], "orientation": [0, 0, 0]}]"#;
        let result: DetectionResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.markers[0].id, 7);
        assert!(result.markers[0].image_vectors.is_none());
    }
}
