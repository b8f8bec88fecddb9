//! Per-frame point samples: frame rate from consecutive timestamps and stage latencies.

/// `round(1 / (current - previous))`, or 0 when the interval is not positive.
pub fn instantaneous_fps(previous: f64, current: f64) -> u32 {
    let interval = current - previous;
    if !(interval.is_finite() && interval > 0.0) {
        return 0;
    }
    (1.0 / interval).round().min(u32::MAX as f64) as u32
}

/// Tracks the previous admitted frame's timestamp.
#[derive(Debug, Default)]
pub struct FpsMeter {
    last_timestamp: Option<f64>,
}

impl FpsMeter {
    /// Record `timestamp` and return the instantaneous rate; 0 for the first frame.
    pub fn sample(&mut self, timestamp: f64) -> u32 {
        let fps = self
            .last_timestamp
            .map_or(0, |previous| instantaneous_fps(previous, timestamp));
        self.last_timestamp = Some(timestamp);
        fps
    }
}

/// Telemetry for the latest completed frame. Not smoothed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameTelemetry {
    pub fps: u32,
    /// Wall-clock seconds spent inside the detector call.
    pub processing_latency: f64,
    /// Wall-clock seconds spent encoding and sending the packet, when one was sent.
    pub publish_latency: Option<f64>,
}

impl FrameTelemetry {
    pub(crate) fn record(&self) {
        metrics::gauge!("aruco_pipeline_fps").set(self.fps as f64);
        metrics::histogram!("aruco_detection_latency_seconds").record(self.processing_latency);
        if let Some(latency) = self.publish_latency {
            metrics::histogram!("aruco_publish_latency_seconds").record(latency);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenth_of_a_second_is_ten_fps() {
        assert_eq!(instantaneous_fps(0.0, 0.1), 10);
    }

    #[test]
    fn rounds_to_nearest_integer() {
        assert_eq!(instantaneous_fps(5.0, 5.0 + 1.0 / 30.0), 30);
        assert_eq!(instantaneous_fps(0.0, 0.016), 63);
        assert_eq!(instantaneous_fps(0.0, 0.4), 3);
    }

    #[test]
    fn non_increasing_timestamps_yield_zero() {
        assert_eq!(instantaneous_fps(1.0, 1.0), 0);
        assert_eq!(instantaneous_fps(2.0, 1.0), 0);
        assert_eq!(instantaneous_fps(0.0, f64::NAN), 0);
    }

    #[test]
    fn meter_reports_zero_for_first_frame() {
        let mut meter = FpsMeter::default();
        assert_eq!(meter.sample(100.0), 0);
        assert_eq!(meter.sample(100.1), 10);
        assert_eq!(meter.sample(100.15), 20);
    }
}
