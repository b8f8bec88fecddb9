use tracing::{debug, info};
use vision::{OverlaySink, OverlayUpdate, SendStatus};

const HEARTBEAT_FRAMES: u64 = 30;

/// Overlay sink for headless runs: reports what a renderer would draw.
#[derive(Debug, Default)]
pub struct LogSink {
    completed: u64,
    tracked: usize,
    sent: u64,
    failed: u64,
}

impl OverlaySink for LogSink {
    fn present(&mut self, update: &OverlayUpdate<'_>) {
        self.completed += 1;
        match update.publish {
            Some(SendStatus::Sent(_)) => self.sent += 1,
            Some(SendStatus::Failed) => self.failed += 1,
            Some(SendStatus::Inactive) | None => {}
        }

        if update.nodes.len() != self.tracked {
            self.tracked = update.nodes.len();
            let mut ids: Vec<_> = update.nodes.iter().map(|node| node.id()).collect();
            ids.sort_unstable();
            info!(tracked = self.tracked, ?ids, "tracked markers changed");
        }

        for observation in update.detections {
            let [min_x, min_y, max_x, max_y] = observation.corner_bounds();
            debug!(
                id = observation.id,
                "marker outline ({min_x:.0},{min_y:.0})-({max_x:.0},{max_y:.0})"
            );
        }

        if self.completed % HEARTBEAT_FRAMES == 0 {
            let telemetry = update.telemetry;
            info!(
                "Pipeline heartbeat: frame #{}, {} fps, detection {:.2} ms, publish {}, {} tracked, {} sent / {} failed",
                update.frame_number,
                telemetry.fps,
                telemetry.processing_latency * 1e3,
                telemetry
                    .publish_latency
                    .map_or_else(|| "-".to_owned(), |secs| format!("{:.2} ms", secs * 1e3)),
                update.nodes.len(),
                self.sent,
                self.failed,
            );
        }
    }
}
