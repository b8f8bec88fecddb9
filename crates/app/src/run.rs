use std::{
    sync::{Arc, atomic::Ordering},
    thread,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use frame_ingest::{SyntheticSource, spawn_synthetic_source};
use marker_core::MarkerDetector;
use tracing::{debug, info, warn};
use vision::{FramePipeline, PipelineConfig, Publisher, telemetry};

use crate::{cli::RunArgs, control, replay::ReplayDetector, sink::LogSink};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Drive the pipeline from the synthetic source until Ctrl+C, `quit`, or the
/// frame limit.
pub fn run(args: RunArgs) -> Result<()> {
    let RunArgs {
        pipeline,
        capture,
        detections,
        no_control,
    } = args;
    let config = PipelineConfig::try_from(pipeline)?;

    let _telemetry_guard = telemetry::enter_runtime(&config.telemetry, config.verbose);
    telemetry::init_metrics_recorder(config.telemetry.metrics_listen)?;
    let run_span = tracing::info_span!(
        "aruco.run",
        dispatch = ?config.dispatch,
        width = capture.width,
        height = capture.height,
        fps = capture.fps,
    );
    let _run_span_guard = run_span.enter();

    let shutdown = control::shutdown_flag();

    let detector: Arc<dyn MarkerDetector> = match detections.as_deref() {
        Some(path) => Arc::new(ReplayDetector::load(path)?),
        None => {
            debug!("no --detections file given; replaying a single orbiting marker");
            Arc::new(ReplayDetector::demo())
        }
    };

    let publisher = Arc::new(Publisher::new());
    if let Some(target) = config.publish_target.as_deref() {
        start_publishing(&publisher, target);
    }

    let pipeline = Arc::new(FramePipeline::new(
        &config,
        detector,
        publisher.clone(),
        Box::new(LogSink::default()),
    )?);

    if !no_control {
        control::spawn_stdin_control(publisher.clone(), shutdown.clone())
            .context("failed to spawn stdin control thread")?;
    }

    let source = SyntheticSource {
        width: capture.width,
        height: capture.height,
        fps: capture.fps,
        frame_limit: capture.frames,
        ..SyntheticSource::default()
    };
    let capture_pipeline = pipeline.clone();
    let capture_handle = spawn_synthetic_source(source, move |frame| {
        capture_pipeline.on_capture(frame);
    })
    .context("failed to start capture source")?;

    let dispatch = pipeline.dispatch_mode();
    if no_control {
        info!(?dispatch, "Running marker pipeline, press Ctrl+C to stop");
    } else {
        info!(
            ?dispatch,
            "Running marker pipeline, type `start <host:port>`, `stop`, `status` or `quit`"
        );
    }

    while !shutdown.load(Ordering::SeqCst) && !capture_handle.is_finished() {
        thread::sleep(POLL_INTERVAL);
    }

    info!("Stopping marker pipeline");
    capture_handle.stop();
    let delivered = capture_handle.join();

    // The capture callback held the only other reference.
    let pipeline = Arc::try_unwrap(pipeline)
        .map_err(|_| anyhow!("frame pipeline still referenced after capture stopped"))?;
    let stats = pipeline.shutdown();
    publisher.stop();

    info!(
        delivered,
        admitted = stats.admitted,
        dropped = stats.dropped,
        completed = stats.completed,
        discarded = stats.discarded,
        detector_errors = stats.detector_errors,
        capture_errors = stats.capture_errors,
        "marker pipeline stopped"
    );
    if let Some(handle) = telemetry::prometheus_handle() {
        debug!("final metrics:\n{}", handle.render());
    }
    Ok(())
}

/// Start publishing to `target`. A failure only leaves publishing off; frames
/// keep flowing and `start` can be retried from the control prompt.
fn start_publishing(publisher: &Publisher, target: &str) -> bool {
    match publisher.start(target) {
        Ok(_) => true,
        Err(err) => {
            warn!("publishing not started: {:#}", anyhow::Error::from(err));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolvable_publish_target_leaves_publisher_off() {
        let publisher = Publisher::new();
        assert!(!start_publishing(&publisher, "no-such-host.invalid:9000"));
        assert!(!publisher.is_active());
    }

    #[test]
    fn reachable_publish_target_starts_publisher() {
        let receiver = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = receiver.local_addr().unwrap().to_string();
        let publisher = Publisher::new();
        assert!(start_publishing(&publisher, &target));
        assert!(publisher.is_active());
    }
}
