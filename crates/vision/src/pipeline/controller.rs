//! Frame admission, detection dispatch and result consumption.
//!
//! Every submitted frame first tries the [`FrameGate`]. A frame that finds it
//! busy is dropped on the spot; an admitted frame carries the gate's permit
//! through detection and consumption, and the gate reopens only when the
//! permit is dropped at the end of consumption (or when the result is
//! discarded after a stop).

use std::{
    fmt,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::JoinHandle,
    time::Instant,
};

use anyhow::{Context, Result};
use crossbeam_channel::{Sender, TrySendError, bounded};
use frame_ingest::{CaptureError, Frame};
use glam::Mat4;
use marker_core::{CameraIntrinsics, DetectionRequest, DetectionResult, MarkerDetector};
use tracing::{Span, debug, debug_span, error, info, info_span, warn};

use crate::{
    identity::IdentityCache,
    pipeline::{
        config::{DetectorParams, DispatchMode, PipelineConfig},
        frame_stats::{FpsMeter, FrameTelemetry},
        gate::{BusyPermit, FrameGate},
        telemetry::spawn_thread,
    },
    publisher::{Publisher, SendStatus, packet_from_detections},
};

/// What happened to a submitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Another frame was in flight.
    Dropped,
    /// The capture source reported an error instead of a frame.
    Skipped,
    /// The pipeline no longer accepts frames.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineStats {
    pub submitted: u64,
    pub admitted: u64,
    pub dropped: u64,
    pub completed: u64,
    /// Admitted frames whose result arrived after [`FramePipeline::stop`].
    pub discarded: u64,
    pub capture_errors: u64,
    pub detector_errors: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    admitted: AtomicU64,
    dropped: AtomicU64,
    completed: AtomicU64,
    discarded: AtomicU64,
    capture_errors: AtomicU64,
    detector_errors: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            capture_errors: self.capture_errors.load(Ordering::Relaxed),
            detector_errors: self.detector_errors.load(Ordering::Relaxed),
        }
    }
}

/// Everything the render side gets for one completed frame.
pub struct OverlayUpdate<'a> {
    pub frame_number: u64,
    pub timestamp: f64,
    /// This frame's observations, e.g. for drawing corner outlines.
    pub detections: &'a DetectionResult,
    /// Every tracked node after this frame was folded in.
    pub nodes: &'a IdentityCache,
    pub telemetry: FrameTelemetry,
    /// `None` when no packet was built for this frame.
    pub publish: Option<SendStatus>,
}

/// Receives completed frames on the consumer context.
pub trait OverlaySink: Send {
    fn present(&mut self, update: &OverlayUpdate<'_>);
}

impl<F> OverlaySink for F
where
    F: FnMut(&OverlayUpdate<'_>) + Send,
{
    fn present(&mut self, update: &OverlayUpdate<'_>) {
        self(update)
    }
}

/// Sink that ignores every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OverlaySink for NullSink {
    fn present(&mut self, _update: &OverlayUpdate<'_>) {}
}

struct Shared {
    gate: Arc<FrameGate>,
    running: AtomicBool,
    counters: Counters,
    verbose: bool,
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn discard(&self, frame_number: u64) {
        self.counters.discarded.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("aruco_frames_discarded_total").increment(1);
        debug!(frame = frame_number, "discarding result of frame finished after stop");
    }
}

struct FrameTask {
    frame: Frame,
    frame_number: u64,
    permit: BusyPermit,
    span: Span,
}

/// Detector output with the bits of the frame the consumer still needs.
/// The pixel buffer is gone by now.
struct DetectedFrame {
    frame_number: u64,
    timestamp: f64,
    camera_pose: Mat4,
    detections: DetectionResult,
    processing_latency: f64,
    permit: BusyPermit,
    span: Span,
}

struct DetectionStage {
    detector: Arc<dyn MarkerDetector>,
    params: DetectorParams,
    warned_missing_intrinsics: AtomicBool,
}

impl DetectionStage {
    fn new(detector: Arc<dyn MarkerDetector>, params: DetectorParams) -> Self {
        Self {
            detector,
            params,
            warned_missing_intrinsics: AtomicBool::new(false),
        }
    }

    fn run(&self, task: FrameTask, shared: &Shared) -> DetectedFrame {
        let FrameTask {
            frame,
            frame_number,
            permit,
            span,
        } = task;

        let (detections, processing_latency) = {
            let _span = debug_span!(parent: &span, "detection").entered();
            let intrinsics = self.intrinsics_for(&frame);
            let request = DetectionRequest {
                image: frame.view(),
                intrinsics: &intrinsics,
                distortion: self.params.distortion.as_deref(),
                marker_side_m: self.params.marker_side_m,
            };
            let started = Instant::now();
            let result = self.detector.detect(&request);
            let elapsed = started.elapsed().as_secs_f64();
            let detections = match result {
                Ok(detections) => detections,
                Err(err) => {
                    shared.counters.detector_errors.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("aruco_detector_errors_total").increment(1);
                    warn!(frame = frame_number, "detector failed, treating frame as empty: {err}");
                    DetectionResult::empty()
                }
            };
            (detections, elapsed)
        };

        DetectedFrame {
            frame_number,
            timestamp: frame.timestamp,
            camera_pose: frame.camera_pose.unwrap_or(Mat4::IDENTITY),
            detections,
            processing_latency,
            permit,
            span,
        }
    }

    fn intrinsics_for(&self, frame: &Frame) -> CameraIntrinsics {
        frame
            .intrinsics
            .or(self.params.fallback_intrinsics)
            .unwrap_or_else(|| {
                if !self.warned_missing_intrinsics.swap(true, Ordering::Relaxed) {
                    warn!(
                        "frames carry no camera intrinsics and none are configured; \
                         using a zero matrix"
                    );
                }
                CameraIntrinsics::zeroed()
            })
    }
}

struct ConsumerStage {
    cache: IdentityCache,
    fps: FpsMeter,
    publisher: Arc<Publisher>,
    sink: Box<dyn OverlaySink>,
}

impl ConsumerStage {
    fn consume(&mut self, detected: DetectedFrame, shared: &Shared) {
        let DetectedFrame {
            frame_number,
            timestamp,
            camera_pose,
            detections,
            processing_latency,
            permit,
            span,
        } = detected;

        if !shared.is_running() {
            shared.discard(frame_number);
            drop(permit);
            return;
        }

        {
            let _span = debug_span!(parent: &span, "consume", markers = detections.len()).entered();

            let fps = self.fps.sample(timestamp);
            let update = self.cache.reconcile(&detections, camera_pose, timestamp);
            if update.created > 0 || update.expired > 0 {
                debug!(
                    created = update.created,
                    expired = update.expired,
                    tracked = self.cache.len(),
                    "tracked marker set changed"
                );
            }
            metrics::gauge!("aruco_tracked_nodes").set(self.cache.len() as f64);

            let (publish, publish_latency) = if detections.is_empty() || !self.publisher.is_active()
            {
                (None, None)
            } else {
                let started = Instant::now();
                let packet = packet_from_detections(&detections, processing_latency, timestamp);
                let status = self.publisher.send(&packet);
                (Some(status), Some(started.elapsed().as_secs_f64()))
            };

            let telemetry = FrameTelemetry {
                fps,
                processing_latency,
                publish_latency,
            };
            telemetry.record();
            if shared.verbose && !detections.is_empty() {
                debug!(
                    frame = frame_number,
                    ids = ?detections.iter().map(|m| m.id).collect::<Vec<_>>(),
                    "markers detected"
                );
            }

            self.sink.present(&OverlayUpdate {
                frame_number,
                timestamp,
                detections: &detections,
                nodes: &self.cache,
                telemetry,
                publish,
            });
            shared.counters.completed.fetch_add(1, Ordering::Relaxed);
        }

        // Busy → Idle only once the whole frame is done.
        drop(permit);
    }
}

enum Dispatch {
    Inline {
        detection: DetectionStage,
        consumer: Mutex<ConsumerStage>,
    },
    Worker {
        tasks: Option<Sender<FrameTask>>,
        threads: Vec<JoinHandle<()>>,
    },
}

/// Drop-on-busy frame pipeline. Submit frames from the capture callback.
pub struct FramePipeline {
    shared: Arc<Shared>,
    dispatch: Dispatch,
    mode: DispatchMode,
    frame_counter: AtomicU64,
}

impl FramePipeline {
    pub fn new(
        config: &PipelineConfig,
        detector: Arc<dyn MarkerDetector>,
        publisher: Arc<Publisher>,
        sink: Box<dyn OverlaySink>,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            gate: FrameGate::new(),
            running: AtomicBool::new(true),
            counters: Counters::default(),
            verbose: config.verbose,
        });
        let detection = DetectionStage::new(detector, config.detector.clone());
        let consumer = ConsumerStage {
            cache: IdentityCache::new(config.retention),
            fps: FpsMeter::default(),
            publisher,
            sink,
        };

        let dispatch = match config.dispatch {
            DispatchMode::Inline => Dispatch::Inline {
                detection,
                consumer: Mutex::new(consumer),
            },
            DispatchMode::Worker => spawn_workers(detection, consumer, shared.clone())?,
        };

        info!(
            dispatch = ?config.dispatch,
            retention = %config.retention,
            marker_side_m = config.detector.marker_side_m,
            "frame pipeline ready"
        );

        Ok(Self {
            shared,
            dispatch,
            mode: config.dispatch,
            frame_counter: AtomicU64::new(0),
        })
    }

    /// Entry point for a capture callback.
    pub fn on_capture(&self, frame: Result<Frame, CaptureError>) -> Admission {
        match frame {
            Ok(frame) => self.submit(frame),
            Err(err) => {
                self.shared.counters.capture_errors.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("aruco_capture_errors_total").increment(1);
                warn!("skipping frame: {err}");
                Admission::Skipped
            }
        }
    }

    /// Admit `frame` if nothing is in flight, otherwise drop it. Never blocks
    /// in worker mode; in inline mode an admitted frame is fully processed
    /// before this returns.
    pub fn submit(&self, frame: Frame) -> Admission {
        let frame_number = self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let counters = &self.shared.counters;
        counters.submitted.fetch_add(1, Ordering::Relaxed);

        if !self.shared.is_running() {
            return Admission::Stopped;
        }

        let Some(permit) = self.shared.gate.try_acquire() else {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("aruco_frames_dropped_total").increment(1);
            if self.shared.verbose {
                debug!(frame = frame_number, "pipeline busy, dropping frame");
            }
            return Admission::Dropped;
        };
        counters.admitted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("aruco_frames_admitted_total").increment(1);

        let span = info_span!("frame", frame = frame_number, timestamp = frame.timestamp);
        let task = FrameTask {
            frame,
            frame_number,
            permit,
            span,
        };

        match &self.dispatch {
            Dispatch::Inline {
                detection,
                consumer,
            } => {
                let detected = detection.run(task, &self.shared);
                consumer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .consume(detected, &self.shared);
                Admission::Admitted
            }
            Dispatch::Worker { tasks, .. } => {
                let Some(tasks) = tasks else {
                    self.shared.discard(frame_number);
                    return Admission::Stopped;
                };
                match tasks.try_send(task) {
                    Ok(()) => Admission::Admitted,
                    // The gate keeps at most one task alive, so a full slot means
                    // the permit outlived its task.
                    Err(TrySendError::Full(task)) => {
                        error!(
                            frame = task.frame_number,
                            "detection slot occupied while gate was idle"
                        );
                        self.shared.discard(task.frame_number);
                        Admission::Dropped
                    }
                    Err(TrySendError::Disconnected(task)) => {
                        error!("detection worker exited; stopping pipeline");
                        self.shared.running.store(false, Ordering::Release);
                        self.shared.discard(task.frame_number);
                        Admission::Stopped
                    }
                }
            }
        }
    }

    /// Refuse new frames. A frame already in flight finishes detection but its
    /// result is discarded.
    pub fn stop(&self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            info!("frame pipeline stopping");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Whether a frame currently holds the gate.
    pub fn is_busy(&self) -> bool {
        self.shared.gate.is_busy()
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.counters.snapshot()
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        self.mode
    }

    /// Stop, wait for worker threads and return the final counters.
    pub fn shutdown(mut self) -> PipelineStats {
        self.stop();
        self.join_workers();
        self.stats()
    }

    fn join_workers(&mut self) {
        if let Dispatch::Worker { tasks, threads } = &mut self.dispatch {
            // Closing the task channel ends the detection thread, which in
            // turn closes the consumer's channel.
            drop(tasks.take());
            for handle in threads.drain(..) {
                let name = handle.thread().name().unwrap_or("pipeline-worker").to_owned();
                if handle.join().is_err() {
                    error!(thread = %name, "pipeline thread panicked");
                }
            }
        }
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        self.stop();
        self.join_workers();
    }
}

impl fmt::Debug for FramePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramePipeline")
            .field("mode", &self.mode)
            .field("running", &self.is_running())
            .field("busy", &self.is_busy())
            .field("stats", &self.stats())
            .finish()
    }
}

fn spawn_workers(
    detection: DetectionStage,
    mut consumer: ConsumerStage,
    shared: Arc<Shared>,
) -> Result<Dispatch> {
    let (task_tx, task_rx) = bounded::<FrameTask>(1);
    let (done_tx, done_rx) = bounded::<DetectedFrame>(1);

    let consumer_shared = shared.clone();
    let consumer_thread = spawn_thread("marker-consume", move || {
        for detected in done_rx.iter() {
            consumer.consume(detected, &consumer_shared);
        }
        debug!("consumer thread exiting");
    })
    .context("failed to spawn consumer thread")?;

    let detect_thread = spawn_thread("marker-detect", move || {
        for task in task_rx.iter() {
            if !shared.is_running() {
                shared.discard(task.frame_number);
                continue;
            }
            let detected = detection.run(task, &shared);
            if let Err(err) = done_tx.send(detected) {
                shared.discard(err.into_inner().frame_number);
                break;
            }
        }
        debug!("detection thread exiting");
    })
    .context("failed to spawn detection thread")?;

    Ok(Dispatch::Worker {
        tasks: Some(task_tx),
        threads: vec![detect_thread, consumer_thread],
    })
}
