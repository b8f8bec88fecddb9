//! Paced frame generator standing in for a camera device.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::anyhow;
use marker_core::CameraIntrinsics;
use tracing::debug;

use crate::types::{CaptureError, Frame, FrameFormat, monotonic_seconds};

/// Settings for [`spawn_synthetic_source`].
#[derive(Clone, Debug)]
pub struct SyntheticSource {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub format: FrameFormat,
    /// Stop on its own after this many frames.
    pub frame_limit: Option<u64>,
    /// Calibration attached to every frame.
    pub intrinsics: Option<CameraIntrinsics>,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30.0,
            format: FrameFormat::Bgr8,
            frame_limit: None,
            intrinsics: None,
        }
    }
}

/// Running capture thread. Dropping the handle stops and joins it.
pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<u64>>,
}

impl CaptureHandle {
    /// Ask the source to stop after the frame it is currently delivering.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .is_none_or(|handle| handle.is_finished())
    }

    /// Wait for the capture thread and return how many frames it delivered.
    pub fn join(mut self) -> u64 {
        self.join_inner()
    }

    fn join_inner(&mut self) -> u64 {
        self.thread
            .take()
            .map(|handle| handle.join().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
        self.join_inner();
    }
}

/// Spawn a thread that produces blank frames at `source.fps` and passes each
/// one to `on_frame` on that thread.
///
/// The callback runs synchronously: a slow callback delays the next frame
/// rather than queueing frames up.
pub fn spawn_synthetic_source<F>(
    source: SyntheticSource,
    mut on_frame: F,
) -> Result<CaptureHandle, CaptureError>
where
    F: FnMut(Result<Frame, CaptureError>) + Send + 'static,
{
    if source.width == 0 || source.height == 0 {
        return Err(anyhow!(
            "frame size must be non-zero, got {}x{}",
            source.width,
            source.height
        )
        .into());
    }
    if !(source.fps.is_finite() && source.fps > 0.0) {
        return Err(anyhow!("frame rate must be positive, got {}", source.fps).into());
    }
    let frame_len = (source.width as usize)
        .checked_mul(source.height as usize)
        .and_then(|pixels| pixels.checked_mul(source.format.bytes_per_pixel()))
        .ok_or_else(|| {
            CaptureError::Acquisition(format!(
                "{}x{} frame does not fit in memory",
                source.width, source.height
            ))
        })?;

    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = stop.clone();
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    let period = Duration::from_secs_f64(1.0 / source.fps);

    let thread = thread::Builder::new()
        .name("capture-synthetic".into())
        .spawn(move || {
            tracing::dispatcher::with_default(&dispatch, || {
                let started = Instant::now();
                let mut delivered: u64 = 0;
                while !thread_stop.load(Ordering::Acquire) {
                    if source.frame_limit.is_some_and(|limit| delivered >= limit) {
                        break;
                    }
                    let deadline = started + period.mul_f64(delivered as f64);
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    }
                    if thread_stop.load(Ordering::Acquire) {
                        break;
                    }

                    let mut frame = Frame::new(
                        vec![(delivered % 256) as u8; frame_len],
                        source.width,
                        source.height,
                        source.format,
                        monotonic_seconds(),
                    );
                    frame.intrinsics = source.intrinsics;
                    on_frame(Ok(frame));
                    delivered += 1;
                }
                debug!(delivered, "synthetic capture stopped");
                delivered
            })
        })
        .map_err(|err| CaptureError::Other(err.into()))?;

    Ok(CaptureHandle {
        stop,
        thread: Some(thread),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn delivers_limited_frames_with_increasing_timestamps() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let source = SyntheticSource {
            width: 4,
            height: 2,
            fps: 500.0,
            frame_limit: Some(5),
            intrinsics: Some(CameraIntrinsics::new(1.0, 1.0, 2.0, 1.0)),
            ..SyntheticSource::default()
        };
        let handle = spawn_synthetic_source(source, move |frame| {
            let _ = tx.send(frame);
        })
        .unwrap();
        assert_eq!(handle.join(), 5);

        let frames: Vec<Frame> = rx.try_iter().map(|f| f.unwrap()).collect();
        assert_eq!(frames.len(), 5);
        assert!(frames.windows(2).all(|w| w[1].timestamp > w[0].timestamp));
        assert!(frames.iter().all(|f| f.data.len() == 4 * 2 * 3));
        assert!(frames.iter().all(|f| f.intrinsics.is_some()));
        assert_eq!(frames[0].view().stride, 12);
    }

    #[test]
    fn stop_ends_an_unbounded_source() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = spawn_synthetic_source(
            SyntheticSource {
                width: 2,
                height: 2,
                fps: 1000.0,
                ..SyntheticSource::default()
            },
            move |frame| {
                let _ = tx.send(frame);
            },
        )
        .unwrap();

        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(2))
                .expect("frame before timeout")
                .unwrap();
        }
        handle.stop();
        assert!(handle.join() >= 3);
    }

    #[test]
    fn rejects_degenerate_settings() {
        let zero = SyntheticSource {
            width: 0,
            ..SyntheticSource::default()
        };
        assert!(spawn_synthetic_source(zero, |_| {}).is_err());

        let still = SyntheticSource {
            fps: 0.0,
            ..SyntheticSource::default()
        };
        assert!(spawn_synthetic_source(still, |_| {}).is_err());
    }
}
