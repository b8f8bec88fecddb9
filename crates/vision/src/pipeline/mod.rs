//! Drop-on-busy frame pipeline: admission gate, detection dispatch, consumption.

pub mod config;
pub mod controller;
pub mod frame_stats;
pub mod gate;
pub mod telemetry;

pub use config::{DetectorParams, DispatchMode, PipelineCliArgs, PipelineConfig, TelemetryOptions};
pub use controller::{Admission, FramePipeline, NullSink, OverlaySink, OverlayUpdate, PipelineStats};
pub use frame_stats::{FpsMeter, FrameTelemetry, instantaneous_fps};
pub use gate::{BusyPermit, FrameGate};
