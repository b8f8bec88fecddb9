//! Marker pipeline core: frame admission, stable marker identities and
//! packet publishing.

pub mod identity;
pub mod pipeline;
pub mod publisher;

pub use identity::{CacheUpdate, IdentityCache, NodeHandle, RetentionPolicy, TrackedNode};
pub use pipeline::{
    Admission, DetectorParams, DispatchMode, FramePipeline, FrameTelemetry, NullSink,
    OverlaySink, OverlayUpdate, PipelineCliArgs, PipelineConfig, PipelineStats, TelemetryOptions,
    telemetry,
};
pub use publisher::{PublishError, Publisher, SendStatus, TargetAddress, packet_from_detections};
