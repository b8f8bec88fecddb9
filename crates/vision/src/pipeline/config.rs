//! Configuration parsing for the frame pipeline.
//!
//! CLI flags are translated once into a [`PipelineConfig`] which the
//! pipeline, publisher and telemetry setup use without re-parsing.

use std::{net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use marker_core::{CameraIntrinsics, DEFAULT_MARKER_SIDE_M};

use crate::{identity::RetentionPolicy, publisher::TargetAddress};

/// Where detection runs. The drop-on-busy gate applies in both modes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum DispatchMode {
    /// Detect and consume on the thread that submits the frame.
    Inline,
    /// Detect on a worker thread and hand results to a consumer thread.
    #[default]
    Worker,
}

/// Inputs passed to the detector alongside every frame.
#[derive(Clone, Debug)]
pub struct DetectorParams {
    /// Physical marker side length in meters.
    pub marker_side_m: f64,
    /// Used when a frame carries no intrinsics of its own.
    pub fallback_intrinsics: Option<CameraIntrinsics>,
    pub distortion: Option<Vec<f64>>,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            marker_side_m: DEFAULT_MARKER_SIDE_M,
            fallback_intrinsics: None,
            distortion: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
/// Canonical configuration shared by every stage in the pipeline.
pub struct PipelineConfig {
    pub dispatch: DispatchMode,
    pub detector: DetectorParams,
    pub retention: RetentionPolicy,
    /// Start publishing to this `host:port` as soon as the pipeline runs.
    pub publish_target: Option<String>,
    /// Emit debug logging (frame drops, per-frame detections).
    pub verbose: bool,
    pub telemetry: TelemetryOptions,
}

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs for tracing and metrics export.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing pipeline spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Serve Prometheus metrics over HTTP on this address.
    pub metrics_listen: Option<SocketAddr>,
}

/// Pipeline flags shared by every subcommand that runs frames.
#[derive(Debug, Args)]
pub struct PipelineCliArgs {
    /// Execution context for detection.
    #[arg(long = "dispatch", value_enum, default_value_t = DispatchMode::Worker)]
    pub dispatch: DispatchMode,
    /// Physical marker side length in meters.
    #[arg(long = "marker-size", value_name = "METERS", default_value_t = DEFAULT_MARKER_SIDE_M)]
    pub marker_size: f64,
    /// Fallback camera matrix, nine comma-separated row-major values.
    #[arg(long = "intrinsics", value_name = "FX,0,CX,0,FY,CY,0,0,1")]
    pub intrinsics: Option<CameraIntrinsics>,
    /// Lens distortion coefficients.
    #[arg(
        long = "distortion",
        value_name = "K1,K2,P1,P2[,K3..]",
        value_delimiter = ',',
        allow_negative_numbers = true
    )]
    pub distortion: Vec<f64>,
    /// Removal policy for markers that leave the view: `keep` or `expire:<secs>`.
    #[arg(long = "retention", value_name = "POLICY", default_value = "keep")]
    pub retention: RetentionPolicy,
    /// Publish detections to this UDP target from the start.
    #[arg(long = "publish", value_name = "HOST:PORT")]
    pub publish: Option<String>,
    /// Enable verbose logging (frame drops, detections).
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
    /// Serve Prometheus metrics on this address.
    #[arg(long = "metrics-listen", value_name = "ADDR")]
    pub metrics_listen: Option<SocketAddr>,
}

/// Coefficient counts accepted by pinhole distortion models.
const DISTORTION_LENGTHS: [usize; 5] = [4, 5, 8, 12, 14];

impl TryFrom<PipelineCliArgs> for PipelineConfig {
    type Error = anyhow::Error;

    fn try_from(args: PipelineCliArgs) -> Result<Self> {
        if !(args.marker_size.is_finite() && args.marker_size > 0.0) {
            bail!("--marker-size must be a positive length in meters");
        }

        if let Some(intrinsics) = args.intrinsics.as_ref() {
            if intrinsics.fx() <= 0.0 || intrinsics.fy() <= 0.0 {
                bail!("--intrinsics must have positive focal lengths, got {intrinsics}");
            }
        }

        let distortion = match args.distortion.len() {
            0 => None,
            n if DISTORTION_LENGTHS.contains(&n) => Some(args.distortion),
            n => bail!("--distortion takes 4, 5, 8, 12 or 14 coefficients, got {n}"),
        };

        if let Some(target) = args.publish.as_deref() {
            TargetAddress::parse(target).context("invalid --publish target")?;
        }

        Ok(Self {
            dispatch: args.dispatch,
            detector: DetectorParams {
                marker_side_m: args.marker_size,
                fallback_intrinsics: args.intrinsics,
                distortion,
            },
            retention: args.retention,
            publish_target: args.publish,
            verbose: args.verbose,
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace,
                metrics_listen: args.metrics_listen,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct Harness {
        #[command(flatten)]
        pipeline: PipelineCliArgs,
    }

    fn parse(args: &[&str]) -> Result<PipelineConfig> {
        let harness = Harness::try_parse_from(std::iter::once("test").chain(args.iter().copied()))?;
        PipelineConfig::try_from(harness.pipeline)
    }

    #[test]
    fn defaults_match_reference_setup() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.dispatch, DispatchMode::Worker);
        assert_eq!(config.detector.marker_side_m, 0.133);
        assert!(config.detector.fallback_intrinsics.is_none());
        assert!(config.detector.distortion.is_none());
        assert_eq!(config.retention, RetentionPolicy::KeepForever);
        assert!(config.publish_target.is_none());
    }

    #[test]
    fn parses_full_flag_set() {
        let config = parse(&[
            "--dispatch",
            "inline",
            "--marker-size",
            "0.05",
            "--intrinsics",
            "800,0,320,0,800,240,0,0,1",
            "--distortion",
            "0.1,-0.2,0,0,0.01",
            "--retention",
            "expire:2",
            "--publish",
            "127.0.0.1:9000",
            "--metrics-listen",
            "127.0.0.1:9100",
        ])
        .unwrap();
        assert_eq!(config.dispatch, DispatchMode::Inline);
        assert_eq!(config.detector.marker_side_m, 0.05);
        assert_eq!(config.detector.fallback_intrinsics.unwrap().cx(), 320.0);
        assert_eq!(config.detector.distortion.as_deref(), Some(&[0.1, -0.2, 0.0, 0.0, 0.01][..]));
        assert_eq!(config.retention, RetentionPolicy::ExpireAfter(2.0));
        assert_eq!(config.publish_target.as_deref(), Some("127.0.0.1:9000"));
        assert!(config.telemetry.metrics_listen.is_some());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse(&["--marker-size", "0"]).is_err());
        assert!(parse(&["--distortion", "0.1,0.2,0.3"]).is_err());
        assert!(parse(&["--intrinsics", "1,2,3"]).is_err());
        assert!(parse(&["--intrinsics", "0,0,320,0,0,240,0,0,1"]).is_err());
        assert!(parse(&["--publish", "bad-address"]).is_err());
        assert!(parse(&["--retention", "sometimes"]).is_err());
    }
}
