use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use vision::PipelineCliArgs;

#[derive(Debug, Parser)]
#[command(name = "aruco-publisher", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Capture frames, detect markers and optionally publish them over UDP.
    Run(RunArgs),
    /// Receive marker packets and print them as JSON lines.
    Listen(ListenArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub pipeline: PipelineCliArgs,
    #[command(flatten)]
    pub capture: CaptureArgs,
    /// JSON Lines file with one array of observations per frame, replayed in a loop.
    #[arg(long = "detections", value_name = "PATH")]
    pub detections: Option<PathBuf>,
    /// Do not read `start`/`stop`/`quit` commands from stdin.
    #[arg(long = "no-control", action = clap::ArgAction::SetTrue)]
    pub no_control: bool,
}

/// Settings for the synthetic capture source.
#[derive(Debug, Args)]
pub struct CaptureArgs {
    /// Capture width in pixels.
    #[arg(long = "width", value_name = "PX", default_value_t = 640)]
    pub width: u32,
    /// Capture height in pixels.
    #[arg(long = "height", value_name = "PX", default_value_t = 480)]
    pub height: u32,
    /// Capture rate in frames per second.
    #[arg(long = "fps", value_name = "HZ", default_value_t = 30.0)]
    pub fps: f64,
    /// Stop after this many frames.
    #[arg(long = "frames", value_name = "N")]
    pub frames: Option<u64>,
}

#[derive(Debug, Args)]
pub struct ListenArgs {
    /// Local address to receive datagrams on.
    #[arg(value_name = "BIND_ADDR", default_value = "0.0.0.0:9000")]
    pub bind: SocketAddr,
    /// Exit after printing this many packets.
    #[arg(long = "count", value_name = "N")]
    pub count: Option<u64>,
    /// Pretty-print each packet.
    #[arg(long = "pretty", action = clap::ArgAction::SetTrue)]
    pub pretty: bool,
    /// Enable verbose logging.
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use vision::{DispatchMode, PipelineConfig};

    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_reach_pipeline_config() {
        let cli = Cli::try_parse_from([
            "aruco-publisher",
            "run",
            "--dispatch",
            "inline",
            "--publish",
            "127.0.0.1:9000",
            "--fps",
            "60",
            "--frames",
            "10",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.capture.fps, 60.0);
        assert_eq!(args.capture.frames, Some(10));
        let config = PipelineConfig::try_from(args.pipeline).unwrap();
        assert_eq!(config.dispatch, DispatchMode::Inline);
        assert_eq!(config.publish_target.as_deref(), Some("127.0.0.1:9000"));
    }

    #[test]
    fn listen_defaults() {
        let cli = Cli::try_parse_from(["aruco-publisher", "listen"]).unwrap();
        let Command::Listen(args) = cli.command else {
            panic!("expected listen");
        };
        assert_eq!(args.bind.port(), 9000);
        assert!(args.count.is_none());
    }
}
