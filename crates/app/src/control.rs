//! Runtime controls: stdin commands toggling the publisher, and Ctrl+C.

use std::{
    io::{self, BufRead},
    sync::{
        Arc, Once, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
};

use tracing::{info, warn};
use vision::{Publisher, telemetry::spawn_thread};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Start(String),
    Stop,
    Status,
    Quit,
}

impl ControlCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let command = match (words.next(), words.next()) {
            (Some("start"), Some(target)) => ControlCommand::Start(target.to_owned()),
            (Some("start"), None) => return Err("usage: start <host:port>".into()),
            (Some("stop"), None) => ControlCommand::Stop,
            (Some("status"), None) => ControlCommand::Status,
            (Some("quit" | "exit"), None) => ControlCommand::Quit,
            _ => {
                return Err(format!(
                    "unknown command {:?}; try start/stop/status/quit",
                    line.trim()
                ));
            }
        };
        if words.next().is_some() {
            return Err(format!("unexpected arguments in {:?}", line.trim()));
        }
        Ok(command)
    }
}

/// Apply one command. Returns `false` when the session should end.
pub fn apply(command: ControlCommand, publisher: &Publisher) -> bool {
    match command {
        ControlCommand::Start(target) => {
            if let Err(err) = publisher.start(&target) {
                warn!("could not start publishing: {err}");
            }
        }
        ControlCommand::Stop => {
            if !publisher.stop() {
                info!("publisher already stopped");
            }
        }
        ControlCommand::Status => match publisher.target() {
            Some(target) => info!(%target, "publishing"),
            None => info!("not publishing"),
        },
        ControlCommand::Quit => return false,
    }
    true
}

/// Read commands from stdin on a background thread until `quit` or EOF.
pub fn spawn_stdin_control(
    publisher: Arc<Publisher>,
    shutdown: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    spawn_thread("stdin-control", move || {
        for line in io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!("stdin control closed: {err}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match ControlCommand::parse(&line) {
                Ok(command) => {
                    if !apply(command, &publisher) {
                        shutdown.store(true, Ordering::SeqCst);
                        break;
                    }
                }
                Err(message) => warn!("{message}"),
            }
        }
    })
}

/// Flag set by Ctrl+C. The handler is installed once per process.
pub fn shutdown_flag() -> Arc<AtomicBool> {
    static CTRL_HANDLER: Once = Once::new();
    static SHUTDOWN: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let shutdown = SHUTDOWN
        .get_or_init(|| Arc::new(AtomicBool::new(false)))
        .clone();
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            handler_shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });
    shutdown
}

#[cfg(test)]
mod tests {
    use std::{net::UdpSocket, sync::Arc};

    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(
            ControlCommand::parse("start 127.0.0.1:9000"),
            Ok(ControlCommand::Start("127.0.0.1:9000".into()))
        );
        assert_eq!(ControlCommand::parse("  stop "), Ok(ControlCommand::Stop));
        assert_eq!(ControlCommand::parse("quit"), Ok(ControlCommand::Quit));
        assert!(ControlCommand::parse("start").is_err());
        assert!(ControlCommand::parse("stop now").is_err());
        assert!(ControlCommand::parse("jump").is_err());
    }

    #[test]
    fn commands_toggle_the_publisher() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = receiver.local_addr().unwrap().to_string();
        let publisher = Arc::new(Publisher::new());

        assert!(apply(ControlCommand::Start("bad-address".into()), &publisher));
        assert!(!publisher.is_active());

        assert!(apply(ControlCommand::Start(addr), &publisher));
        assert!(publisher.is_active());
        assert!(apply(ControlCommand::Status, &publisher));

        assert!(apply(ControlCommand::Stop, &publisher));
        assert!(!publisher.is_active());
        assert!(!apply(ControlCommand::Quit, &publisher));
    }
}
