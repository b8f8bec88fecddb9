//! Consumer side of the wire protocol: decode datagrams and print them.

use std::{
    io::{self, Write},
    net::{SocketAddr, UdpSocket},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use anyhow::{Context, Result};
use marker_wire::Packet;
use serde::Serialize;
use tracing::{info, warn};
use vision::{TelemetryOptions, telemetry};

use crate::{cli::ListenArgs, control};

/// Largest UDP payload.
const MAX_DATAGRAM: usize = 65_507;
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Serialize)]
struct ReceivedPacket<'a> {
    from: SocketAddr,
    bytes: usize,
    #[serde(flatten)]
    packet: &'a Packet,
}

pub fn run(args: ListenArgs) -> Result<()> {
    let _telemetry_guard = telemetry::enter_runtime(&TelemetryOptions::default(), args.verbose);
    let shutdown = control::shutdown_flag();

    let socket = UdpSocket::bind(args.bind)
        .with_context(|| format!("failed to bind UDP listener on {}", args.bind))?;
    socket
        .set_read_timeout(Some(POLL_INTERVAL))
        .context("failed to configure listener timeout")?;
    info!(addr = %socket.local_addr()?, "listening for marker packets");

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let printed = receive_packets(&socket, &mut out, args.count, args.pretty, &shutdown)?;
    info!(printed, "listener stopped");
    Ok(())
}

/// Print decoded packets as JSON lines until `limit` is reached or `shutdown` is set.
/// Malformed datagrams are logged and skipped.
fn receive_packets(
    socket: &UdpSocket,
    out: &mut impl Write,
    limit: Option<u64>,
    pretty: bool,
    shutdown: &AtomicBool,
) -> Result<u64> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut printed = 0;
    while !shutdown.load(Ordering::SeqCst) && limit.is_none_or(|limit| printed < limit) {
        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(err) => return Err(err).context("failed to receive datagram"),
        };

        let packet = match Packet::decode(&buf[..len]) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(%from, len, "skipping malformed datagram: {err}");
                continue;
            }
        };
        let record = ReceivedPacket {
            from,
            bytes: len,
            packet: &packet,
        };
        if pretty {
            serde_json::to_writer_pretty(&mut *out, &record)?;
        } else {
            serde_json::to_writer(&mut *out, &record)?;
        }
        writeln!(out)?;
        out.flush()?;
        printed += 1;
    }
    Ok(printed)
}

#[cfg(test)]
mod tests {
    use marker_wire::MarkerPacket;

    use super::*;

    #[test]
    fn prints_valid_packets_and_skips_garbage() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        listener
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.connect(listener.local_addr().unwrap()).unwrap();

        sender.send(&[1, 2, 3]).unwrap();
        let packet = Packet::new(
            vec![MarkerPacket {
                id: 7,
                position: [0.1, 0.2, 0.3],
                orientation: [0.0; 3],
            }],
            0.002,
            1000.5,
        );
        sender.send(&packet.encode()).unwrap();

        let mut out = Vec::new();
        let shutdown = AtomicBool::new(false);
        let printed = receive_packets(&listener, &mut out, Some(1), false, &shutdown).unwrap();
        assert_eq!(printed, 1);

        let line = String::from_utf8(out).unwrap();
        let json: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(json["bytes"], 56);
        assert_eq!(json["arucos"][0]["id"], 7);
        assert_eq!(json["timestamp"], 1000.5);
    }

    #[test]
    fn stops_when_shutdown_is_set() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        listener
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();
        let shutdown = AtomicBool::new(true);
        let mut out = Vec::new();
        assert_eq!(receive_packets(&listener, &mut out, None, false, &shutdown).unwrap(), 0);
        assert!(out.is_empty());
    }
}
