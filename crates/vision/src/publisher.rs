//! Outbound datagram channel for marker packets.
//!
//! The channel sits behind a single mutex so that start/stop can run on a
//! control thread while the pipeline's consumer calls [`Publisher::send`].
//! The lock only covers the handle swap and the encode + transmit call.

use std::{
    fmt,
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket},
    str::FromStr,
    sync::{Mutex, MutexGuard, PoisonError},
};

use marker_core::DetectionResult;
use marker_wire::{MarkerPacket, Packet};
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid target address {input:?}: {reason}")]
    InvalidAddress { input: String, reason: &'static str },
    #[error("could not resolve {target}")]
    Resolve {
        target: TargetAddress,
        #[source]
        source: io::Error,
    },
    #[error("failed to open datagram channel to {target}")]
    Open {
        target: TargetAddress,
        #[source]
        source: io::Error,
    },
    #[error("failed to send {bytes}-byte packet to {target}")]
    Transmit {
        target: TargetAddress,
        bytes: usize,
        #[source]
        source: io::Error,
    },
}

/// A `host:port` pair, validated but not yet resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetAddress {
    host: String,
    port: u16,
}

impl TargetAddress {
    /// Split `input` into exactly two `:`-separated parts with a `u16` port.
    ///
    /// IPv6 literals are therefore not accepted; use a hostname instead.
    pub fn parse(input: &str) -> Result<Self, PublishError> {
        let invalid = |reason| PublishError::InvalidAddress {
            input: input.to_owned(),
            reason,
        };
        let parts: Vec<&str> = input.split(':').collect();
        let [host, port] = parts.as_slice() else {
            return Err(invalid("expected exactly one `:` between host and port"));
        };
        if host.is_empty() {
            return Err(invalid("host is empty"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| invalid("port is not an integer in 0..=65535"))?;
        Ok(Self {
            host: (*host).to_owned(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolve to one peer, preferring IPv4: most receivers bind `0.0.0.0`,
    /// and `localhost` often lists `::1` first.
    fn resolve(&self) -> Result<SocketAddr, PublishError> {
        let resolve_err = |source| PublishError::Resolve {
            target: self.clone(),
            source,
        };
        let candidates: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(resolve_err)?
            .collect();
        let peer = pick_peer(&candidates)
            .ok_or_else(|| resolve_err(io::Error::new(io::ErrorKind::NotFound, "no addresses")))?;
        if candidates.len() > 1 {
            debug!(target_host = %self.host, ?candidates, %peer, "resolved several addresses");
        }
        Ok(peer)
    }
}

impl FromStr for TargetAddress {
    type Err = PublishError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

fn pick_peer(candidates: &[SocketAddr]) -> Option<SocketAddr> {
    candidates
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
}

/// Outcome of one [`Publisher::send`]. Failures are already logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sent(usize),
    /// No channel is open; nothing was encoded.
    Inactive,
    Failed,
}

struct DatagramChannel {
    socket: UdpSocket,
    target: TargetAddress,
    peer: SocketAddr,
}

impl DatagramChannel {
    fn open(target: TargetAddress) -> Result<Self, PublishError> {
        let peer = target.resolve()?;
        let local = match peer {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let open_err = |source| PublishError::Open {
            target: target.clone(),
            source,
        };
        let socket = UdpSocket::bind(local).map_err(open_err)?;
        socket.connect(peer).map_err(open_err)?;
        socket.set_nonblocking(true).map_err(open_err)?;
        Ok(Self {
            socket,
            target,
            peer,
        })
    }
}

/// Swappable datagram sender. Safe to share across threads.
#[derive(Default)]
pub struct Publisher {
    channel: Mutex<Option<DatagramChannel>>,
}

impl Publisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a channel to `target`, replacing any channel already open.
    ///
    /// Malformed input fails before any socket is created and leaves the
    /// current channel untouched.
    pub fn start(&self, target: &str) -> Result<SocketAddr, PublishError> {
        let _span = info_span!("publisher.start", addr = target).entered();
        let target = TargetAddress::parse(target)?;
        let channel = DatagramChannel::open(target)?;
        let peer = channel.peer;
        let replaced = self.lock().replace(channel);
        if let Some(old) = replaced {
            debug!(previous = %old.target, "replaced publishing channel");
        }
        info!(%peer, "publishing marker packets");
        Ok(peer)
    }

    /// Close the channel. Returns whether one was open.
    pub fn stop(&self) -> bool {
        let closed = self.lock().take();
        match closed {
            Some(channel) => {
                info!(to = %channel.target, "stopped publishing");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    pub fn target(&self) -> Option<TargetAddress> {
        self.lock().as_ref().map(|channel| channel.target.clone())
    }

    /// Encode and transmit one datagram. Never blocks on the network and
    /// never returns an error: failures are logged and counted.
    pub fn send(&self, packet: &Packet) -> SendStatus {
        let outcome = {
            let guard = self.lock();
            let Some(channel) = guard.as_ref() else {
                return SendStatus::Inactive;
            };
            let bytes = packet.encode();
            channel
                .socket
                .send(&bytes)
                .map_err(|source| PublishError::Transmit {
                    target: channel.target.clone(),
                    bytes: bytes.len(),
                    source,
                })
        };

        match outcome {
            Ok(sent) => {
                metrics::counter!("aruco_packets_sent_total").increment(1);
                SendStatus::Sent(sent)
            }
            Err(err) => {
                metrics::counter!("aruco_packet_send_failures_total").increment(1);
                match &err {
                    PublishError::Transmit { source, .. } => warn!("{err}: {source}"),
                    _ => warn!("{err}"),
                }
                SendStatus::Failed
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<DatagramChannel>> {
        self.channel.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("target", &self.target())
            .finish()
    }
}

/// Build the wire packet for one frame's detections.
pub fn packet_from_detections(
    detections: &DetectionResult,
    time_elapsed: f64,
    timestamp: f64,
) -> Packet {
    let arucos = detections
        .iter()
        .map(|observation| MarkerPacket {
            id: i64::from(observation.id),
            position: observation.position,
            orientation: observation.orientation,
        })
        .collect();
    Packet::new(arucos, time_elapsed, timestamp)
}
