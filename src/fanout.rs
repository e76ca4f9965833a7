use anyhow::{bail, Context, Result};
use std::net::{IpAddr, SocketAddr};
use tokio::net::UdpSocket;

/// One UDP consumer of the relayed byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub addr: SocketAddr,
    pub broadcast: bool,
}

/// Parses a comma-separated `ip:port` list. Entries containing
/// `broadcast_pattern` are flagged for broadcast. An empty list is allowed.
pub fn parse_destinations(
    raw: &str,
    broadcast_pattern: &str,
    max: usize,
) -> Result<Vec<Destination>> {
    let mut destinations = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (ip, port) = entry
            .rsplit_once(':')
            .with_context(|| format!("destination '{entry}' is not ip:port"))?;
        let ip: IpAddr = ip
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse()
            .with_context(|| format!("destination '{entry}' has an invalid IP address"))?;
        let port: u16 = port
            .parse()
            .with_context(|| format!("destination '{entry}' has an invalid port"))?;
        destinations.push(Destination {
            addr: SocketAddr::new(ip, port),
            broadcast: !broadcast_pattern.is_empty() && entry.contains(broadcast_pattern),
        });
    }
    if destinations.len() > max {
        bail!(
            "{} destinations configured, at most {max} are supported",
            destinations.len()
        );
    }
    Ok(destinations)
}

struct Target {
    socket: UdpSocket,
    destination: Destination,
}

/// Fixed set of sockets that every flushed buffer is sent to.
pub struct SocketFanOut {
    targets: Vec<Target>,
}

impl SocketFanOut {
    /// Creates one socket per destination. Any failure aborts the whole set.
    pub async fn configure(destinations: &[Destination]) -> Result<Self> {
        let mut targets = Vec::with_capacity(destinations.len());
        for destination in destinations {
            let bind_addr = match destination.addr {
                SocketAddr::V4(_) => "0.0.0.0:0",
                SocketAddr::V6(_) => "[::]:0",
            };
            let socket = UdpSocket::bind(bind_addr)
                .await
                .with_context(|| format!("failed to create socket for {}", destination.addr))?;
            if destination.broadcast {
                socket.set_broadcast(true).with_context(|| {
                    format!("failed to enable broadcast for {}", destination.addr)
                })?;
            }
            tracing::info!(
                destination = %destination.addr,
                broadcast = destination.broadcast,
                "udp destination configured"
            );
            targets.push(Target {
                socket,
                destination: *destination,
            });
        }
        Ok(Self { targets })
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn destinations(&self) -> impl Iterator<Item = &Destination> {
        self.targets.iter().map(|t| &t.destination)
    }

    /// Sends `payload` to every destination in order and returns how many
    /// sends succeeded. Failures are logged and skipped.
    pub async fn send_all(&self, payload: &[u8]) -> usize {
        let mut delivered = 0;
        for target in &self.targets {
            match target.socket.send_to(payload, target.destination.addr).await {
                Ok(sent) if sent == payload.len() => delivered += 1,
                Ok(sent) => {
                    tracing::warn!(
                        destination = %target.destination.addr,
                        sent,
                        expected = payload.len(),
                        "truncated udp send"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        destination = %target.destination.addr,
                        error = %err,
                        "udp send failed"
                    );
                }
            }
        }
        delivered
    }
}
