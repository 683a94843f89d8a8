use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{ChunkSource, Link};

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM: usize = 65_507;

/// Sends each transfer as one UDP datagram to a fixed peer.
#[derive(Debug)]
pub struct UdpLink {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpLink {
    /// Bind an ephemeral local port and connect it to `addr`.
    pub fn connect(addr: &str) -> Result<Self> {
        let peer = resolve(addr).map_err(|source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        let local: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local).map_err(|source| TransportError::Bind {
            addr: local.to_string(),
            source,
        })?;
        socket
            .connect(peer)
            .map_err(|source| TransportError::Connect {
                addr: addr.to_string(),
                source,
            })?;

        debug!(%peer, "udp link connected");
        Ok(Self { socket, peer })
    }

    /// The remote address transfers are sent to.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Link for UdpLink {
    fn transfer(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > MAX_DATAGRAM {
            return Err(TransportError::TransferTooLarge {
                size: bytes.len(),
                max: MAX_DATAGRAM,
            });
        }

        loop {
            match self.socket.send(bytes) {
                Ok(n) if n == bytes.len() => return Ok(()),
                Ok(n) => {
                    return Err(TransportError::ShortTransfer {
                        written: n,
                        expected: bytes.len(),
                    })
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }
}

/// Receives one message per UDP datagram on a bound socket.
#[derive(Debug)]
pub struct UdpSource {
    socket: UdpSocket,
    buf: Vec<u8>,
    last_sender: Option<SocketAddr>,
}

impl UdpSource {
    /// Bind to `addr` (for example `0.0.0.0:5006`).
    pub fn bind(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr).map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        info!(addr = %socket.local_addr()?, "listening for udp chunks");

        Ok(Self {
            socket,
            buf: vec![0u8; MAX_DATAGRAM],
            last_sender: None,
        })
    }

    /// Make `recv_message` return `Ok(None)` after `timeout` with no datagram.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.socket.set_read_timeout(timeout).map_err(Into::into)
    }

    /// The bound local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(Into::into)
    }

    /// Sender of the most recent datagram.
    pub fn last_sender(&self) -> Option<SocketAddr> {
        self.last_sender
    }
}

impl ChunkSource for UdpSource {
    fn recv_message(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.socket.recv_from(&mut self.buf) {
                Ok((n, from)) => {
                    self.last_sender = Some(from);
                    return Ok(Some(Bytes::copy_from_slice(&self.buf[..n])));
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
                {
                    return Ok(None)
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }
}

/// Resolve a host name, taking an IPv4 result when there is one so that
/// `localhost` reaches receivers bound to `0.0.0.0` or `127.0.0.1`.
fn resolve(addr: &str) -> std::io::Result<SocketAddr> {
    prefer_ipv4(addr.to_socket_addrs()?).ok_or_else(|| {
        std::io::Error::new(
            ErrorKind::AddrNotAvailable,
            format!("no address resolved for {addr}"),
        )
    })
}

fn prefer_ipv4(addrs: impl IntoIterator<Item = SocketAddr>) -> Option<SocketAddr> {
    let mut fallback = None;
    for addr in addrs {
        if addr.is_ipv4() {
            return Some(addr);
        }
        fallback.get_or_insert(addr);
    }
    fallback
}
