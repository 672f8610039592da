//! UDP Transport Helpers
//!
//! Bounded-time send and receive on tokio UDP sockets, plus creation of the
//! shared listening socket and of per-session sockets.
//!
//! A timeout is not an error here: it is reported as "nothing happened"
//! (`Received::Timeout` or zero bytes written) so the transfer engine can
//! decide whether to retry.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout, timeout_at};

use crate::protocol::{DecodeError, MAX_PACKET_SIZE, Packet};

/// Outcome of one bounded receive
#[derive(Debug)]
pub enum Received {
    /// A well-formed packet
    Packet(Packet, SocketAddr),
    /// A datagram arrived but could not be decoded
    Noise(SocketAddr, DecodeError),
    /// Nothing arrived before the deadline
    Timeout,
}

/// Allocate a receive buffer able to detect oversized datagrams
pub fn packet_buffer() -> Vec<u8> {
    // One byte of slack: a datagram filling it is larger than MAX_PACKET_SIZE.
    vec![0u8; MAX_PACKET_SIZE + 1]
}

/// Receive one datagram, waiting at most `wait`
///
/// Works on both connected (session) and unconnected (listening) sockets.
/// Only hard socket errors are returned as `Err`.
pub async fn recv_with_timeout(sock: &UdpSocket, buf: &mut [u8], wait: Duration) -> io::Result<Received> {
    recv_until(sock, buf, Instant::now() + wait).await
}

/// Receive one datagram, waiting until `deadline`
pub async fn recv_until(sock: &UdpSocket, buf: &mut [u8], deadline: Instant) -> io::Result<Received> {
    let (n, peer) = match timeout_at(deadline, sock.recv_from(buf)).await {
        Ok(result) => result?,
        Err(_) => return Ok(Received::Timeout),
    };

    match Packet::from_bytes(&buf[..n]) {
        Ok(packet) => {
            tracing::debug!("[{}] Read {}B from {} ({})", local_addr_or_unknown(sock), n, peer, packet.opcode());
            Ok(Received::Packet(packet, peer))
        }
        Err(e) => {
            tracing::debug!("[{}] Ignored invalid packet from {}: {}", local_addr_or_unknown(sock), peer, e);
            Ok(Received::Noise(peer, e))
        }
    }
}

/// Send `buf` on a connected socket, waiting at most `wait`
///
/// Returns the number of bytes written, or 0 if the send timed out.
pub async fn send_with_timeout(sock: &UdpSocket, buf: &[u8], wait: Duration) -> io::Result<usize> {
    match timeout(wait, sock.send(buf)).await {
        Ok(result) => result,
        Err(_) => Ok(0),
    }
}

/// Send `buf` to `peer` from an unconnected socket, waiting at most `wait`
pub async fn send_to_with_timeout(sock: &UdpSocket, buf: &[u8], peer: SocketAddr, wait: Duration) -> io::Result<usize> {
    match timeout(wait, sock.send_to(buf, peer)).await {
        Ok(result) => result,
        Err(_) => Ok(0),
    }
}

/// Bind the well-known listening socket
pub fn bind_listen_socket(addr: SocketAddr) -> Result<UdpSocket> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).context("Failed to create listening socket")?;

    // Allow a quick restart while old session sockets linger.
    socket
        .set_reuse_address(true)
        .context("Failed to set SO_REUSEADDR on listening socket")?;
    socket
        .set_nonblocking(true)
        .context("Failed to set listening socket to non-blocking mode")?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("Failed to bind listening socket to {}", addr))?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).context("Failed to convert listening socket to Tokio")
}

/// Create a session socket on a fresh ephemeral port, connected to `peer`
///
/// Once connected, the socket only exchanges datagrams with `peer`, keeping
/// this session isolated from the listening socket and from other sessions.
pub async fn create_session_socket(peer: SocketAddr, local_bind: Option<IpAddr>) -> Result<UdpSocket> {
    let local_ip = match (local_bind, peer) {
        (Some(ip), _) if ip.is_ipv4() == peer.is_ipv4() => ip,
        (_, SocketAddr::V4(_)) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        (_, SocketAddr::V6(_)) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    let bind_addr = SocketAddr::new(local_ip, 0);

    let sock = UdpSocket::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind session socket to {}", bind_addr))?;
    sock.connect(peer)
        .await
        .with_context(|| format!("Failed to connect session socket to {}", peer))?;

    tracing::debug!("Session socket {} connected to {}", sock.local_addr()?, peer);
    Ok(sock)
}

pub(crate) fn local_addr_or_unknown(sock: &UdpSocket) -> String {
    sock.local_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unbound".to_string())
}
