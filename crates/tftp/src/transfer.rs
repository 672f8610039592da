//! Lockstep Transfer Engine
//!
//! The two RFC 1350 state machines, each a bounded retry loop over one
//! message exchange:
//!
//! - [`send_file`] serves a read request: send DATA(n), wait for ACK(n).
//! - [`receive_file`] serves a write request: send ACK(n-1), wait for DATA(n).
//!
//! A reply carrying the previous block number is a stale duplicate and only
//! triggers a resend. Any other block number, or a packet of the wrong type,
//! means the client is out of step and the transfer is aborted.

use std::io;
use std::net::IpAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::protocol::{BlockSizeConfig, Packet, TftpAck, TftpData, TftpError, TftpOpcode};
use crate::store::{FileReader, FileWriter, StoreError};
use crate::transport::{Received, local_addr_or_unknown, packet_buffer, recv_until, send_with_timeout};

const TIMEOUT_SECS: u64 = 5;
const MAX_SEND_TRIES: usize = 3;

/// Transfer session configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// DATA payload size, also the end-of-transfer threshold
    pub block_size: BlockSizeConfig,
    /// How long each attempt waits for a send to complete and for the reply
    pub timeout: Duration,
    /// Total number of times a packet is sent before giving up
    pub max_send_tries: usize,
    /// Local address session sockets bind to (unspecified if `None`)
    pub local_bind: Option<IpAddr>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            block_size: BlockSizeConfig::default(),
            timeout: Duration::from_secs(TIMEOUT_SECS),
            max_send_tries: MAX_SEND_TRIES,
            local_bind: None,
        }
    }
}

/// Why a transfer stopped before completing
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("no response after sending {opcode}#{block} {tries} times")]
    RetriesExhausted { opcode: TftpOpcode, block: u16, tries: usize },

    #[error("out of step: expected {opcode}#{expected}, client sent {opcode}#{received}")]
    UnexpectedBlock {
        opcode: TftpOpcode,
        expected: u16,
        received: u16,
    },

    #[error("DATA#{block} carries {len} bytes, more than the {max}-byte block size")]
    OversizedBlock { block: u16, len: usize, max: usize },

    #[error("expected {expected}, client sent {received}")]
    UnexpectedPacket { expected: TftpOpcode, received: TftpOpcode },

    #[error("client aborted the transfer: {0}")]
    PeerError(TftpError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

impl TransferError {
    /// Error packet to send to the client, if this failure warrants one
    ///
    /// Only store failures are reported: on a protocol failure the client is
    /// either gone or already out of step.
    pub fn to_client_error(&self) -> Option<TftpError> {
        match self {
            Self::Store(e) => Some(TftpError::new(e.error_code(), e.to_string())),
            _ => None,
        }
    }
}

/// What to do with a reply received while waiting for block `expected`
enum Reply {
    Accept,
    Resend,
}

fn classify_block(opcode: TftpOpcode, expected: u16, received: u16) -> Result<Reply, TransferError> {
    if received == expected {
        Ok(Reply::Accept)
    } else if received == expected.wrapping_sub(1) {
        Ok(Reply::Resend)
    } else {
        Err(TransferError::UnexpectedBlock {
            opcode,
            expected,
            received,
        })
    }
}

/// Wait for one decodable reply until `deadline`
///
/// Undecodable datagrams do not consume an attempt; the wait simply goes on
/// until the same deadline.
async fn await_reply(sock: &UdpSocket, buf: &mut [u8], deadline: Instant) -> io::Result<Option<Packet>> {
    loop {
        match recv_until(sock, buf, deadline).await? {
            Received::Packet(packet, _) => return Ok(Some(packet)),
            Received::Noise(..) => continue,
            Received::Timeout => return Ok(None),
        }
    }
}

/// Send one DATA block and wait for its ACK
///
/// Gives up after `max_send_tries` sends without the matching ACK.
pub async fn lockstep_send_data(sock: &UdpSocket, data: &TftpData, config: &TransferConfig) -> Result<(), TransferError> {
    let packet = Packet::Data(data.clone()).to_bytes();
    let mut buf = packet_buffer();
    let local = local_addr_or_unknown(sock);

    for attempt in 1..=config.max_send_tries {
        let n = send_with_timeout(sock, &packet, config.timeout).await?;
        if n == 0 {
            tracing::debug!("[{}] Timed out sending DATA#{} (attempt {})", local, data.block, attempt);
            continue;
        }
        tracing::debug!("[{}] Sent DATA#{} ({}B, attempt {})", local, data.block, data.data.len(), attempt);

        let deadline = Instant::now() + config.timeout;
        match await_reply(sock, &mut buf, deadline).await? {
            None => {
                tracing::debug!("[{}] No ACK#{} (attempt {})", local, data.block, attempt);
            }
            Some(Packet::Ack(ack)) => match classify_block(TftpOpcode::Acknowledgment, data.block, ack.block)? {
                Reply::Accept => {
                    tracing::debug!("[{}] Received ACK#{}", local, ack.block);
                    return Ok(());
                }
                Reply::Resend => {
                    tracing::debug!("[{}] Duplicate ACK#{}, resending DATA#{}", local, ack.block, data.block);
                }
            },
            Some(Packet::Error(error)) => return Err(TransferError::PeerError(error)),
            Some(other @ (Packet::Request(_) | Packet::Data(_))) => {
                return Err(TransferError::UnexpectedPacket {
                    expected: TftpOpcode::Acknowledgment,
                    received: other.opcode(),
                });
            }
        }
    }

    Err(TransferError::RetriesExhausted {
        opcode: TftpOpcode::Data,
        block: data.block,
        tries: config.max_send_tries,
    })
}

/// Acknowledge block `block - 1` and wait for DATA(`block`)
///
/// For block 1 this sends ACK(0), the go-ahead for a write request.
/// Returns the payload of the accepted block.
pub async fn lockstep_receive_data(sock: &UdpSocket, block: u16, config: &TransferConfig) -> Result<Vec<u8>, TransferError> {
    let previous = block.wrapping_sub(1);
    let packet = Packet::Ack(TftpAck::new(previous)).to_bytes();
    let mut buf = packet_buffer();
    let local = local_addr_or_unknown(sock);

    for attempt in 1..=config.max_send_tries {
        let n = send_with_timeout(sock, &packet, config.timeout).await?;
        if n == 0 {
            tracing::debug!("[{}] Timed out sending ACK#{} (attempt {})", local, previous, attempt);
            continue;
        }
        tracing::debug!("[{}] Sent ACK#{} (attempt {})", local, previous, attempt);

        let deadline = Instant::now() + config.timeout;
        match await_reply(sock, &mut buf, deadline).await? {
            None => {
                tracing::debug!("[{}] No DATA#{} (attempt {})", local, block, attempt);
            }
            Some(Packet::Data(data)) => match classify_block(TftpOpcode::Data, block, data.block)? {
                Reply::Accept if data.data.len() > config.block_size.size => {
                    return Err(TransferError::OversizedBlock {
                        block,
                        len: data.data.len(),
                        max: config.block_size.size,
                    });
                }
                Reply::Accept => {
                    tracing::debug!("[{}] Received DATA#{} ({}B)", local, block, data.data.len());
                    return Ok(data.data);
                }
                Reply::Resend => {
                    tracing::debug!("[{}] Duplicate DATA#{}, resending ACK#{}", local, data.block, previous);
                }
            },
            Some(Packet::Error(error)) => return Err(TransferError::PeerError(error)),
            Some(other @ (Packet::Request(_) | Packet::Ack(_))) => {
                return Err(TransferError::UnexpectedPacket {
                    expected: TftpOpcode::Data,
                    received: other.opcode(),
                });
            }
        }
    }

    Err(TransferError::RetriesExhausted {
        opcode: TftpOpcode::Acknowledgment,
        block: previous,
        tries: config.max_send_tries,
    })
}

/// Send a final ACK without waiting for anything in return
pub async fn send_final_ack(sock: &UdpSocket, block: u16, config: &TransferConfig) -> Result<(), TransferError> {
    let n = send_with_timeout(sock, &Packet::Ack(TftpAck::new(block)).to_bytes(), config.timeout).await?;
    if n == 0 {
        tracing::debug!("[{}] Timed out sending final ACK#{}", local_addr_or_unknown(sock), block);
    }
    Ok(())
}

/// Stream a stored file to the client, one acknowledged block at a time
///
/// A file whose size is a multiple of the block size (including an empty
/// file) is terminated by an extra empty DATA block. Returns the number of
/// payload bytes sent.
pub async fn send_file(sock: &UdpSocket, reader: &mut FileReader, config: &TransferConfig) -> Result<usize, TransferError> {
    let block_size = config.block_size;
    let mut block: u16 = 1;
    let mut sent = 0;

    loop {
        let chunk = reader.read_chunk()?.unwrap_or_default();
        let last = block_size.is_last_block(chunk.len());
        sent += chunk.len();

        lockstep_send_data(sock, &TftpData::new(block, chunk), config).await?;

        if last {
            return Ok(sent);
        }
        block = block.wrapping_add(1);
    }
}

/// Receive a file from the client into the store
///
/// The transfer ends with the first DATA block shorter than the block size;
/// its ACK is sent once, without waiting for confirmation. Returns the
/// number of payload bytes stored.
pub async fn receive_file(sock: &UdpSocket, writer: &mut FileWriter, config: &TransferConfig) -> Result<usize, TransferError> {
    let mut block: u16 = 1;
    let mut received = 0;

    loop {
        let payload = lockstep_receive_data(sock, block, config).await?;
        writer.write(&payload)?;
        received += payload.len();

        if config.block_size.is_last_block(payload.len()) {
            send_final_ack(sock, block, config).await?;
            return Ok(received);
        }
        block = block.wrapping_add(1);
    }
}
