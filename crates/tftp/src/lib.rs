//! TFTP (Trivial File Transfer Protocol) Server Library
//!
//! A lockstep RFC 1350 server over UDP that serves files from an in-memory
//! store. It supports:
//! - Read (RRQ) and write (WRQ) requests
//! - Binary (octet) mode only; other modes are rejected
//! - One dedicated socket per transfer, so transfers run concurrently
//! - Retransmission on timeout and on duplicate replies
//! - Files that are never overwritten once stored
//!
//! # Organization
//!
//! - [`Packet`] and friends - the wire format ([`TftpRequest`], [`TftpData`], [`TftpAck`], [`TftpError`])
//! - [`FileStore`] - shared in-memory files with chunked readers and append-only writers
//! - [`lockstep_send_data`], [`lockstep_receive_data`] - one step of the stop-and-wait exchange
//! - [`send_file`], [`receive_file`] - whole transfers over a session socket
//! - [`run_session`] - one request served end to end
//! - [`TftpServer`] - the listening socket and request dispatch
//!
//! # Basic Server Usage
//!
//! ```rust,no_run
//! use tftp::{FileStore, TftpServer, TftpServerConfig, run_tftp_server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Simple usage with the convenience function
//!     run_tftp_server(TftpServerConfig::default(), FileStore::new()).await?;
//!
//!     // Or keep the server around to shut it down later
//!     let config = TftpServerConfig {
//!         bind_address: "127.0.0.1:6969".to_string(),
//!         ..Default::default()
//!     };
//!     let mut server = TftpServer::new(config, FileStore::new());
//!     let state = server.state();
//!     tokio::spawn(async move { server.run().await });
//!     state.shutdown();
//!
//!     Ok(())
//! }
//! ```
//!
//! # Working with Packets
//!
//! ```rust
//! use tftp::{Packet, TftpAck, TftpRequest};
//!
//! let bytes = Packet::Request(TftpRequest::read("boot.img", "octet")).to_bytes();
//! assert_eq!(&bytes[..2], &[0, 1]);
//!
//! let ack = Packet::from_bytes(&[0, 4, 0, 7]).unwrap();
//! assert_eq!(ack, Packet::Ack(TftpAck::new(7)));
//! ```

mod protocol;
mod server;
mod session;
mod store;
mod transfer;
mod transport;

pub use protocol::*;
pub use server::*;
pub use session::*;
pub use store::*;
pub use transfer::*;
pub use transport::*;
