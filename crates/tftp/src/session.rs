//! Per-request Sessions
//!
//! A session serves one validated request from start to finish on its own
//! socket. It never shares that socket or any per-transfer state; the only
//! thing it shares with other sessions is the [`FileStore`].

use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::protocol::{Packet, RequestKind, TftpError, TftpRequest};
use crate::server::log_request;
use crate::store::FileStore;
use crate::transfer::{TransferConfig, TransferError, receive_file, send_file};
use crate::transport::{create_session_socket, local_addr_or_unknown, send_with_timeout};

/// Serve one request to completion
///
/// Every failure is handled here: store failures are reported to the client
/// as an ERROR packet, everything else is only logged. The session socket is
/// closed when this returns.
pub async fn run_session(request: TftpRequest, peer: SocketAddr, store: FileStore, config: TransferConfig) {
    let sock = match create_session_socket(peer, config.local_bind).await {
        Ok(sock) => sock,
        Err(e) => {
            tracing::error!("Could not create socket for session with {}: {:#}", peer, e);
            return;
        }
    };
    let local = local_addr_or_unknown(&sock);

    log_request(peer, &request, &format!("Processing request {}<-->{}", local, peer));

    let result = match request.kind {
        RequestKind::Read => handle_read_request(&sock, &request, &store, &config).await,
        RequestKind::Write => handle_write_request(&sock, &request, &store, &config).await,
    };

    match result {
        Ok(bytes) => {
            let direction = match request.kind {
                RequestKind::Read => "Sent",
                RequestKind::Write => "Received",
            };
            tracing::info!("[{}] Done: {} {} ({} bytes) with {}", local, direction, request.filename, bytes, peer);
        }
        Err(e) => {
            // Sent from the session socket on purpose; only mode rejections use the listening socket.
            if let Some(error) = e.to_client_error() {
                send_error(&sock, error, &config).await;
            }
            tracing::warn!("[{}] Session with {} aborted: {}", local, peer, e);
        }
    }

    drop(sock);
    tracing::debug!("[{}] closed", local);
}

/// Serve a read request: stream the stored file to the client
async fn handle_read_request(
    sock: &UdpSocket,
    request: &TftpRequest,
    store: &FileStore,
    config: &TransferConfig,
) -> Result<usize, TransferError> {
    let mut reader = store.open_read(&request.filename, config.block_size.size)?;
    send_file(sock, &mut reader, config).await
}

/// Serve a write request: store the client's file under a new name
async fn handle_write_request(
    sock: &UdpSocket,
    request: &TftpRequest,
    store: &FileStore,
    config: &TransferConfig,
) -> Result<usize, TransferError> {
    let mut writer = store.open_write(&request.filename)?;
    receive_file(sock, &mut writer, config).await
}

/// Best-effort ERROR packet; no reply is expected
async fn send_error(sock: &UdpSocket, error: TftpError, config: &TransferConfig) {
    let bytes = Packet::from(error).to_bytes();
    match send_with_timeout(sock, &bytes, config.timeout).await {
        Ok(0) => tracing::debug!("[{}] Timed out sending ERROR", local_addr_or_unknown(sock)),
        Ok(_) => {}
        Err(e) => tracing::debug!("[{}] Could not send ERROR: {}", local_addr_or_unknown(sock), e),
    }
}
