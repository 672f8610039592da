//! TFTP Server Implementation
//!
//! This module owns the well-known listening socket. It accepts requests,
//! rejects the ones it cannot serve, and spawns one session task per valid
//! request. It also holds the state shared with the administrative side:
//! the running flag, the request counter and the file store.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

use crate::protocol::{Packet, TftpError, TftpErrorCode, TftpRequest};
use crate::session::run_session;
use crate::store::FileStore;
use crate::transfer::TransferConfig;
use crate::transport::{Received, bind_listen_socket, packet_buffer, recv_with_timeout, send_to_with_timeout};

/// Tracing target of the request log
pub const REQUEST_LOG_TARGET: &str = "tftp::requests";

/// Record one incoming request and what was done with it
pub fn log_request(peer: SocketAddr, request: &TftpRequest, status: &str) {
    tracing::info!(target: REQUEST_LOG_TARGET, %peer, %request, status, "Request");
}

/// TFTP Server configuration
#[derive(Debug, Clone)]
pub struct TftpServerConfig {
    pub bind_address: String,
    /// How often the accept loop wakes up to check for shutdown
    pub poll_interval: Duration,
    pub transfer_config: TransferConfig,
}

impl Default for TftpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:69".to_string(),
            poll_interval: Duration::from_secs(5),
            transfer_config: TransferConfig::default(),
        }
    }
}

/// State shared between the accept loop, its sessions and the admin interface
#[derive(Debug, Default)]
pub struct ServerState {
    running: AtomicBool,
    received_request_count: AtomicU64,
    store: FileStore,
}

impl ServerState {
    pub fn new(store: FileStore) -> Self {
        Self {
            store,
            ..Default::default()
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the accept loop to stop at its next cycle
    ///
    /// Running sessions are not interrupted.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Number of request packets received on the listening socket
    pub fn received_request_count(&self) -> u64 {
        self.received_request_count.load(Ordering::Relaxed)
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }
}

/// Main TFTP server
pub struct TftpServer {
    config: TftpServerConfig,
    state: Arc<ServerState>,
    socket: Option<UdpSocket>,
}

impl TftpServer {
    /// Create a new TFTP server serving files from `store`
    pub fn new(config: TftpServerConfig, store: FileStore) -> Self {
        Self {
            config,
            state: Arc::new(ServerState::new(store)),
            socket: None,
        }
    }

    /// Create a new TFTP server with default configuration and an empty store
    pub fn with_defaults() -> Self {
        Self::new(TftpServerConfig::default(), FileStore::new())
    }

    /// Get the server's configuration
    pub fn config(&self) -> &TftpServerConfig {
        &self.config
    }

    /// Handle on the shared state, for status reporting and shutdown
    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Get the local address the server is bound to (if bound)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Bind the listening socket and mark the server as running
    ///
    /// # Panics
    /// If the server is already running.
    pub fn bind(&mut self) -> Result<SocketAddr> {
        assert!(!self.state.is_running(), "TFTP server bound while already running");

        let addr: SocketAddr = self
            .config
            .bind_address
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.config.bind_address))?;
        let socket = bind_listen_socket(addr)?;
        let local_addr = socket.local_addr().context("Failed to get local address")?;

        self.socket = Some(socket);
        self.state.running.store(true, Ordering::SeqCst);
        Ok(local_addr)
    }

    /// Bind (unless already bound) and run the accept loop until shutdown
    pub async fn run(&mut self) -> Result<()> {
        if self.socket.is_none() {
            self.bind()?;
        }
        self.serve().await
    }

    /// Main server loop
    ///
    /// Returns `Ok` after a shutdown request and `Err` if the listening
    /// socket fails.
    async fn serve(&self) -> Result<()> {
        let socket = self.socket.as_ref().context("Server must be bound before serving")?;
        let local_addr = socket.local_addr().context("Failed to get local address")?;
        let mut buffer = packet_buffer();

        tracing::info!("[{}] Ready to accept clients", local_addr);

        while self.state.is_running() {
            match recv_with_timeout(socket, &mut buffer, self.config.poll_interval).await {
                Ok(Received::Packet(packet, client_addr)) => self.dispatch(socket, packet, client_addr).await,
                Ok(Received::Noise(..) | Received::Timeout) => {}
                Err(e) => {
                    self.state.shutdown();
                    tracing::error!("[{}] Listening socket failed: {}", local_addr, e);
                    return Err(e).with_context(|| format!("Listening socket {} failed", local_addr));
                }
            }
        }

        tracing::info!("[{}] TFTP server shutting down", local_addr);
        Ok(())
    }

    /// Route one packet received on the listening socket
    async fn dispatch(&self, socket: &UdpSocket, packet: Packet, client: SocketAddr) {
        match packet {
            Packet::Request(request) => self.handle_request_packet(socket, request, client).await,
            Packet::Data(_) | Packet::Ack(_) | Packet::Error(_) => {
                // Only requests belong on the listening socket.
                tracing::debug!("Ignored: received {} on listening socket from {}", packet, client);
            }
        }
    }

    /// Validate a request and hand it to a new session
    async fn handle_request_packet(&self, socket: &UdpSocket, request: TftpRequest, client: SocketAddr) {
        self.state.received_request_count.fetch_add(1, Ordering::Relaxed);

        let supported = request.transfer_mode().is_some_and(|mode| mode.is_supported());
        if !supported {
            // Immediate rejections come from the address the client wrote to.
            let error = TftpError::new(TftpErrorCode::IllegalOperation, "Mode not supported");
            let bytes = Packet::from(error).to_bytes();
            if let Err(e) = send_to_with_timeout(socket, &bytes, client, self.config.transfer_config.timeout).await {
                tracing::warn!("Failed to send ERROR to {}: {}", client, e);
            }
            log_request(client, &request, "Ignored: client request not in octet mode");
            return;
        }

        tokio::spawn(run_session(
            request,
            client,
            self.state.store.clone(),
            self.config.transfer_config.clone(),
        ));
    }
}

/// Run a TFTP server until it is shut down or its socket fails
///
/// This is a convenience function that creates, binds and runs a server.
pub async fn run_tftp_server(config: TftpServerConfig, store: FileStore) -> Result<()> {
    let mut server = TftpServer::new(config, store);
    server.run().await
}
