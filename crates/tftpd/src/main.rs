//! tftpd - Main executable
//!
//! A lockstep TFTP server keeping its files in memory, with an optional
//! administrative HTTP interface.

mod admin;
mod interface;
mod logging;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use argh::FromArgs;
use tftp::{BlockSizeConfig, FileStore, TftpServer, TftpServerConfig, TransferConfig};

use crate::admin::{DEFAULT_ADMIN_ADDRESS, bind_admin, serve_admin};
use crate::interface::resolve_interface;
use crate::logging::{DEFAULT_MAIN_LOG, DEFAULT_REQUESTS_LOG, LogConfig, init_logging};

/// Complete daemon configuration
#[derive(Debug, Clone)]
struct DaemonConfig {
    server: TftpServerConfig,
    max_file_size: Option<usize>,
    admin_address: Option<SocketAddr>,
    logging: LogConfig,
}

#[derive(FromArgs, Debug)]
#[argh(
    description = "tftpd - TFTP server with an in-memory file store",
    example = "Listen on the standard port of every interface:\n  {command_name}",
    example = "Unprivileged test server on the loopback interface:\n  {command_name} --interface lo --port 6969 --no-log-files",
    example = "Limit uploads to 1 MiB and disable the admin interface:\n  {command_name} --max-file-size 1048576 --disable-admin"
)]
struct CliConfig {
    #[argh(
        option,
        short = 'I',
        description = "local IP address or interface name to listen on",
        default = "\"0.0.0.0\".to_string()"
    )]
    interface: String,

    #[argh(option, short = 'p', description = "UDP port to listen on", default = "69")]
    port: u16,

    //
    // Transfers
    //
    #[argh(option, description = "data payload size in bytes (1-1400)", default = "BlockSizeConfig::DEFAULT")]
    block_size: usize,

    #[argh(option, description = "times a packet is sent before giving up", default = "3")]
    max_send_tries: usize,

    #[argh(option, description = "seconds to wait for each reply", default = "5")]
    timeout: u64,

    #[argh(option, description = "maximum size of an uploaded file in bytes")]
    max_file_size: Option<usize>,

    //
    // Admin interface
    //
    #[argh(
        option,
        description = "admin HTTP interface address",
        default = "DEFAULT_ADMIN_ADDRESS.to_string()"
    )]
    admin: String,

    #[argh(switch, description = "disable the admin HTTP interface")]
    disable_admin: bool,

    //
    // Logging
    //
    #[argh(option, description = "main log file", default = "PathBuf::from(DEFAULT_MAIN_LOG)")]
    log_file: PathBuf,

    #[argh(
        option,
        description = "requests log file",
        default = "PathBuf::from(DEFAULT_REQUESTS_LOG)"
    )]
    requests_log_file: PathBuf,

    #[argh(switch, description = "log to the console only")]
    no_log_files: bool,
}

impl CliConfig {
    fn into_daemon_config(self) -> Result<DaemonConfig> {
        let ip = resolve_interface(&self.interface)?;

        let block_size = BlockSizeConfig::new(self.block_size).with_context(|| {
            format!(
                "Invalid block size: {} (must be between 1 and {})",
                self.block_size,
                BlockSizeConfig::MAX
            )
        })?;
        ensure!(self.max_send_tries >= 1, "--max-send-tries must be at least 1");
        ensure!(self.timeout >= 1, "--timeout must be at least 1 second");

        let admin_address = if self.disable_admin {
            None
        } else {
            Some(
                self.admin
                    .parse()
                    .with_context(|| format!("Invalid admin address: {}", self.admin))?,
            )
        };

        let transfer_config = TransferConfig {
            block_size,
            timeout: Duration::from_secs(self.timeout),
            max_send_tries: self.max_send_tries,
            local_bind: (!ip.is_unspecified()).then_some(ip),
        };

        let logging = if self.no_log_files {
            LogConfig {
                main_log: None,
                requests_log: None,
            }
        } else {
            LogConfig {
                main_log: Some(self.log_file),
                requests_log: Some(self.requests_log_file),
            }
        };

        Ok(DaemonConfig {
            server: TftpServerConfig {
                bind_address: SocketAddr::new(ip, self.port).to_string(),
                transfer_config,
                ..Default::default()
            },
            max_file_size: self.max_file_size,
            admin_address,
            logging,
        })
    }
}

async fn run(config: DaemonConfig) -> Result<()> {
    let store = match config.max_file_size {
        Some(limit) => FileStore::with_max_file_size(limit),
        None => FileStore::new(),
    };

    let mut server = TftpServer::new(config.server, store);
    let local_addr = server.bind()?;
    let state = server.state();

    if let Some(addr) = config.admin_address {
        let listener = bind_admin(addr).await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_admin(listener, state).await {
                tracing::error!("{:#}", e);
            }
        });
    }

    let signal_state = state.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Interrupted, shutting down");
                signal_state.shutdown();
            }
            Err(e) => tracing::warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });

    let transfer = &server.config().transfer_config;
    tracing::info!(
        "TFTP server listening on {} (block size {}, timeout {:?}, {} tries)",
        local_addr,
        transfer.block_size,
        transfer.timeout,
        transfer.max_send_tries
    );

    server.run().await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: CliConfig = argh::from_env();
    let config = cli.into_daemon_config()?;

    let _guards = init_logging(&config.logging)?;

    if let Err(e) = run(config).await {
        tracing::error!("tftpd failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}
