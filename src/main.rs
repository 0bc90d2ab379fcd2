//! h2tun - TCP tunnels over full-duplex HTTP/2
//!
//! `h2tun server` runs the gateway that bridges tunnel requests to a backend,
//! `h2tun client` forwards local TCP connections through a gateway.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use h2tun_client::{ClientConfig, TunnelClient};
use h2tun_relay::{ShutdownSignal, DEFAULT_SHUTDOWN_GRACE};
use h2tun_server::{ServerConfig, TunnelServer};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// h2tun - tunnel TCP services through HTTP/2
#[derive(Parser, Debug)]
#[command(name = "h2tun")]
#[command(about = "Tunnel TCP services through full-duplex HTTP/2 requests", long_about = None)]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the tunnel gateway
    #[command(long_about = r#"
Accept HTTP/2 tunnel requests and bridge each one to a new TCP connection
to the backend. Serves TLS when both --tls-key and --tls-cert are given,
cleartext HTTP/2 (prior knowledge) otherwise.

EXAMPLES:
  # Expose a local SSH server behind TLS
  h2tun server --listen 0.0.0.0:443 --backend 127.0.0.1:22 \
    --tls-key server.key --tls-cert server.crt

  # Serve a static site next to the tunnel endpoint
  h2tun server --listen 0.0.0.0:8080 --backend 127.0.0.1:22 \
    --path /ssh --web-root ./public

  # Start using a config file
  h2tun server --config h2tun.yaml

ENVIRONMENT VARIABLES:
  H2TUN_LISTEN    Address to listen on (host:port)
  H2TUN_BACKEND   Backend address (host:port)
  H2TUN_PATH      Tunnel path
  H2TUN_TLS_KEY   TLS private key (PEM)
  H2TUN_TLS_CERT  TLS certificate chain (PEM)
  H2TUN_WEB_ROOT  Static file directory
"#)]
    Server(ServerArgs),

    /// Forward local TCP connections through a gateway
    #[command(long_about = r#"
Listen on a local address and open one tunnel per accepted connection.

EXAMPLES:
  # Reach the gateway's backend on localhost:2222
  h2tun client --listen 127.0.0.1:2222 --url https://gateway.example.com/tunnel

  # Then, for an SSH backend:
  ssh -p 2222 user@127.0.0.1

ENVIRONMENT VARIABLES:
  H2TUN_CLIENT_LISTEN  Local address to listen on (host:port)
  H2TUN_URL            Gateway tunnel URL
"#)]
    Client(ClientArgs),
}

#[derive(Args, Debug)]
struct ServerArgs {
    /// Address to listen on (e.g., 0.0.0.0:443)
    #[arg(long, env = "H2TUN_LISTEN")]
    listen: Option<String>,

    /// Backend to connect tunnels to (e.g., 127.0.0.1:22)
    #[arg(long, env = "H2TUN_BACKEND")]
    backend: Option<String>,

    /// Path that opens a tunnel [default: /tunnel]
    #[arg(long, env = "H2TUN_PATH")]
    path: Option<String>,

    /// TLS private key file (PEM)
    #[arg(long, env = "H2TUN_TLS_KEY")]
    tls_key: Option<PathBuf>,

    /// TLS certificate file (PEM)
    #[arg(long, env = "H2TUN_TLS_CERT")]
    tls_cert: Option<PathBuf>,

    /// Directory served for all other paths
    #[arg(long, env = "H2TUN_WEB_ROOT")]
    web_root: Option<PathBuf>,

    /// Backend connect timeout in seconds [default: 10]
    #[arg(long)]
    dial_timeout: Option<u64>,

    /// Time in-flight tunnels get after a shutdown signal, in milliseconds [default: 1000]
    #[arg(long)]
    shutdown_grace_ms: Option<u64>,

    /// Configuration file (YAML)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ClientArgs {
    /// Local address to listen on (e.g., 127.0.0.1:2222)
    #[arg(long, env = "H2TUN_CLIENT_LISTEN")]
    listen: String,

    /// Gateway tunnel URL (e.g., https://gateway.example.com/tunnel)
    #[arg(long, env = "H2TUN_URL")]
    url: String,

    /// Skip certificate verification (insecure, for development only)
    #[arg(long)]
    insecure: bool,

    /// Time forwarded connections get after a shutdown signal, in milliseconds
    #[arg(long)]
    shutdown_grace_ms: Option<u64>,
}

/// Server configuration file format
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    listen: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    backend: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,

    /// TLS settings; both files are needed to serve TLS
    tls: TlsConfigFile,

    #[serde(skip_serializing_if = "Option::is_none")]
    web_root: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    dial_timeout_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    shutdown_grace_ms: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct TlsConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    cert: Option<PathBuf>,
}

/// Setup logging with the specified log level
fn setup_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from YAML file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: ConfigFile = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Merge CLI args with config file, giving precedence to CLI args
fn build_server_config(args: ServerArgs) -> Result<(ServerConfig, Duration)> {
    let file = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            load_config_file(path)?
        }
        None => ConfigFile::default(),
    };

    let listen = args.listen.or(file.listen).ok_or_else(|| {
        anyhow::anyhow!("Listen address is required (use --listen or config file)")
    })?;
    let backend = args.backend.or(file.backend).ok_or_else(|| {
        anyhow::anyhow!("Backend address is required (use --backend or config file)")
    })?;

    validate_address(&listen, "listen")?;
    validate_address(&backend, "backend")?;

    let mut config = ServerConfig::new(listen, backend);
    if let Some(path) = args.path.or(file.path) {
        config = config.with_tunnel_path(path);
    }
    if let Some(secs) = args.dial_timeout.or(file.dial_timeout_secs) {
        config = config.with_dial_timeout(Duration::from_secs(secs));
    }
    config.tls_key_path = args.tls_key.or(file.tls.key);
    config.tls_cert_path = args.tls_cert.or(file.tls.cert);
    config.web_root = args.web_root.or(file.web_root);

    config.validate().context("Invalid server configuration")?;

    let grace = args
        .shutdown_grace_ms
        .or(file.shutdown_grace_ms)
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_SHUTDOWN_GRACE);

    Ok((config, grace))
}

fn build_client_config(args: &ClientArgs) -> Result<ClientConfig> {
    validate_address(&args.listen, "listen")?;

    let config = ClientConfig::new(args.listen.clone(), args.url.clone()).with_insecure(args.insecure);
    config.validate().context("Invalid client configuration")?;

    Ok(config)
}

/// Validate address format (host:port)
fn validate_address(addr: &str, addr_type: &str) -> Result<()> {
    let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid {} address format: '{}' (expected format: host:port)",
            addr_type,
            addr
        )
    })?;

    if host.is_empty() {
        anyhow::bail!(
            "Invalid {} address format: '{}' (host cannot be empty)",
            addr_type,
            addr
        );
    }

    port.parse::<u16>().with_context(|| {
        format!(
            "Invalid {} address format: '{}' (port must be a number between 0 and 65535)",
            addr_type, addr
        )
    })?;

    Ok(())
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let (config, grace) = build_server_config(args)?;

    let server = TunnelServer::bind(config)
        .await
        .context("Failed to start tunnel gateway")?;

    let shutdown = ShutdownSignal::with_grace(grace);
    shutdown.trigger_on_os_signal();

    server
        .serve(shutdown)
        .await
        .context("Tunnel gateway failed")?;

    info!("Tunnel gateway stopped");
    Ok(())
}

async fn run_client(args: ClientArgs) -> Result<()> {
    let config = build_client_config(&args)?;

    let client = TunnelClient::bind(config)
        .await
        .context("Failed to start tunnel client")?;

    let grace = args
        .shutdown_grace_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_SHUTDOWN_GRACE);
    let shutdown = ShutdownSignal::with_grace(grace);
    shutdown.trigger_on_os_signal();

    client
        .serve(shutdown)
        .await
        .context("Tunnel client failed")?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level)?;

    match cli.command {
        Commands::Server(args) => run_server(args).await,
        Commands::Client(args) => run_client(args).await,
    }
}
