//! gqlws-server: GraphQL subscriptions over WebSocket (`graphql-ws`).
//!
//! Runs the subscription server with a built-in demo executor: every
//! subscription selecting `tick` receives `{"tick": n}` every `--tick-ms`.
//!
//! Usage:
//!   gqlws-server                                  # ws://127.0.0.1:8080/graphql
//!   gqlws-server --port 0 --path /subscriptions   # OS-assigned port
//!   gqlws-server --token mysecret                 # require authToken in connection_init
//!   gqlws-server --keep-alive-ms 15000            # send `ka` every 15s after ack

mod ticker;

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use gqlws_server::{ServerOptions, SubscriptionServer};
use gqlws_transport::{ConnectionConfig, TokenAuthenticator, TransportConfig, TransportServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::ticker::TickerExecutor;

#[derive(Parser, Debug)]
#[command(name = "gqlws-server", about = "GraphQL over WebSocket subscription server")]
struct Cli {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// Path serving the WebSocket upgrade
    #[arg(long, default_value = "/graphql")]
    path: String,

    /// Maximum concurrent connections
    #[arg(long, default_value = "32")]
    max_connections: usize,

    /// Require this token (authToken or Authorization) in connection_init
    #[arg(long)]
    token: Option<String>,

    /// Keep-alive interval in milliseconds (0 disables)
    #[arg(long, default_value = "0")]
    keep_alive_ms: u64,

    /// Per-frame write deadline in milliseconds
    #[arg(long, default_value = "10000")]
    write_timeout_ms: u64,

    /// Maximum incoming frame size in bytes
    #[arg(long, default_value = "4096")]
    read_limit: usize,

    /// Interval between demo ticks in milliseconds
    #[arg(long, default_value = "1000")]
    tick_ms: u64,

    /// Send `complete` when a subscription's stream ends by itself
    #[arg(long)]
    complete_on_end: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &cli.log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let builder = builder
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false);
            if cli.log_json {
                builder.json().init();
            } else {
                builder.init();
            }
            eprintln!("Logging to {}", path.display());
        }
        None if cli.log_json => builder.json().init(),
        None => builder.init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let options = ServerOptions::default().with_complete_on_stream_end(cli.complete_on_end);
    let executor = TickerExecutor::new(Duration::from_millis(cli.tick_ms.max(1)));
    let server = Arc::new(SubscriptionServer::new(executor).with_options(options));

    let mut connection = ConnectionConfig::new(server)
        .with_read_limit(cli.read_limit)
        .with_write_timeout(Duration::from_millis(cli.write_timeout_ms))
        .with_keep_alive(Some(Duration::from_millis(cli.keep_alive_ms)));
    if let Some(token) = &cli.token {
        connection = connection.with_authenticator(TokenAuthenticator::new(token.clone()));
    }

    let transport_config = TransportConfig {
        port: cli.port,
        hostname: cli.hostname.clone(),
        path: cli.path.clone(),
        max_connections: Some(cli.max_connections),
        enable_cors: false,
    };

    let mut transport = TransportServer::start(transport_config, connection)
        .await
        .context("failed to start transport")?;

    println!();
    println!("  gqlws-server");
    println!();
    println!("  WebSocket endpoint:");
    println!("    ws://{}{}", transport.local_addr(), cli.path);
    println!("  Health:");
    println!("    http://{}/health", transport.local_addr());
    println!(
        "  Auth:       {}",
        if cli.token.is_some() { "token required" } else { "disabled" }
    );
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutting down");
    transport.stop().await;
    Ok(())
}
