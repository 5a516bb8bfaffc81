//! drover agent entry point.
//!
//! Parses the CLI, initialises tracing, and serves the process API until
//! SIGINT. Shutdown stops the listener before anything else, then
//! terminates every supervised child and drains the remaining connections;
//! a failed bind or invalid address exits nonzero.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use drover::{AgentConfig, ProcessRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "drover-agent", version, about = "Remote process-runner agent")]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Event log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Directory for downloaded archives and extracted trees.
    #[arg(long, default_value = ".drover")]
    scratch_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = AgentConfig {
        scratch_dir: cli.scratch_dir,
        ..AgentConfig::default()
    };
    let registry = ProcessRegistry::new(config);
    let app = drover::server::router(registry.clone());

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .context("invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "agent listening");

    let stop = CancellationToken::new();
    let mut server = tokio::spawn({
        let stop = stop.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(stop.cancelled_owned())
                .await
        }
    });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.expect("failed to install Ctrl-C handler");
            tracing::info!("received interrupt, refusing new requests");

            // New requests stop first; only then take the children down.
            // Closing the hubs also ends any attached console streams, so
            // the connection drain below can finish.
            stop.cancel();
            registry.shutdown().await;

            server.await.context("server task panicked")?.context("server error")?;
        }
        result = &mut server => {
            result.context("server task panicked")?.context("server error")?;
        }
    }

    tracing::info!("agent stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}
