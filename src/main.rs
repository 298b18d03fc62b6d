use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use congestion_gate::config::{AppConfig, LogFormat, LoggingConfig};
use congestion_gate::congestion::{AdmissionGate, ControlChannel, RateLimitState};
use congestion_gate::grpc::GrpcServer;

/// gRPC server with runtime congestion control.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the application listener address
    #[arg(long)]
    grpc_addr: Option<SocketAddr>,

    /// Override the admin listener address
    #[arg(long)]
    admin_addr: Option<SocketAddr>,

    /// Override the log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match logging.format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(addr) = cli.grpc_addr {
        config.server.grpc_addr = addr;
    }
    if let Some(addr) = cli.admin_addr {
        config.server.admin_addr = addr;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    init_tracing(&config.logging);

    info!("Starting Congestion Gate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        grpc_addr = %config.server.grpc_addr,
        admin_addr = %config.server.admin_addr,
        exempt = ?config.congestion.exempt_operations,
        "Configuration loaded"
    );

    let state = Arc::new(RateLimitState::new(config.congestion.initial_policy()?));
    let (control, control_task) = ControlChannel::spawn(
        state.clone(),
        config.congestion.exempt_operations(),
        config.congestion.ack_timeout(),
    );
    let gate = Arc::new(AdmissionGate::new(state));
    info!("Admission gate initialized");

    let server = GrpcServer::new(
        config.server.grpc_addr,
        config.server.admin_addr,
        gate,
        control,
    );

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    control_task.abort();
    info!("Congestion Gate stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
