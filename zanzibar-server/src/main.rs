use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use zanzibar_server::{
    config::{LogFormat, Settings},
    create_app, ZanzibarServer,
};

/// Zanzibar authorization HTTP server
#[derive(Parser, Debug)]
#[command(name = "zanzibar-server")]
#[command(about = "Relationship-based access control HTTP API server")]
struct Args {
    /// Server bind address
    #[arg(long, env = "ZANZIBAR_HOST")]
    host: Option<String>,

    /// Server port
    #[arg(short, long, env = "ZANZIBAR_PORT")]
    port: Option<u16>,

    /// Configuration file path
    #[arg(short, long, env = "ZANZIBAR_CONFIG")]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut settings =
        Settings::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if args.verbose {
        settings.logging.level = "debug".to_string();
    }

    init_tracing(&settings.logging.level, settings.logging.format);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Zanzibar server");

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid bind address {}:{}",
                settings.server.host, settings.server.port
            )
        })?;

    let server = ZanzibarServer::new(settings).await?;
    let app = create_app(server);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Zanzibar server running on http://{addr}");
    info!("Health check available at: http://{addr}/health");
    info!("API v1 available at: http://{addr}/api/v1");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
}

fn init_tracing(level: &str, format: LogFormat) {
    // RUST_LOG wins over the configured level
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("zanzibar_server={level},auth_zanzibar={level},tower_http=info").into()
    });

    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_line_number(true)
                    .with_timer(ChronoUtc::rfc_3339()),
            )
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .json(),
            )
            .init(),
    }
}
