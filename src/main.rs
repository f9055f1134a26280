use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use camstream::config::{AppConfig, ConfigStore};
use camstream::logging::{init_logging, LogLevel};
use camstream::state::AppState;
use camstream::stream::StreamServer;
use camstream::utils::shutdown_signal;
use camstream::video::CameraBackend;
use camstream::web;

/// camstream command line arguments
#[derive(Parser, Debug)]
#[command(name = "camstream")]
#[command(version, about = "Camera to MJPEG-over-HTTP stream server", long_about = None)]
struct CliArgs {
    /// Configuration file (TOML)
    #[arg(short = 'c', long, value_name = "FILE", env = "CAMSTREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides config)
    #[arg(short = 'p', long, value_name = "PORT")]
    http_port: Option<u16>,

    /// Camera device index (overrides config)
    #[arg(short = 'i', long, value_name = "INDEX")]
    camera: Option<u32>,

    /// Camera backend (overrides config)
    #[arg(short = 'b', long, value_name = "BACKEND")]
    backend: Option<CameraBackend>,

    /// Directory served at / (overrides config)
    #[arg(long, value_name = "DIR")]
    static_dir: Option<String>,

    /// Do not start capturing until POST /api/stream/start
    #[arg(long)]
    no_autostart: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl CliArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(address) = &self.address {
            config.web.bind_address = address.clone();
        }
        if let Some(port) = self.http_port {
            config.web.http_port = port;
        }
        if let Some(index) = self.camera {
            config.camera.index = index;
        }
        if let Some(backend) = self.backend {
            config.camera.backend = backend;
        }
        if let Some(dir) = &self.static_dir {
            config.web.static_dir = Some(dir.clone());
        }
        if self.no_autostart {
            config.web.autostart = false;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    let store = ConfigStore::load(args.config.as_deref()).await?;
    store.update("cli", |config| args.apply(config))?;

    if args.print_config {
        print!("{}", store.to_toml()?);
        return Ok(());
    }

    tracing::info!("Starting camstream v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = store.path() {
        tracing::info!("Configuration file: {}", path.display());
    }

    let config = store.get();
    let server = Arc::new(StreamServer::from_config(&config));
    tracing::info!(
        "Camera backend: {} (device {}, {}x{} {})",
        config.camera.backend,
        config.camera.index,
        config.camera.width,
        config.camera.height,
        config.camera.format
    );

    if config.web.autostart {
        if let Err(e) = server.start(config.camera.index).await {
            tracing::warn!("Failed to open camera: {}", e);
            tracing::warn!("Server will start but streaming is unavailable until a camera is opened");
        }
    }

    let shutdown = CancellationToken::new();
    let state = AppState::new(store.clone(), server, shutdown.clone());
    let app = web::create_router(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.web.bind_address, config.web.http_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen address: {}", e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Stream server listening on http://{}", addr);

    let graceful = shutdown.clone();
    let mut http = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { graceful.cancelled().await })
            .await
    });

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("Shutting down server...");
            state.cleanup().await;

            let timeout = Duration::from_secs(config.web.shutdown_timeout_secs);
            match tokio::time::timeout(timeout, &mut http).await {
                Ok(Ok(Err(e))) => tracing::error!("Error during server shutdown: {}", e),
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!("Connections still open after {:?}, closing", timeout);
                    http.abort();
                }
            }
        }
        result = &mut http => {
            match result {
                Ok(Err(e)) => tracing::error!("HTTP server error: {}", e),
                Err(e) => tracing::error!("HTTP server task failed: {}", e),
                Ok(Ok(())) => {}
            }
            state.cleanup().await;
        }
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}
