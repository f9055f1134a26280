//! Static server for the viewer page
//!
//! The page itself points an `<img>` at the stream server's `/stream`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use camstream::config::ConfigStore;
use camstream::logging::{init_logging, LogLevel};
use camstream::utils::shutdown_signal;
use camstream::web;

#[derive(Parser, Debug)]
#[command(name = "camstream-viewer")]
#[command(version, about = "Serves the camstream viewer page", long_about = None)]
struct CliArgs {
    /// Configuration file (TOML), `[viewer]` section is used
    #[arg(short = 'c', long, value_name = "FILE", env = "CAMSTREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// Port (overrides config)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Directory with the viewer page (overrides config)
    #[arg(short = 'd', long, value_name = "DIR")]
    static_dir: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    let store = ConfigStore::load(args.config.as_deref()).await?;
    let viewer = store.get().viewer.clone();

    let address = args.address.unwrap_or(viewer.bind_address);
    let port = args.port.unwrap_or(viewer.port);
    let static_dir = args
        .static_dir
        .unwrap_or_else(|| PathBuf::from(&viewer.static_dir));

    if !static_dir.is_dir() {
        tracing::warn!("Viewer directory {} does not exist", static_dir.display());
    }

    let addr: SocketAddr = format!("{}:{}", address, port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen address: {}", e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Viewer server listening on http://{}", addr);

    let app = web::create_viewer_router(&static_dir);
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let mut http = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
    });

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("Viewer server is shutting down...");
            let _ = stop_tx.send(());

            let timeout = Duration::from_secs(viewer.shutdown_timeout_secs);
            match tokio::time::timeout(timeout, &mut http).await {
                Ok(Ok(Err(e))) => tracing::error!("Could not stop server gracefully: {}", e),
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!("Could not stop server gracefully within {:?}, closing", timeout);
                    http.abort();
                }
            }
        }
        result = &mut http => {
            match result {
                Ok(Err(e)) => anyhow::bail!("viewer server error: {}", e),
                Err(e) => anyhow::bail!("viewer server task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }
    }

    Ok(())
}
