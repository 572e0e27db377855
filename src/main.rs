use arc_swap::ArcSwap;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use forward_proxy::config::watcher::{apply_updates, ConfigWatcher};
use forward_proxy::lifecycle::{self, Overrides, Shutdown};
use forward_proxy::observability::{logging, metrics};
use forward_proxy::ProxyServer;

#[derive(Parser)]
#[command(name = "forward-proxy")]
#[command(about = "Forward HTTP proxy that relays raw bytes to the requested host", long_about = None)]
struct Cli {
    /// TOML configuration file; watched for changes when given.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interface to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind.
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level for this crate (overridden by RUST_LOG).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            host: self.host.clone(),
            port: self.port,
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let overrides = cli.overrides();

    let config = lifecycle::resolve_config(cli.config.as_deref(), &overrides)?;
    logging::init_logging(&config.observability)?;

    tracing::info!("forward-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address(),
        keep_alive_timeout_secs = config.timeouts.keep_alive_timeout_secs,
        dial_timeout_secs = config.timeouts.dial_timeout_secs,
        error_responses = config.proxy.error_responses,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = match lifecycle::bind_listener(&config).await {
        Ok(listener) => listener,
        Err(_) => std::process::exit(1),
    };

    let shared = Arc::new(ArcSwap::from_pointee(config));
    let shutdown = Shutdown::new();

    // The watcher must stay alive for reload events to keep flowing.
    let _watcher = match &cli.config {
        Some(path) => {
            let (watcher, mut reloaded) = ConfigWatcher::new(path);
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(async move {
                while let Some(mut next) = reloaded.recv().await {
                    overrides.apply(&mut next);
                    if tx.send(next).is_err() {
                        break;
                    }
                }
            });
            tokio::spawn(apply_updates(Arc::clone(&shared), rx, shutdown.subscribe()));

            match watcher.run() {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    tracing::warn!(error = %e, "Config hot reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    let server = ProxyServer::with_shared_config(shared);
    let mut server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    tokio::select! {
        _ = lifecycle::shutdown_on_signal(&shutdown) => {}
        finished = &mut server_task => {
            finished??;
            tracing::info!("Shutdown complete");
            return Ok(());
        }
    }

    server_task.await??;
    tracing::info!("Shutdown complete");
    Ok(())
}
