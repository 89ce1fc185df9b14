//! cosanet - per-node network telemetry exporter.
//!
//! Main entry point: parses flags, installs the controller resolver,
//! spawns the namespace-pinned worker and serves the HTTP surface.

use std::env;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use clap::Parser;
use prometheus::{Gauge, Registry};
use tokio::{net::TcpListener, signal};
use tracing::{error, info, warn};

use cosanet::cli::{Args, LogFormat};
use cosanet::collector::{worker, NetnsCollector};
use cosanet::handlers::{metrics_handler, root_handler};
use cosanet::resolver::{self, ResolverOptions};
use cosanet::state::AppState;

/// Initializes the tracing subsystem with the configured format and level.
fn setup_logging(args: &Args) {
    let level = args.verbosity.level();
    match args.log_format {
        LogFormat::Json => {
            let subscriber = tracing_subscriber::fmt()
                .json()
                .with_max_level(level)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .expect("Failed to set tracing subscriber");
        }
        LogFormat::Text => {
            let subscriber = tracing_subscriber::fmt().with_max_level(level).finish();
            tracing::subscriber::set_global_default(subscriber)
                .expect("Failed to set tracing subscriber");
        }
    }
}

/// `NODE_NAME` when set, the hostname otherwise.
fn node_name() -> String {
    if let Ok(name) = env::var("NODE_NAME") {
        if !name.is_empty() {
            return name;
        }
    }
    match nix::unistd::gethostname() {
        Ok(hostname) => hostname.to_string_lossy().into_owned(),
        Err(err) => {
            error!(err = %err, "failed to get hostname");
            String::new()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args);

    info!(version = env!("CARGO_PKG_VERSION"), "cosanet starting");

    let node_name = node_name();
    info!(hostname = %node_name, "nodename");

    let options = args.collector_options()?;
    let addr = args.listen_addr()?;

    let resolver = resolver::install(ResolverOptions {
        node_name: node_name.clone(),
        ..Default::default()
    })
    .await;

    let requests = worker::spawn(node_name, options, resolver, args.cache_duration)
        .context("failed to spawn collection worker")?;
    let collector = Arc::new(NetnsCollector::new(requests));

    let registry = Registry::new();
    let scrape_duration = Gauge::new(
        "cosanet_exporter_scrape_duration_seconds",
        "Time spent serving the last /metrics request",
    )?;
    registry.register(Box::new(scrape_duration.clone()))?;

    let state = Arc::new(AppState {
        registry,
        scrape_duration,
        collector,
        start_time: Instant::now(),
    });

    let app = Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let shutdown_signal = async {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install signal handler")
                .recv()
                .await;
        };

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
            }
            _ = terminate => {
                info!("Received SIGTERM, shutting down gracefully...");
            }
        }
    };

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, "exporter running");

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            if let Err(err) = result {
                error!(err = %err, "exporter failed");
                return Err(err.into());
            }
        }
        _ = shutdown_signal => {
            warn!("Shutdown signal received, exiting...");
        }
    }

    info!("cosanet stopped gracefully");
    Ok(())
}
