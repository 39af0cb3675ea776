//! # SSE Relay Server
//!
//! Consumes one Kafka topic and rebroadcasts every message, live, to any
//! number of Server-Sent Events subscribers.
//!
//! ## Core Responsibilities:
//! - **Ingestion:** a supervised `IngestionAdapter` over an SSL `KafkaSource`.
//! - **Fan-out:** the `Dispatcher` gives every subscriber its own bounded
//!   buffer so a slow client only ever loses its own messages.
//! - **Transport:** `/events`, `/health`, `/info` and the browser client under
//!   `/static` on all interfaces.
//! - **Lifecycle:** SIGINT/SIGTERM stop ingestion, close every stream and let
//!   in-flight responses finish.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use clap::error::ErrorKind;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use lib_relay::configs::{RelayArgs, load_dotenv};
use lib_relay::ingestors::KafkaSource;
use lib_relay::loggers::setup_logging;
use lib_relay::{Dispatcher, IngestionStats, Sequencer};
use servers::relay_logic::downstream;
use servers::relay_logic::state::AppState;
use servers::relay_logic::upstream::IngestionSupervisor;

/// # Main Entry Point
///
/// ## Execution Flow:
/// 1.  Load `.env` files and parse flags / environment.
/// 2.  Initialize logging.
/// 3.  Validate the configuration. Any problem is fatal: every problem is
///     logged and the process exits with status 1 before binding a socket.
/// 4.  Build the dispatcher and start the ingestion supervisor.
/// 5.  Serve the router until a shutdown signal arrives.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- Phase 1: Configuration Loading ---
    load_dotenv();
    let args = match RelayArgs::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    // --- Phase 2: Logging Setup ---
    let log_guard = match setup_logging(args.log_level(), args.log_dir.as_deref(), "server_relay") {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            std::process::exit(1);
        }
    };

    // --- Phase 3: Validation ---
    let settings = match args.validate() {
        Ok(settings) => settings,
        Err(problems) => {
            for problem in &problems {
                tracing::error!(problem = %problem, "Fatal configuration error");
            }
            drop(log_guard);
            std::process::exit(1);
        }
    };

    tracing::info!(
        topic = %settings.kafka.kafka_topic,
        bootstrap = %settings.kafka.consumer_bootstrap_1.join(","),
        group_id = %settings.kafka.group_id,
        "Relay configured"
    );
    tracing::info!(
        secondary_bootstrap = %settings.kafka.consumer_bootstrap_2.join(","),
        "Secondary bootstrap servers configured; they are not used for connecting"
    );

    // --- Phase 4: Core Infrastructure ---
    let dispatcher = Arc::new(Dispatcher::new(settings.server.buffer_capacity));
    let ingestion = Arc::new(IngestionStats::default());
    let shutdown = CancellationToken::new();

    // --- Phase 5: Supervised Ingestion ---
    let supervisor = IngestionSupervisor::new(
        Arc::clone(&dispatcher),
        Sequencer::new(),
        Arc::clone(&ingestion),
        settings.reconnect,
    );
    let kafka = settings.kafka.clone();
    let ingestion_task = tokio::spawn(supervisor.run(move || KafkaSource::new(kafka.clone()), shutdown.clone()));

    // --- Phase 6: Router ---
    let state = AppState::new(
        Arc::clone(&dispatcher),
        Arc::clone(&ingestion),
        settings.kafka.kafka_topic.clone(),
    )
    .with_keep_alive(settings.server.keep_alive)
    .with_static_dir(settings.server.static_dir.clone());
    let app = downstream::router(Arc::new(state));

    // --- Phase 7: Serve ---
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.server.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, "SSE relay listening");

    let signal_token = shutdown.clone();
    let signal_dispatcher = Arc::clone(&dispatcher);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::warn!("Shutdown signal received. Closing streams...");
            signal_token.cancel();
            signal_dispatcher.shutdown();
        })
        .await
        .context("HTTP server failed")?;

    // --- Phase 8: Drain ---
    if let Err(e) = ingestion_task.await {
        tracing::error!(error = %e, "Ingestion supervisor ended abnormally");
    }
    tracing::info!("SSE relay stopped");
    Ok(())
}

/// Completes on CTRL+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
