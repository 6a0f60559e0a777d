//! Process bootstrap for the interview orchestrator core: parses
//! configuration, wires the Session Registry and ASR backend into shared
//! state, drains the supervisor's downstream sinks with a no-op logger, and
//! serves the HTTP/WS surface.

mod config;
mod error;
mod routes;
mod state;

use std::sync::Arc;

use clap::Parser;
use interview_asr::WsAsrBackend;
use interview_registry::Registry;
use interview_supervisor::{CompletedUtterance, Sinks, UtteranceBoundary};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use config::{LogFormat, ServerConfig};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    let config = ServerConfig::parse();
    if let Err(e) = config.validate() {
        eprintln!("fatal configuration error: {e}");
        std::process::exit(1);
    }

    init_logging(config.log_format);

    let registry = Arc::new(Registry::new());
    let backend = Arc::new(WsAsrBackend::new(
        config.asr_ws_url.clone(),
        config.asr_api_key.clone().unwrap_or_default(),
    ));

    let (utterance_tx, utterance_rx) = mpsc::unbounded_channel();
    let (boundary_tx, boundary_rx) = mpsc::unbounded_channel();
    let sinks = Sinks {
        utterance_tx,
        boundary_tx,
    };
    tokio::spawn(drain_sinks(utterance_rx, boundary_rx));

    let public_ws_base = format!("ws://{}", config.bind);
    let state = AppState {
        registry,
        backend,
        sinks,
        public_ws_base,
    };

    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    tracing::info!(bind = %config.bind, "interview orchestrator listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("interview=info,tower_http=info"));
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

/// The downstream LLM/TTS collaborators are out of scope for this core; this
/// task is the "downstream consumer" from spec.md §1 made concrete only
/// enough to drain the channels and log what would have been handed off.
async fn drain_sinks(
    mut utterance_rx: mpsc::UnboundedReceiver<CompletedUtterance>,
    mut boundary_rx: mpsc::UnboundedReceiver<UtteranceBoundary>,
) {
    loop {
        tokio::select! {
            Some(utterance) = utterance_rx.recv() => {
                tracing::info!(
                    session_id = %utterance.session_id,
                    turn_id = ?utterance.turn_id,
                    "completed utterance"
                );
            }
            Some(boundary) = boundary_rx.recv() => {
                tracing::debug!(
                    session_id = %boundary.session_id,
                    cause = ?boundary.cause,
                    "utterance boundary signal"
                );
            }
            else => break,
        }
    }
}
