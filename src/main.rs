//! # Call Voice Bridge - Main Application Entry Point
//!
//! Bridges live phone calls to a realtime speech model: the telephony provider
//! streams caller audio over a WebSocket, and the assistant's replies are streamed
//! back on the same socket.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: every connection is handled without blocking a thread
//! - **actors**: each call is one actix actor owning all of its per-call state
//! - **Result<T, E>**: setup failures propagate to `main` with `?`
//! - **Arc & RwLock**: the configuration and call counters are shared process-wide
//!
//! ## Application Architecture:
//! - **config**: configuration (TOML file + environment variables)
//! - **state**: shared configuration snapshot and call metrics
//! - **health**: health and metrics endpoints
//! - **handlers**: route table, liveness and the call-control webhook
//! - **websocket**: the per-call bridge actor
//! - **audio**: μ-law codec, resampler, frame chunking
//! - **realtime**: speech model protocol, session and turn orchestration
//! - **telephony**: media stream protocol
//! - **tts**: optional streaming text-to-speech
//! - **error**: HTTP-facing error types

mod audio;       // Audio transcoding (audio/ directory)
mod config;      // Configuration management (config.rs)
mod error;       // Error handling types (error.rs)
mod handlers;    // HTTP request handlers (handlers/ directory)
mod health;      // Health check endpoints (health.rs)
mod realtime;    // Speech model leg (realtime/ directory)
mod state;       // Application state management (state.rs)
mod telephony;   // Telephony leg (telephony/ directory)
mod tts;         // Streaming text-to-speech (tts/ directory)
mod websocket;   // Call bridge actor (websocket.rs)

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from `.env`, `config.toml` and environment variables
/// 2. **Sets up logging** for debugging and monitoring
/// 3. **Creates shared application state**
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** on Ctrl+C / SIGTERM
#[actix_web::main]
async fn main() -> Result<()> {
    // It's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!(
        "Speech model: {} (TTS {})",
        config.realtime.model,
        if config.tts.enabled { "enabled" } else { "disabled" }
    );
    if config.realtime.api_key.is_none() {
        warn!("No realtime API key configured; speech model connections will be rejected");
    }

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let stream_path = config.telephony.stream_path.clone();

    info!("Starting HTTP server on {} (media stream at {})", bind_addr, stream_path);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .configure(handlers::configure(stream_path.clone()))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Whichever finishes first wins: the server on its own (an error) or a signal
    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        signal = wait_for_shutdown() => {
            if let Err(e) = signal {
                error!("Failed to listen for shutdown signals: {}", e);
            }
            info!("Shutdown signal received, stopping server...");
            // Calls are not drained: stopping drops every bridge and both of its legs
            server_handle.stop(false).await;
        }
    }

    info!("Server stopped");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: what gets logged (e.g. "debug", "call_voice_bridge=trace")
/// - If not set, defaults to "call_voice_bridge=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "call_voice_bridge=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Resolve once SIGINT (Ctrl+C) or SIGTERM arrives.
#[cfg(unix)]
async fn wait_for_shutdown() -> std::io::Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            info!("Received SIGINT");
            result
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
            Ok(())
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
