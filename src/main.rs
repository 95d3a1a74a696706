use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pgplan_advisor::{
    config::{Config, LogFormat},
    llm::GeminiClient,
    server::{AppState, McpServer},
    session::ConnectionRegistry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "pgplan-advisor starting..."
    );

    // Initialize model client
    let gemini = match GeminiClient::new(&config.gemini, config.request.clone()) {
        Ok(c) => {
            info!(
                base_url = %c.base_url(),
                model = %config.gemini.model,
                "Gemini client initialized"
            );
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize Gemini client");
            return Err(e.into());
        }
    };

    if !gemini.has_credential() {
        warn!("GEMINI_API_KEY is not set; analysis, comparison and chat will be rejected");
    }

    let sweep_interval = config.session.sweep_interval();
    let state = Arc::new(AppState::new(config, Arc::new(gemini)));
    let shutdown = CancellationToken::new();

    // Expire idle sessions in the background
    let sweeper = ConnectionRegistry::spawn_sweeper(
        Arc::clone(&state.registry),
        sweep_interval,
        shutdown.clone(),
    );

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            ctrl_c.cancel();
        }
    });

    // Start MCP server
    let server = McpServer::with_shutdown(state, shutdown.clone());

    info!("Server ready, waiting for requests on stdin...");

    let result = server.run().await;
    let interrupted = shutdown.is_cancelled();
    shutdown.cancel();
    if let Some(sweeper) = sweeper {
        let _ = sweeper.await;
    }

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    if interrupted {
        // The blocking stdin read cannot be cancelled and would hold the runtime open.
        std::process::exit(0);
    }
    Ok(())
}

/// Initialize tracing/logging. Everything goes to stderr; stdout carries the protocol.
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
