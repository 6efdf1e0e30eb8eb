//! Ase mediator server binary.
//! Run with: cargo run --bin ase-server

use std::process::ExitCode;

use ase_chat::llm::OpenAiChatProvider;
use ase_chat::server::{self, AppState, MediatorConfig, RequestMediator};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting Ase mediator v{}", env!("CARGO_PKG_VERSION"));

    let provider = match OpenAiChatProvider::from_env() {
        Ok(provider) => provider,
        Err(e) => {
            tracing::error!("Failed to configure model provider: {e}");
            return ExitCode::from(1);
        }
    };

    let mut config = MediatorConfig::default();
    if let Ok(model) = std::env::var("ASE_MODEL") {
        config.sampling.model = model;
    }
    tracing::info!("Upstream model: {}", config.sampling.model);

    let state = AppState::new(RequestMediator::new(provider, config));
    let port = get_port();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    let result = rt.block_on(server::run_server_with_shutdown(state, port, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Shutdown signal listener failed: {e}");
        }
        tracing::info!("Shutting down");
    }));
    if let Err(e) = result {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// Get configured server port.
fn get_port() -> u16 {
    std::env::var("ASE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(server::DEFAULT_PORT)
}
