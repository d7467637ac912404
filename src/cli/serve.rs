//! `offshoot serve`.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::warn;

use crate::config::AppConfig;
use crate::db::Store;
use crate::relay::{AnthropicBackend, StreamRelay};
use crate::server::{self, AppState};
use crate::threads::ThreadTree;

/// Relay over the Anthropic Messages API, capped by the configured timeout.
pub fn anthropic_relay(config: &AppConfig) -> StreamRelay {
    let backend = AnthropicBackend::new(config.upstream.clone());
    StreamRelay::new(Arc::new(backend)).with_timeout(config.generation_timeout)
}

/// Run the REST server until Ctrl-C.
pub async fn run_serve(store: Store, config: AppConfig) -> anyhow::Result<()> {
    if config.upstream.api_key.is_none() {
        warn!("ANTHROPIC_API_KEY is not set; /chat requests will fail");
    }

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    println!(
        "offshoot {} listening on http://{}",
        env!("CARGO_PKG_VERSION"),
        listener.local_addr()?
    );

    let state = AppState::new(
        ThreadTree::new(store),
        anthropic_relay(&config),
        config.default_model.clone(),
    );
    server::serve(listener, state).await
}
