//! REST surface.
//!
//! | method | path | |
//! | --- | --- | --- |
//! | GET | `/health` | unauthenticated liveness |
//! | GET, POST | `/threads` | root threads / create |
//! | GET, PATCH, DELETE | `/threads/{id}` | detail / rename / cascading delete |
//! | POST | `/messages` | append a message |
//! | GET | `/models` | generation models |
//! | POST | `/chat` | streamed plain-text generation |

mod error;
mod identity;
mod routes;

pub use error::ApiError;
pub use identity::{Owner, OWNER_HEADER};

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::relay::StreamRelay;
use crate::threads::ThreadTree;

/// Server state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub tree: ThreadTree,
    pub relay: StreamRelay,
    /// Model used when a chat request names none.
    pub default_model: Arc<str>,
}

impl AppState {
    pub fn new(tree: ThreadTree, relay: StreamRelay, default_model: impl Into<Arc<str>>) -> Self {
        Self {
            tree,
            relay,
            default_model: default_model.into(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route(
            "/threads",
            get(routes::list_threads).post(routes::create_thread),
        )
        .route(
            "/threads/{id}",
            get(routes::get_thread)
                .patch(routes::rename_thread)
                .delete(routes::delete_thread),
        )
        .route("/messages", post(routes::create_message))
        .route("/models", get(routes::list_models))
        .route("/chat", post(routes::chat))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
