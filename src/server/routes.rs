use axum::body::{Body, Bytes};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::error::ApiError;
use super::identity::Owner;
use super::AppState;
use crate::db::{Message, RootThread, Thread};
use crate::relay::{ChatTurn, ModelInfo, RelayState};
use crate::threads::{CreateThread, NewMessage, ThreadDetail};

type ApiResult<T> = Result<Json<T>, ApiError>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatTurn>,
    #[serde(default)]
    pub model: Option<String>,
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

pub async fn list_threads(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> ApiResult<Vec<RootThread>> {
    Ok(Json(state.tree.list_roots(&owner)?))
}

pub async fn create_thread(
    State(state): State<AppState>,
    Owner(owner): Owner,
    payload: Result<Json<CreateThread>, JsonRejection>,
) -> ApiResult<Thread> {
    let request = body(payload)?;
    Ok(Json(state.tree.create_thread(&owner, request)?))
}

pub async fn get_thread(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> ApiResult<ThreadDetail> {
    Ok(Json(state.tree.get_thread(&id, &owner)?))
}

pub async fn rename_thread(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    payload: Result<Json<RenameRequest>, JsonRejection>,
) -> ApiResult<Thread> {
    let request = body(payload)?;
    Ok(Json(state.tree.rename_thread(&id, &owner, &request.title)?))
}

pub async fn delete_thread(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    state.tree.delete_thread(&id, &owner)?;
    Ok(Json(json!({ "success": true })))
}

pub async fn create_message(
    State(state): State<AppState>,
    Owner(owner): Owner,
    payload: Result<Json<NewMessage>, JsonRejection>,
) -> ApiResult<Message> {
    let message = body(payload)?;
    Ok(Json(state.tree.append_message(&owner, message)?))
}

pub async fn list_models(State(state): State<AppState>, Owner(_): Owner) -> Json<Vec<ModelInfo>> {
    match state.relay.backend().list_models().await {
        Ok(models) if !models.is_empty() => Json(models),
        Ok(_) => Json(vec![ModelInfo::default_model()]),
        Err(e) => {
            warn!(error = %e, "Model list unavailable, using default");
            Json(vec![ModelInfo::default_model()])
        }
    }
}

/// Stream one generation as chunked plain text.
///
/// A failure before the first increment is a 502. A failure after it aborts
/// the body so the client sees a transport error rather than a silently
/// truncated answer.
pub async fn chat(
    State(state): State<AppState>,
    Owner(owner): Owner,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = body(payload)?;
    if request.messages.is_empty() {
        return Err(ApiError::BadRequest("messages must not be empty".to_string()));
    }
    let model = request
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.default_model.to_string());

    info!(owner = %owner, model = %model, turns = request.messages.len(), "Chat request");
    let (handle, mut increments) = state.relay.begin(request.messages, &model).await?;

    // Nothing has been sent yet, so a failure before the first increment can
    // still become an error status.
    let first = increments.next().await;
    if first.is_none() {
        if let RelayState::Failed(reason) = handle.state() {
            return Err(ApiError::UpstreamUnavailable(reason));
        }
    }

    let outcome = futures::stream::once(async move {
        match handle.state() {
            RelayState::Failed(reason) => Some(Err(std::io::Error::other(reason))),
            _ => None,
        }
    })
    .filter_map(futures::future::ready);

    let stream = futures::stream::iter(first)
        .chain(increments)
        .map(|text| Ok::<_, std::io::Error>(Bytes::from(text)))
        .chain(outcome);

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(stream),
    )
        .into_response())
}
