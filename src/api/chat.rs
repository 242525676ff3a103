use std::convert::Infallible;

use axum::extract::State;
use axum::http::{header, HeaderName};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::stream::{self, StreamExt};
use serde_json::json;

use crate::api::ApiError;
use crate::engine::ChatStream;
use crate::error::Error;
use crate::models::{ChatAnswer, ChatRequest};
use crate::relay::RelayEvent;
use crate::state::AppState;

/// POST /api/chat - Retrieve context and return the complete answer.
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatAnswer>, ApiError> {
    let _permit = acquire(&state).await?;
    Ok(Json(state.engine.chat(&req.question).await?))
}

/// POST /api/chat/stream - RAG chat over SSE.
///
/// Events: `meta` (citations) first, then `token` deltas with `ping`
/// keep-alives while the model is silent, then an optional `error` and a
/// final `done`. A client disconnect drops the relay, which cancels
/// generation.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let permit = acquire(&state).await?;

    let ChatStream { citations, relay } = state.engine.chat_stream(&req.question).await?;

    let meta = Event::default()
        .event("meta")
        .data(json!({ "citations": citations }).to_string());

    let events = relay.into_stream().map(move |event| {
        // Hold the semaphore permit for the lifetime of the stream
        let _permit = &permit;
        Ok::<_, Infallible>(relay_event(event))
    });

    let stream = stream::once(async move { Ok::<_, Infallible>(meta) }).chain(events);

    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(stream),
    ))
}

async fn acquire(state: &AppState) -> Result<tokio::sync::OwnedSemaphorePermit, ApiError> {
    state
        .chat_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ApiError(Error::backend("chat", "chat service at capacity")))
}

fn relay_event(event: RelayEvent) -> Event {
    match event {
        RelayEvent::Token(delta) => Event::default()
            .event("token")
            .data(json!({ "delta": delta }).to_string()),
        RelayEvent::KeepAlive => Event::default().event("ping").data("{}"),
        RelayEvent::Failed(message) => Event::default()
            .event("error")
            .data(json!({ "error": message }).to_string()),
        RelayEvent::Completed => Event::default().event("done").data("[DONE]"),
    }
}
