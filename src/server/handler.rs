//! HTTP relay handler
//!
//! Routes:
//! - `GET /`, `GET /health`: liveness, never touches a session
//! - `GET /{name}`: subscribe and stream the relayed bytes as a chunked body
//!
//! Anything else is a 404 from the fallback.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::error::RelayError;
use crate::registry::SessionRegistry;

/// Build the relay router
pub fn router(registry: Arc<SessionRegistry>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/{name}", get(stream))
        .fallback(not_found)
        .with_state(registry)
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    streams: usize,
}

async fn health(State(registry): State<Arc<SessionRegistry>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        streams: registry.definition_count(),
    })
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Stream `name` to the client until the producer ends or the client leaves
async fn stream(
    State(registry): State<Arc<SessionRegistry>>,
    Path(name): Path<String>,
) -> Result<Response, RelayError> {
    let handle = match registry.subscribe(&name).await {
        Ok(handle) => handle,
        Err(e) => {
            if e.status_code() == StatusCode::NOT_FOUND {
                tracing::debug!(stream = %name, error = %e, "Rejected");
            } else {
                tracing::warn!(stream = %name, error = %e, "Subscribe failed");
            }
            return Err(e);
        }
    };

    let session = handle.session();
    tracing::info!(
        stream = %name,
        session_id = session.id(),
        subscribers = session.subscriber_count(),
        "Client connected"
    );

    let content_type = session.definition().content_type.clone();
    let body = Body::from_stream(handle.into_stream());

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        body,
    )
        .into_response())
}
