use std::sync::Arc;

use axum::{Json, extract::Extension, response::sse::Event as SseEvent};
use serde_json::{Value as JsonValue, json};

use crate::app::services::{self, AppServices};

pub async fn banner() -> &'static str {
    "ClearPath Backend is Running and Secure!"
}

pub async fn health() -> Json<JsonValue> {
    Json(json!({ "status": "ok" }))
}

pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Sse<impl tokio_stream::Stream<Item = Result<SseEvent, std::convert::Infallible>>> {
    services::sse_stream(services)
}
