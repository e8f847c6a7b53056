//! Digital Product Passport endpoints.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;

use crate::app::dto;
use crate::app::errors::AppError;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/add", post(log_event))
        .route("/product/:id", get(get_passport))
        .route("/product/:id/verify", get(verify_passport))
}

pub async fn log_event(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::LogEventRequest>,
) -> Result<Response, AppError> {
    let entry = services.log_event(body)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Event verified and locked in Digital Product Passport",
            "hash": entry.data_hash,
            "previous_hash": entry.previous_hash,
            "chain_hash": entry.chain_hash,
            "sequence": entry.sequence,
            "signed": entry.signature.is_some(),
        })),
    )
        .into_response())
}

pub async fn get_passport(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let passport = services.passport(&id)?;
    Ok((StatusCode::OK, Json(passport)).into_response())
}

pub async fn verify_passport(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let report = services.verify_passport(&id)?;
    Ok((StatusCode::OK, Json(report)).into_response())
}
