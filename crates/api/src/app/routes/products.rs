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
        .route("/", get(list_products))
        .route("/onboard", post(onboard_product))
        .route("/update-status", post(update_status))
        .route("/:id", get(get_product))
        .route("/:id/verify", get(verify_product))
}

pub async fn onboard_product(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::OnboardProductRequest>,
) -> Result<Response, AppError> {
    let product = services.onboard_product(body)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Product Onboarded!", "product": product })),
    )
        .into_response())
}

/// Dashboard fields change; the hashed record is appended to the history.
pub async fn update_status(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::UpdateStatusRequest>,
) -> Result<Response, AppError> {
    let record = services.update_status(body)?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "message": "Dashboard Updated & Record Hashed!",
            "current_location": record.location,
            "status": record.status,
            "event_hash": record.data_hash,
            "previous_hash": record.previous_hash,
            "chain_hash": record.chain_hash,
            "sequence": record.sequence,
        })),
    )
        .into_response())
}

pub async fn list_products(Extension(services): Extension<Arc<AppServices>>) -> Response {
    let items = services
        .list_products()
        .iter()
        .map(dto::product_summary_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(json!({ "items": items }))).into_response()
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let details = services.product_details(&id)?;
    Ok((StatusCode::OK, Json(details)).into_response())
}

pub async fn verify_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let report = services.verify_product(&id)?;
    Ok((StatusCode::OK, Json(report)).into_response())
}
