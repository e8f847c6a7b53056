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

const PRIVATE_KEY_NOTE: &str =
    "WARNING: Save your private key. We do not store it and cannot recover it!";

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_actors))
        .route("/register", post(register_actor))
        .route("/request-otp", post(request_otp))
        .route("/verify-kyc", post(verify_kyc))
        .route("/:id", get(get_actor))
        .route("/:id/deactivate", post(deactivate_actor))
}

pub async fn register_actor(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::RegisterActorRequest>,
) -> Result<Response, AppError> {
    let actor = services.register_actor(body)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Actor Registered Successfully. Please proceed to KYC.",
            "actor": actor,
        })),
    )
        .into_response())
}

pub async fn list_actors(Extension(services): Extension<Arc<AppServices>>) -> Response {
    let items = services.list_actors();
    (StatusCode::OK, Json(json!({ "items": items }))).into_response()
}

pub async fn get_actor(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let actor = services.get_actor(&id)?;
    Ok((StatusCode::OK, Json(actor)).into_response())
}

pub async fn request_otp(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::RequestOtpRequest>,
) -> Result<Response, AppError> {
    services.request_otp(&body.actor_id)?;

    Ok((
        StatusCode::OK,
        Json(json!({ "message": "OTP sent successfully to your registered mobile number." })),
    )
        .into_response())
}

/// The only response that ever carries the actor's private key.
pub async fn verify_kyc(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::VerifyKycRequest>,
) -> Result<Response, AppError> {
    let outcome = services.verify_kyc(body)?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "message": "KYC Verified & Identity Keys Generated!",
            "data": {
                "actor_name": outcome.actor_name,
                "public_key": outcome.keys.public().to_hex(),
                "private_key": outcome.keys.secret().expose_hex(),
                "note": PRIVATE_KEY_NOTE,
            },
        })),
    )
        .into_response())
}

pub async fn deactivate_actor(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Option<Json<dto::DeactivateActorRequest>>,
) -> Result<Response, AppError> {
    let reason = body.and_then(|Json(b)| b.reason);
    services.deactivate_actor(&id, reason)?;

    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Actor deactivated", "actor_id": id.trim() })),
    )
        .into_response())
}
