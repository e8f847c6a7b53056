use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use clearpath_crypto::CryptoError;
use clearpath_infra::command_dispatcher::DispatchError;
use clearpath_infra::external::OtpError;
use clearpath_infra::read_model::UniqueViolation;

/// Everything a handler can fail with.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Otp(#[from] OtpError),

    #[error(transparent)]
    Duplicate(#[from] UniqueViolation),

    /// Malformed hex key or signature in a request.
    #[error("{field}: {source}")]
    InvalidCrypto {
        field: &'static str,
        #[source]
        source: CryptoError,
    },

    #[error("key generation failed: {0}")]
    KeyGeneration(#[source] CryptoError),

    #[error("{0}")]
    BadRequest(String),

    #[error("invalid {0} id")]
    InvalidId(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),
}

impl AppError {
    pub fn crypto(field: &'static str) -> impl FnOnce(CryptoError) -> AppError {
        move |source| AppError::InvalidCrypto { field, source }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Dispatch(e) => dispatch_error_to_response(e),
            AppError::Otp(OtpError::Mismatch) => {
                json_error(StatusCode::UNAUTHORIZED, "invalid_otp", OtpError::Mismatch.to_string())
            }
            AppError::Otp(e @ OtpError::Delivery(_)) => {
                json_error(StatusCode::BAD_GATEWAY, "otp_delivery_failed", e.to_string())
            }
            AppError::Duplicate(e) => json_error(StatusCode::CONFLICT, "conflict", e.to_string()),
            e @ AppError::InvalidCrypto { .. } => {
                json_error(StatusCode::BAD_REQUEST, "invalid_crypto_material", e.to_string())
            }
            e @ AppError::KeyGeneration(_) => {
                tracing::error!(error = %e, "keypair generation failed");
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "key_generation_failed", e.to_string())
            }
            AppError::BadRequest(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
            e @ AppError::InvalidId(_) => json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()),
            AppError::NotFound(what) => {
                json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
            }
        }
    }
}

pub fn dispatch_error_to_response(err: DispatchError) -> Response {
    match err {
        DispatchError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DispatchError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DispatchError::Unauthorized(msg) => json_error(StatusCode::UNAUTHORIZED, "unauthorized", msg),
        DispatchError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DispatchError::Deserialize(msg) => {
            tracing::error!(error = %msg, "stored event no longer decodes");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        DispatchError::Store(e) => {
            tracing::error!(error = %e, "event store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
        DispatchError::Publish(msg) => json_error(StatusCode::BAD_GATEWAY, "publish_error", msg),
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
