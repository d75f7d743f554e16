// src/error.rs
use serde_json::json;
use thiserror::Error;
use warp::http::StatusCode;
use warp::reject::Reject;
use warp::{Rejection, Reply};

/// Persistence-layer failures, kept separate so handlers can distinguish
/// a slow store from a conflicting write.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store error: {0}")]
    Backend(String),

    #[error("store call exceeded its deadline")]
    Timeout,

    #[error("portfolio was modified concurrently")]
    VersionConflict,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Validation(String),

    #[error("Insufficient balance")]
    InsufficientBalance { required: f64, available: f64 },

    #[error("You only have {held} shares of {symbol} to sell")]
    InsufficientShares {
        symbol: String,
        held: f64,
        requested: f64,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("advisory engine unavailable: {0}")]
    Advisory(String),
}

impl Reject for ApiError {}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Validation(_)
            | ApiError::InsufficientBalance { .. }
            | ApiError::InsufficientShares { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Store(_) | ApiError::Advisory(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Maps every rejection to the uniform `{success:false, error}` envelope.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, std::convert::Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(api_err) = err.find::<ApiError>() {
        (api_err.status(), api_err.to_string())
    } else if let Some(body_err) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, body_err.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed".to_string(),
        )
    } else {
        log::error!("unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    };

    let body = warp::reply::json(&json!({ "success": false, "error": message }));
    Ok(warp::reply::with_status(body, status))
}
