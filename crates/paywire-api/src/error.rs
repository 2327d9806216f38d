//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use paywire_core::StatusReply;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  /// Malformed webhook payload. Nothing was written.
  #[error("invalid payload: {0}")]
  Validation(String),

  /// Missing or wrong webhook signature. Nothing was written.
  #[error("signature rejected")]
  Auth,

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<paywire_core::Error> for ApiError {
  fn from(e: paywire_core::Error) -> Self {
    use paywire_core::Error as E;
    match e {
      E::Validation(m) => Self::Validation(m),
      E::Auth => Self::Auth,
      E::NotFound(m) => Self::NotFound(m),
      other => Self::BadRequest(other.to_string()),
    }
  }
}

impl From<paywire_hub::Error> for ApiError {
  fn from(e: paywire_hub::Error) -> Self { Self::Store(Box::new(e)) }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match &self {
      ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Auth => StatusCode::UNAUTHORIZED,
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(StatusReply::failed(self.to_string()))).into_response()
  }
}
