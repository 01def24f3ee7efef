//! Error classification: maps domain error codes onto HTTP responses.
//!
//! The response body is always the error object itself, never wrapped.
//! Routing-level 404s reuse a body serialized once per process.

use std::sync::LazyLock;

use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use resbridge_core::{ErrorKind, ResError};
use serde::Serialize;
use tracing::error;

/// Content type declared on every JSON response body.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

static NOT_FOUND_BODY: LazyLock<Bytes> = LazyLock::new(|| {
    Bytes::from(serde_json::to_vec(&ResError::not_found()).expect("static error serializes"))
});

static INTERNAL_ERROR_BODY: LazyLock<Bytes> = LazyLock::new(|| {
    Bytes::from(
        serde_json::to_vec(&ResError::internal("Internal error")).expect("static error serializes"),
    )
});

/// Anything carrying a domain error code.
pub trait ErrorCode {
    fn code(&self) -> &str;
}

impl ErrorCode for ResError {
    fn code(&self) -> &str {
        &self.code
    }
}

/// Maps an error classification onto its HTTP status.
#[must_use]
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound | ErrorKind::Timeout => StatusCode::NOT_FOUND,
        ErrorKind::AccessDenied => StatusCode::UNAUTHORIZED,
        ErrorKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::BadRequest | ErrorKind::Other => StatusCode::BAD_REQUEST,
    }
}

/// Builds a response with a JSON body and the JSON content type.
pub fn json_response(status: StatusCode, body: impl Into<Bytes>) -> Response {
    (status, [(CONTENT_TYPE, JSON_CONTENT_TYPE)], body.into()).into_response()
}

/// Serializes the shared static bodies ahead of the first request.
pub fn prepare_static_bodies() {
    LazyLock::force(&NOT_FOUND_BODY);
    LazyLock::force(&INTERNAL_ERROR_BODY);
}

/// The canonical 404 used for paths that never reach a resolver.
#[must_use]
pub fn not_found_response() -> Response {
    json_response(StatusCode::NOT_FOUND, NOT_FOUND_BODY.clone())
}

/// Renders a domain error as a response.
///
/// If the error itself cannot be serialized, the serialization failure is
/// classified once more as an internal error. That second pass never
/// recurses again.
pub fn error_response<E>(err: &E) -> Response
where
    E: ErrorCode + Serialize + ?Sized,
{
    match serde_json::to_vec(err) {
        Ok(body) => json_response(status_for(ErrorKind::from_code(err.code())), body),
        Err(e) => internal_error_response(&ResError::internal(e.to_string())),
    }
}

fn internal_error_response(err: &ResError) -> Response {
    match serde_json::to_vec(err) {
        Ok(body) => json_response(StatusCode::INTERNAL_SERVER_ERROR, body),
        Err(e) => {
            error!(error = %e, "failed to serialize internal error");
            json_response(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY.clone())
        }
    }
}
