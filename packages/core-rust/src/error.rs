//! Domain error taxonomy shared by resolvers and the HTTP bridge.

use serde::{Deserialize, Serialize};

/// Well-known error codes.
///
/// Any other string is a valid code too; it falls into [`ErrorKind::Other`].
pub mod codes {
    pub const BAD_REQUEST: &str = "system.badRequest";
    pub const NOT_FOUND: &str = "system.notFound";
    pub const TIMEOUT: &str = "system.timeout";
    pub const ACCESS_DENIED: &str = "system.accessDenied";
    pub const METHOD_NOT_ALLOWED: &str = "system.methodNotAllowed";
    pub const INTERNAL_ERROR: &str = "system.internalError";
    pub const SERVICE_UNAVAILABLE: &str = "system.serviceUnavailable";
    pub const INVALID_PARAMS: &str = "system.invalidParams";
    pub const METHOD_NOT_FOUND: &str = "system.methodNotFound";
}

/// Closed classification of an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    Timeout,
    AccessDenied,
    MethodNotAllowed,
    InternalError,
    ServiceUnavailable,
    /// Any code outside the system set, including service-defined codes.
    Other,
}

impl ErrorKind {
    /// Classifies a raw error code.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            codes::BAD_REQUEST => Self::BadRequest,
            codes::NOT_FOUND => Self::NotFound,
            codes::TIMEOUT => Self::Timeout,
            codes::ACCESS_DENIED => Self::AccessDenied,
            codes::METHOD_NOT_ALLOWED => Self::MethodNotAllowed,
            codes::INTERNAL_ERROR => Self::InternalError,
            codes::SERVICE_UNAVAILABLE => Self::ServiceUnavailable,
            _ => Self::Other,
        }
    }
}

/// A resource operation failure, independent of any transport status.
///
/// Serializes as `{"code": ..., "message": ...}` with an optional `data`
/// member carrying service-specific detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ResError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<serde_json::Value>,
}

impl ResError {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_code(&self.code)
    }

    #[must_use]
    pub fn not_found() -> Self {
        Self::new(codes::NOT_FOUND, "Not found")
    }

    #[must_use]
    pub fn timeout() -> Self {
        Self::new(codes::TIMEOUT, "Request timeout")
    }

    #[must_use]
    pub fn access_denied() -> Self {
        Self::new(codes::ACCESS_DENIED, "Access denied")
    }

    #[must_use]
    pub fn method_not_allowed() -> Self {
        Self::new(codes::METHOD_NOT_ALLOWED, "Method not allowed")
    }

    #[must_use]
    pub fn service_unavailable() -> Self {
        Self::new(codes::SERVICE_UNAVAILABLE, "Service unavailable")
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(codes::BAD_REQUEST, message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }
}

/// Foreign serialization failures surface as internal errors carrying
/// their own text.
impl From<serde_json::Error> for ResError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_covers_system_codes() {
        assert_eq!(ResError::not_found().kind(), ErrorKind::NotFound);
        assert_eq!(ResError::timeout().kind(), ErrorKind::Timeout);
        assert_eq!(ResError::access_denied().kind(), ErrorKind::AccessDenied);
        assert_eq!(ResError::method_not_allowed().kind(), ErrorKind::MethodNotAllowed);
        assert_eq!(ResError::service_unavailable().kind(), ErrorKind::ServiceUnavailable);
        assert_eq!(ResError::bad_request("x").kind(), ErrorKind::BadRequest);
        assert_eq!(ResError::internal("x").kind(), ErrorKind::InternalError);
    }

    #[test]
    fn unknown_codes_are_other() {
        assert_eq!(ErrorKind::from_code(codes::INVALID_PARAMS), ErrorKind::Other);
        assert_eq!(ErrorKind::from_code("todo.tooLong"), ErrorKind::Other);
        assert_eq!(ErrorKind::from_code(""), ErrorKind::Other);
    }

    #[test]
    fn serializes_without_envelope() {
        let json = serde_json::to_string(&ResError::not_found()).unwrap();
        assert_eq!(json, r#"{"code":"system.notFound","message":"Not found"}"#);
    }

    #[test]
    fn serializes_data_when_present() {
        let err = ResError::new("todo.tooLong", "Too long").with_data(serde_json::json!({"max": 10}));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["data"]["max"], 10);
    }

    #[test]
    fn display_includes_code_and_message() {
        assert_eq!(ResError::access_denied().to_string(), "system.accessDenied: Access denied");
    }

    #[test]
    fn json_error_converts_to_internal() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ResError = json_err.into();
        assert_eq!(err.kind(), ErrorKind::InternalError);
        assert!(!err.message.is_empty());
    }
}
