//! The REST-style API handler.
//!
//! Every request under the configured API path is parsed into one resolver
//! operation and run on a fresh ephemeral session. Structural problems
//! (unknown path, bad RID, unparsable body, unsupported verb) are answered
//! before any session is opened.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::LOCATION;
use axum::http::request::Parts;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use resbridge_core::{
    is_valid_rid, path_to_rid, path_to_rid_action, RequestContext, ResError, RidGrammar,
};
use serde_json::value::RawValue;
use tracing::debug;

use super::AppState;
use crate::bridge::{
    error_response, json_response, not_found_response, ApiEncoding, ApiOperation, BridgeConfig,
    OperationOutput,
};
use crate::network::middleware::REQUEST_ID_HEADER;

/// Fallback handler serving the resource API.
pub async fn api_handler(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let config = state.sessions.config();

    let operation = match parts.method {
        Method::GET => match read_operation(&parts, config) {
            Some(operation) => operation,
            None => return not_found_response(),
        },
        Method::POST => {
            let Some((rid, action)) = action_target(&parts, config) else {
                return not_found_response();
            };
            let params = match read_params(body, config.max_body_bytes).await {
                Ok(params) => params,
                Err(err) => return error_response(&err),
            };
            if action == "new" {
                ApiOperation::Create { rid, params }
            } else {
                ApiOperation::Call {
                    rid,
                    action,
                    params,
                }
            }
        }
        _ => {
            if !parts.uri.path().starts_with(&config.api_path) {
                return not_found_response();
            }
            return error_response(&ResError::method_not_allowed());
        }
    };

    let session = match state.sessions.create(request_context(&parts)) {
        Ok(session) => session,
        Err(err) => return error_response(&err),
    };
    debug!(session = %session.id(), op = operation.name(), rid = operation.rid(), "dispatching");

    respond(session.execute(operation).await)
}

/// Path below the API prefix, if the request is under it and has no
/// trailing slash.
fn api_path<'a>(parts: &'a Parts, config: &BridgeConfig) -> Option<&'a str> {
    let path = parts.uri.path();
    if !path.starts_with(&config.api_path) {
        return None;
    }
    if path.len() > config.api_path.len() && path.ends_with('/') {
        return None;
    }
    Some(path)
}

fn read_operation(parts: &Parts, config: &BridgeConfig) -> Option<ApiOperation> {
    let path = api_path(parts, config)?;
    let rid = path_to_rid(path, parts.uri.query().unwrap_or(""), &config.api_path)?;
    if !is_valid_rid(&rid, RidGrammar::Resource) {
        return None;
    }
    Some(match config.encoding {
        ApiEncoding::Json => ApiOperation::Get { rid },
        ApiEncoding::JsonFlat => ApiOperation::GetFlat { rid },
    })
}

fn action_target(parts: &Parts, config: &BridgeConfig) -> Option<(String, String)> {
    let path = api_path(parts, config)?;
    let (rid, action) =
        path_to_rid_action(path, parts.uri.query().unwrap_or(""), &config.api_path)?;
    if !is_valid_rid(&rid, RidGrammar::Resource) || !is_valid_rid(&action, RidGrammar::Action) {
        return None;
    }
    Some((rid, action))
}

/// Reads the whole body as call parameters.
///
/// An empty or whitespace-only body means no parameters.
async fn read_params(body: Body, limit: usize) -> Result<Option<Box<RawValue>>, ResError> {
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| ResError::bad_request(format!("Error reading request body: {e}")))?;

    // Non-UTF-8 bodies are never blank; they fail as JSON below.
    if std::str::from_utf8(&bytes).is_ok_and(|text| text.trim().is_empty()) {
        return Ok(None);
    }
    serde_json::from_slice::<Box<RawValue>>(&bytes)
        .map(Some)
        .map_err(|e| ResError::bad_request(format!("Error decoding request body: {e}")))
}

fn request_context(parts: &Parts) -> RequestContext {
    let mut context = RequestContext {
        remote_addr: parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr),
        ..RequestContext::default()
    };

    for (name, value) in &parts.headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        context
            .headers
            .entry(name.as_str().to_string())
            .and_modify(|joined| {
                joined.push_str(", ");
                joined.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    if let Some(id) = parts.headers.get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()) {
        context.request_id = id.to_string();
    }
    context
}

/// Turns an operation outcome into the HTTP response.
fn respond(result: Result<OperationOutput, ResError>) -> Response {
    match result {
        Err(err) => error_response(&err),
        Ok(OperationOutput::Empty) => StatusCode::NO_CONTENT.into_response(),
        Ok(OperationOutput::Created { href }) => match HeaderValue::from_str(&href) {
            Ok(location) => (StatusCode::CREATED, [(LOCATION, location)]).into_response(),
            Err(e) => error_response(&ResError::internal(format!(
                "invalid location {href:?}: {e}"
            ))),
        },
        Ok(OperationOutput::Json(value)) => {
            if value.is_null() {
                return StatusCode::NO_CONTENT.into_response();
            }
            match serde_json::to_vec(&value) {
                Ok(body) => json_response(StatusCode::OK, body),
                Err(e) => error_response(&ResError::from(e)),
            }
        }
        Ok(OperationOutput::Raw(raw)) => {
            if raw.get().trim() == "null" {
                return StatusCode::NO_CONTENT.into_response();
            }
            json_response(StatusCode::OK, String::from(raw.get()))
        }
    }
}
