//! The resolver operations a stateless request can turn into, and how each
//! one runs inside a session.

use std::sync::Arc;

use resbridge_core::{ResError, ResourceState};
use serde_json::value::RawValue;

use super::config::BridgeConfig;
use super::flatten::GraphFlattener;
use super::session::SessionScope;
use crate::traits::Resolver;

/// One resolver operation, parsed from a request.
#[derive(Debug)]
pub enum ApiOperation {
    /// Read a single resource snapshot.
    Get { rid: String },
    /// Read a resource with its reachable graph inlined.
    GetFlat { rid: String },
    /// Create a resource under a collection.
    Create {
        rid: String,
        params: Option<Box<RawValue>>,
    },
    /// Invoke an action on a resource.
    Call {
        rid: String,
        action: String,
        params: Option<Box<RawValue>>,
    },
}

/// Successful result of an operation, before HTTP normalization.
#[derive(Debug)]
pub enum OperationOutput {
    /// The operation produced no result.
    Empty,
    Json(serde_json::Value),
    /// Pre-encoded JSON document.
    Raw(Box<RawValue>),
    /// A resource was created at `href`.
    Created { href: String },
}

impl ApiOperation {
    #[must_use]
    pub fn rid(&self) -> &str {
        match self {
            ApiOperation::Get { rid }
            | ApiOperation::GetFlat { rid }
            | ApiOperation::Create { rid, .. }
            | ApiOperation::Call { rid, .. } => rid,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ApiOperation::Get { .. } => "get",
            ApiOperation::GetFlat { .. } => "get_flat",
            ApiOperation::Create { .. } => "create",
            ApiOperation::Call { .. } => "call",
        }
    }

    /// Runs the operation against `resolver` on behalf of `scope`.
    ///
    /// Flattening happens here, while the session still holds the
    /// subscription it rendered from.
    pub(crate) async fn run(
        self,
        resolver: &dyn Resolver,
        scope: &SessionScope,
        config: &BridgeConfig,
    ) -> Result<OperationOutput, ResError> {
        match self {
            ApiOperation::Get { rid } => resolver
                .get_resource(scope, &rid, &config.api_path)
                .await
                .map(|data| data.map_or(OperationOutput::Empty, OperationOutput::Json)),
            ApiOperation::GetFlat { rid } => {
                let subscription = resolver.subscribe(scope, &rid).await?;
                scope.track(Arc::clone(&subscription));
                // An abandoned session has already handed the subscription back.
                if scope.is_disposed() {
                    return Err(ResError::internal(
                        "session disposed before the resource was rendered",
                    ));
                }
                if let ResourceState::Error(err) = subscription.state() {
                    return Err(err);
                }
                let raw = GraphFlattener::new(config.max_flatten_depth).encode(&subscription)?;
                Ok(OperationOutput::Raw(raw))
            }
            ApiOperation::Create { rid, params } => resolver
                .create(scope, &rid, &config.api_path, params.as_deref())
                .await
                .map(|href| OperationOutput::Created { href }),
            ApiOperation::Call {
                rid,
                action,
                params,
            } => resolver
                .call(scope, &rid, &action, params.as_deref())
                .await
                .map(|data| data.map_or(OperationOutput::Empty, OperationOutput::Json)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rid_and_name_accessors() {
        let ops = [
            (ApiOperation::Get { rid: "a".into() }, "get"),
            (ApiOperation::GetFlat { rid: "a".into() }, "get_flat"),
            (
                ApiOperation::Create {
                    rid: "a".into(),
                    params: None,
                },
                "create",
            ),
            (
                ApiOperation::Call {
                    rid: "a".into(),
                    action: "set".into(),
                    params: None,
                },
                "call",
            ),
        ];
        for (op, name) in ops {
            assert_eq!(op.rid(), "a");
            assert_eq!(op.name(), name);
        }
    }
}
