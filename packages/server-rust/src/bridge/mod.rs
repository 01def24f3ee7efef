//! The stateless-request bridge: sessions, operations, flattening, and
//! error classification.

pub mod classify;
pub mod config;
pub mod flatten;
pub mod operation;
pub mod session;

pub use classify::{
    error_response, json_response, not_found_response, prepare_static_bodies, status_for,
    JSON_CONTENT_TYPE,
};
pub use config::{ApiEncoding, AuthGate, BridgeConfig, HeaderAuthConfig};
pub use flatten::{FlattenError, GraphFlattener};
pub use operation::{ApiOperation, OperationOutput};
pub use session::{EphemeralSession, SessionId, SessionManager, SessionScope};
