//! `resbridge` core: RID grammar, HTTP path mapping, resource values, and domain errors.

pub mod context;
pub mod error;
pub mod rid;
pub mod types;

pub use context::RequestContext;
pub use error::{codes, ErrorKind, ResError};
pub use rid::{is_valid_rid, path_to_rid, path_to_rid_action, rid_to_path, RidGrammar};
pub use types::{ResourceState, Value};
