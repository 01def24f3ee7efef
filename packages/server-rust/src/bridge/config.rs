//! Bridge-level configuration: API prefix, read encoding, session limits,
//! and the optional header-auth step.

/// How GET responses render a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ApiEncoding {
    /// Single resource snapshot from the resolver; references become links.
    #[default]
    Json,
    /// Whole reachable graph inlined into one document.
    #[value(name = "jsonFlat", alias = "json-flat")]
    JsonFlat,
}

/// What to do when the header-auth action fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum AuthGate {
    /// Ignore the auth outcome and always run the requested operation.
    #[default]
    PassThrough,
    /// Fail the request with the auth error; the operation never runs.
    RequireSuccess,
}

/// Auth action issued by every session before its operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderAuthConfig {
    /// RID of the auth resource.
    pub rid: String,
    /// Action to call on it.
    pub action: String,
    pub gate: AuthGate,
}

impl HeaderAuthConfig {
    /// Parses a `<rid>.<action>` method string, splitting at the last dot.
    ///
    /// Returns `None` if either side is empty.
    #[must_use]
    pub fn from_method(method: &str, gate: AuthGate) -> Option<Self> {
        let (rid, action) = method.rsplit_once('.')?;
        if rid.is_empty() || action.is_empty() {
            return None;
        }
        Some(Self {
            rid: rid.to_string(),
            action: action.to_string(),
            gate,
        })
    }
}

/// Configuration for the HTTP bridge and its ephemeral sessions.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Path prefix of the API, including the trailing slash.
    pub api_path: String,
    pub encoding: ApiEncoding,
    /// Optional auth step run before each operation.
    pub header_auth: Option<HeaderAuthConfig>,
    /// Maximum number of concurrently open sessions. Requests beyond it get 503.
    pub max_sessions: u32,
    /// Maximum nesting depth when flattening a resource graph.
    pub max_flatten_depth: usize,
    /// Maximum accepted POST body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            api_path: "/api/".to_string(),
            encoding: ApiEncoding::Json,
            header_auth: None,
            max_sessions: 1000,
            max_flatten_depth: 256,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}
