use std::collections::BTreeMap;
use std::net::SocketAddr;

/// Per-request context carried into an ephemeral session.
/// Resolvers read it for header-derived authentication and audit.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Value of the `x-request-id` header assigned at the transport edge.
    pub request_id: String,
    /// Peer address, when the listener exposes it.
    pub remote_addr: Option<SocketAddr>,
    /// Request headers with lowercase names. Repeated headers are joined with `, `.
    pub headers: BTreeMap<String, String>,
}

impl RequestContext {
    /// Looks up a header by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut ctx = RequestContext::default();
        ctx.headers
            .insert("authorization".to_string(), "Bearer abc".to_string());
        assert_eq!(ctx.header("Authorization"), Some("Bearer abc"));
        assert_eq!(ctx.header("cookie"), None);
    }
}
