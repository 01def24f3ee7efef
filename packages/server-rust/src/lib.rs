//! `resbridge` server: serves resources from a resolver over plain HTTP, one
//! ephemeral session per request.

pub mod bridge;
pub mod network;
pub mod resolver;
pub mod traits;

#[cfg(test)]
mod test_support;

pub use bridge::{ApiEncoding, AuthGate, BridgeConfig, HeaderAuthConfig, SessionManager};
pub use network::{NetworkConfig, NetworkModule};
pub use resolver::InMemoryResolver;
pub use traits::{Resolver, Subscription};
