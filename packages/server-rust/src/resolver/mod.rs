//! Resolver implementations.

pub mod memory;

pub use memory::{InMemoryResolver, SeedError};
