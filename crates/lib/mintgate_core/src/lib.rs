//! # mintgate_core
//!
//! Core domain logic for Mintgate: wallet and Farcaster sign-in, signed
//! sessions, role/permission resolution and the request gate that every
//! privileged route passes through.

pub mod audit;
pub mod authz;
pub mod config;
pub mod gate;
pub mod ids;
pub mod migrate;
pub mod models;
pub mod rate_limit;
pub mod session;
pub mod store;
pub mod verify;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
