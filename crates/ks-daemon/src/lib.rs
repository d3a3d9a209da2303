//! ks-daemon library target.
//!
//! Exposes the router, state and identity resolvers for integration tests.
//! The binary `main.rs` depends on this library target.

pub mod api_types;
pub mod auth;
pub mod routes;
pub mod state;
