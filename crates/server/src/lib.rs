//! HTTP surface of the scrivener service.
//!
//! The binary in `main.rs` wires collaborators together; the router and its
//! state live here so integration tests can drive them in-process.

pub mod api;
pub mod metrics;
pub mod state;
