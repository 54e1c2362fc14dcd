//! HTTP API gateway and command-driven sync runtime.
//!
//! `gateway` owns the shared transport: one `reqwest` client, bearer-token
//! attachment, and the global unauthorized (401) signal. `runtime` owns the
//! held conversation/message lists and drives the per-thread polling loop
//! and the send pipeline.

/// Shared HTTP transport with bearer attachment and the 401 signal.
pub mod gateway;
/// Command-driven runtime: sync loop, membership gating, send pipeline.
pub mod runtime;

pub use gateway::{ApiGateway, MatchApi, UnauthorizedSignal};
pub use runtime::{ClientRuntimeHandle, RuntimeConfig, spawn_runtime};
