//! Core types for the hub
//!
//! The types every integration touches: the [`Context`] that tracks who
//! started an action and the [`ServiceCall`] that carries a service
//! invocation to its handler.

mod context;
mod service_call;

pub use context::Context;
pub use service_call::{ServiceCall, SupportsResponse};
