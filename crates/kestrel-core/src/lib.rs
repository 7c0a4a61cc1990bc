//! Plugin runtime for the Kestrel launcher.
//!
//! - [`registry`]: loaded plugins, their settings and trigger keywords
//! - [`dispatcher`]: concurrent query fan-out with stale-result suppression
//! - [`ranker`]: merge and order result batches
//! - [`invoker`]: run a surfaced result's action
//! - [`host`]: supervised out-of-process plugin hosts
//! - [`runtime`]: the facade front-ends drive

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod host;
pub mod invoker;
pub mod plugin;
pub mod ranker;
pub mod registry;
pub mod runtime;
pub mod services;

mod error;

#[cfg(test)]
mod tests;

pub use error::{Error, Result};
pub use runtime::Runtime;

pub use kestrel_types::*;
