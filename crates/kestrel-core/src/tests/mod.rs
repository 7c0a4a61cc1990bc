//! Test module for kestrel-core
//!
//! Cross-module scenarios:
//! - Registry matching, query parsing and settings
//! - Concurrent dispatch, timeouts, fallback and stale generations
//! - Ranking invariants (property based)
//! - Host supervision: handshake, crash recovery, restart limits
//! - Action invocation for native and host-backed plugins
//! - Plugin discovery and configuration loading

mod discovery_tests;
mod fixtures;
mod invoker_tests;
