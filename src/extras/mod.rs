//! Optional source-level components that build on the protocol engine.
//! Each is behind its own feature flag so the core stays dependency-light.

#[cfg(feature = "config")]
pub mod config;
