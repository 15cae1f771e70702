//! # Tessera Config
//!
//! Configuration management for Tessera.
//! Supports layered configuration from files and environment variables,
//! validated before use, with runtime refresh.

mod app_config;
mod loader;
mod validation;

pub use app_config::*;
pub use loader::*;
pub use validation::*;
