//! # Tessera Core
//!
//! Core types and error definitions for Tessera.
//! This crate provides the foundational abstractions shared by the cache,
//! the invalidation pipeline and the server binary.

pub mod error;
pub mod id;
pub mod result;
pub mod telemetry;

pub use error::*;
pub use id::*;
pub use result::*;

// Re-export shaku for dependency injection
pub use shaku::Interface;
