//! Core types, traits, and configuration for Tessera dataset preprocessing.
//!
//! This crate provides the foundational abstractions shared by the rest of the
//! workspace, including:
//!
//! - The run configuration (`RunConfig`) and its YAML loader with overrides
//! - Collaborator traits for dataset loading, weight probing and environment checks
//! - Error handling infrastructure
//! - Secure handling of secrets (tokens, credentials)

#![warn(missing_docs)]

mod config;
mod error;
mod secrets;
mod traits;
mod types;

pub use config::*;
pub use error::*;
pub use secrets::SecretString;
pub use traits::*;
pub use types::*;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::*;
    pub use crate::error::{Result, TesseraError};
    pub use crate::secrets::SecretString;
    pub use crate::traits::*;
    pub use crate::types::*;
}
