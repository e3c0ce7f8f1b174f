//! HuggingFace Hub integration for Tessera.
//!
//! This crate provides:
//! - A best-effort weight probe that warms the hub cache
//! - Host environment checks (launcher config, hub credentials)
//! - Token and cache directory discovery

#![warn(missing_docs)]

mod env;
mod probe;

pub use env::*;
pub use probe::*;
