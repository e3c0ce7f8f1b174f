//! Dataset handling and preprocessing for Tessera.
//!
//! This crate provides:
//! - Chat template registry (ChatML, Llama-3) with conversation formatting
//! - Streaming CSV/TSV to JSON Lines conversion
//! - The process-wide dataset caching switch and its scope guard
//! - Local dataset loading (JSONL, JSON, CSV/TSV, Parquet) for supervised and
//!   preference training

#![warn(missing_docs)]

pub mod cache;
pub mod chat_templates;
pub mod convert;
pub mod dataset;
pub mod loader;

pub use cache::*;
pub use chat_templates::*;
pub use convert::*;
pub use dataset::*;
pub use loader::*;
