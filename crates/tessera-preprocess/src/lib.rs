//! Preprocessing coordinator for Tessera.
//!
//! [`Preprocessor`] prepares the dataset for a fine-tuning run: it checks the
//! host environment, registers the chat template, materializes the dataset
//! through a [`tessera_core::DatasetLoader`], converts tabular sources to JSON
//! Lines and optionally probes that the base model weights can be resolved.

#![warn(missing_docs)]

mod coordinator;

pub use coordinator::*;
