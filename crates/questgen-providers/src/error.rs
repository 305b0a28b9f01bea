//! Provider error types.
//!
//! The error enum is defined in `questgen-core` so the engine can classify
//! failures; it is re-exported here for backend implementations.

pub use questgen_core::error::{provider_error, ProviderError};
