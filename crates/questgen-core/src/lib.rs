//! questgen-core: distribution, gap detection, planning and validation.
//!
//! This crate defines the blueprint data model, the deterministic
//! difficulty and example distributors, and the engine that fills content
//! gaps through the `CompletionService` and `StorageAdapter` traits.

pub mod candidate;
pub mod difficulty;
pub mod engine;
pub mod error;
pub mod examples;
pub mod gaps;
pub mod generator;
pub mod model;
pub mod parser;
pub mod plan;
pub mod report;
pub mod shuffle;
pub mod task;
pub mod traits;
pub mod validator;
