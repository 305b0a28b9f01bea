//! questgen-providers: completion service integrations.
//!
//! Implements the `CompletionService` trait for Anthropic and OpenAI-compatible
//! endpoints, plus a scripted mock for tests, and loads the tool configuration.

pub mod anthropic;
pub mod config;
pub mod error;
pub mod http;
pub mod mock;
pub mod openai;

pub use config::{
    create_provider, load_config, load_config_from, ProviderConfig, QuestgenConfig,
    StorageConfig,
};
pub use error::ProviderError;
pub use mock::{MockCompletion, MockReply};
