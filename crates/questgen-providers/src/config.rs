//! Tool configuration and provider factory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use questgen_core::engine::EngineConfig;
use questgen_core::traits::CompletionService;
use questgen_core::validator::ValidationConfig;

use crate::anthropic::AnthropicProvider;
use crate::openai::OpenAiProvider;

/// Configuration for a single completion provider.
///
/// Note: Custom Debug impl masks API keys to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// OpenAI or any OpenAI-compatible endpoint. The key may be empty for
    /// local servers.
    OpenAI {
        #[serde(default)]
        api_key: String,
        #[serde(default)]
        base_url: Option<String>,
        #[serde(default)]
        org_id: Option<String>,
    },
    Anthropic {
        api_key: String,
        #[serde(default)]
        base_url: Option<String>,
    },
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderConfig::OpenAI {
                api_key,
                base_url,
                org_id,
            } => f
                .debug_struct("OpenAI")
                .field("api_key", &mask(api_key))
                .field("base_url", base_url)
                .field("org_id", org_id)
                .finish(),
            ProviderConfig::Anthropic {
                api_key: _,
                base_url,
            } => f
                .debug_struct("Anthropic")
                .field("api_key", &"***")
                .field("base_url", base_url)
                .finish(),
        }
    }
}

fn mask(key: &str) -> &'static str {
    if key.is_empty() {
        ""
    } else {
        "***"
    }
}

/// Validation settings as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSettings {
    /// Overrides the blueprint's `answer_options` when set.
    #[serde(default)]
    pub expected_options: Option<usize>,
    #[serde(default = "default_explanation_limit")]
    pub explanation_word_limit: usize,
    #[serde(default)]
    pub reject_long_explanations: bool,
    #[serde(default = "default_duplicate_window")]
    pub duplicate_window: usize,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            expected_options: None,
            explanation_word_limit: default_explanation_limit(),
            reject_long_explanations: false,
            duplicate_window: default_duplicate_window(),
        }
    }
}

/// Where accepted content is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Keep everything in memory for the lifetime of the process.
    Memory,
    /// Append-only JSON-lines files in `dir`.
    Jsonl { dir: PathBuf },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Jsonl {
            dir: PathBuf::from("./questgen-data"),
        }
    }
}

/// Top-level questgen configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestgenConfig {
    /// Provider configurations keyed by name.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// Provider used when none is named on the command line.
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// Model that writes questions and passages.
    #[serde(default = "default_generation_model")]
    pub generation_model: String,
    /// Model that answers correctness and duplicate checks.
    #[serde(default = "default_validation_model")]
    pub validation_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Attempts per task, first try included.
    #[serde(default = "default_attempts")]
    pub max_attempts_per_task: u32,
    /// Optional cap on attempts across a whole run.
    #[serde(default)]
    pub max_total_attempts: Option<u32>,
    /// Base delay before retrying after a provider error, in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Max concurrent lanes.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default)]
    pub validation: ValidationSettings,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Output directory for run reports.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_provider() -> String {
    "anthropic".to_string()
}
fn default_generation_model() -> String {
    "claude-sonnet-4-5".to_string()
}
fn default_validation_model() -> String {
    "claude-haiku-4-5".to_string()
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_temperature() -> f64 {
    0.7
}
fn default_attempts() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1000
}
fn default_parallelism() -> usize {
    4
}
fn default_explanation_limit() -> usize {
    200
}
fn default_duplicate_window() -> usize {
    20
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./questgen-results")
}

impl Default for QuestgenConfig {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider(),
            generation_model: default_generation_model(),
            validation_model: default_validation_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_attempts_per_task: default_attempts(),
            max_total_attempts: None,
            retry_delay_ms: default_retry_delay(),
            parallelism: default_parallelism(),
            validation: ValidationSettings::default(),
            storage: StorageConfig::default(),
            output_dir: default_output_dir(),
        }
    }
}

impl QuestgenConfig {
    /// Engine settings for a blueprint with `answer_options` options per question.
    pub fn to_engine_config(&self, answer_options: usize) -> EngineConfig {
        EngineConfig {
            parallelism: self.parallelism.max(1),
            max_attempts_per_task: self.max_attempts_per_task.max(1),
            max_total_attempts: self.max_total_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            generation_model: self.generation_model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system_context_override: None,
            validation: ValidationConfig {
                expected_options: self.validation.expected_options.unwrap_or(answer_options),
                explanation_word_limit: self.validation.explanation_word_limit,
                reject_long_explanations: self.validation.reject_long_explanations,
                duplicate_window: self.validation.duplicate_window,
                model: self.validation_model.clone(),
                ..ValidationConfig::default()
            },
        }
    }

    /// Look up a provider by name, falling back to the default provider.
    pub fn provider(&self, name: Option<&str>) -> Result<(&str, &ProviderConfig)> {
        let name = name.unwrap_or(self.default_provider.as_str());
        self.providers
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
            .with_context(|| {
                let mut known: Vec<&str> = self.providers.keys().map(String::as_str).collect();
                known.sort_unstable();
                format!(
                    "provider '{name}' is not configured (configured: {})",
                    if known.is_empty() {
                        "none".to_string()
                    } else {
                        known.join(", ")
                    }
                )
            })
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

fn resolve_provider_config(config: &ProviderConfig) -> ProviderConfig {
    match config {
        ProviderConfig::OpenAI {
            api_key,
            base_url,
            org_id,
        } => ProviderConfig::OpenAI {
            api_key: resolve_env_vars(api_key),
            base_url: base_url.as_ref().map(|u| resolve_env_vars(u)),
            org_id: org_id.as_ref().map(|o| resolve_env_vars(o)),
        },
        ProviderConfig::Anthropic { api_key, base_url } => ProviderConfig::Anthropic {
            api_key: resolve_env_vars(api_key),
            base_url: base_url.as_ref().map(|u| resolve_env_vars(u)),
        },
    }
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `questgen.toml` in the current directory
/// 2. `~/.config/questgen/config.toml`
///
/// Environment variable overrides: `QUESTGEN_OPENAI_KEY`, `QUESTGEN_ANTHROPIC_KEY`.
pub fn load_config() -> Result<QuestgenConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<QuestgenConfig> {
    let config_path = match path {
        Some(p) if p.exists() => Some(p.to_path_buf()),
        Some(p) => anyhow::bail!("config file not found: {}", p.display()),
        None => {
            let local = PathBuf::from("questgen.toml");
            if local.exists() {
                Some(local)
            } else {
                dirs_path()
                    .map(|home| home.join("config.toml"))
                    .filter(|global| global.exists())
            }
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            let config = parse_config(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?;
            tracing::debug!(path = %path.display(), "loaded config");
            config
        }
        None => QuestgenConfig::default(),
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse config text and resolve `${VAR}` references in provider entries.
pub fn parse_config(content: &str) -> Result<QuestgenConfig> {
    let mut config: QuestgenConfig = toml::from_str(content)?;
    config.providers = config
        .providers
        .iter()
        .map(|(k, v)| (k.clone(), resolve_provider_config(v)))
        .collect();
    Ok(config)
}

fn apply_env_overrides(config: &mut QuestgenConfig) {
    if let Ok(key) = std::env::var("QUESTGEN_ANTHROPIC_KEY") {
        match config.providers.get_mut("anthropic") {
            Some(ProviderConfig::Anthropic { api_key, .. }) => *api_key = key,
            _ => {
                config.providers.insert(
                    "anthropic".into(),
                    ProviderConfig::Anthropic {
                        api_key: key,
                        base_url: None,
                    },
                );
            }
        }
    }

    if let Ok(key) = std::env::var("QUESTGEN_OPENAI_KEY") {
        match config.providers.get_mut("openai") {
            Some(ProviderConfig::OpenAI { api_key, .. }) => *api_key = key,
            _ => {
                config.providers.insert(
                    "openai".into(),
                    ProviderConfig::OpenAI {
                        api_key: key,
                        base_url: None,
                        org_id: None,
                    },
                );
            }
        }
    }
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("questgen"))
}

/// Create a completion service from its configuration.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn CompletionService>> {
    match config {
        ProviderConfig::Anthropic { api_key, base_url } => {
            if api_key.is_empty() {
                anyhow::bail!("anthropic provider has no API key (set QUESTGEN_ANTHROPIC_KEY)");
            }
            Ok(Arc::new(AnthropicProvider::new(api_key, base_url.clone())?))
        }
        ProviderConfig::OpenAI {
            api_key,
            base_url,
            org_id,
        } => Ok(Arc::new(OpenAiProvider::new(
            api_key,
            base_url.clone(),
            org_id.clone(),
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("_QUESTGEN_TEST_VAR", "hello");
        assert_eq!(resolve_env_vars("${_QUESTGEN_TEST_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix_${_QUESTGEN_TEST_VAR}_suffix"),
            "prefix_hello_suffix"
        );
        assert_eq!(resolve_env_vars("${_QUESTGEN_UNSET_VAR_X}"), "");
        std::env::remove_var("_QUESTGEN_TEST_VAR");
    }

    #[test]
    fn default_config() {
        let config = QuestgenConfig::default();
        assert_eq!(config.default_provider, "anthropic");
        assert_eq!(config.parallelism, 4);
        assert_eq!(config.max_attempts_per_task, 3);
        assert_eq!(config.validation.duplicate_window, 20);
        assert!(matches!(config.storage, StorageConfig::Jsonl { .. }));
    }

    #[test]
    fn parse_full_config() {
        std::env::set_var("_QUESTGEN_CFG_KEY", "sk-from-env");
        let toml_str = r#"
default_provider = "local"
generation_model = "llama3"
max_total_attempts = 50
retry_delay_ms = 10

[providers.anthropic]
type = "anthropic"
api_key = "${_QUESTGEN_CFG_KEY}"

[providers.local]
type = "openai"
base_url = "http://localhost:8080"

[validation]
expected_options = 5
reject_long_explanations = true

[storage]
type = "memory"
"#;
        let config = parse_config(toml_str).unwrap();
        std::env::remove_var("_QUESTGEN_CFG_KEY");

        assert_eq!(config.providers.len(), 2);
        match config.providers.get("anthropic") {
            Some(ProviderConfig::Anthropic { api_key, .. }) => assert_eq!(api_key, "sk-from-env"),
            other => panic!("unexpected provider {other:?}"),
        }
        assert_eq!(config.storage, StorageConfig::Memory);
        assert_eq!(config.max_total_attempts, Some(50));
        assert_eq!(config.validation.explanation_word_limit, 200);

        let (name, _) = config.provider(None).unwrap();
        assert_eq!(name, "local");
    }

    #[test]
    fn engine_config_takes_blueprint_options_unless_overridden() {
        let mut config = QuestgenConfig::default();
        assert_eq!(config.to_engine_config(4).validation.expected_options, 4);
        config.validation.expected_options = Some(5);
        let engine = config.to_engine_config(4);
        assert_eq!(engine.validation.expected_options, 5);
        assert_eq!(engine.validation.model, "claude-haiku-4-5");
        assert_eq!(engine.retry_delay, Duration::from_millis(1000));
    }

    #[test]
    fn unknown_provider_lists_configured() {
        let config = parse_config(
            r#"
[providers.openai]
type = "openai"
api_key = "sk"
"#,
        )
        .unwrap();
        let err = config.provider(Some("gemini")).unwrap_err().to_string();
        assert!(err.contains("'gemini' is not configured"));
        assert!(err.contains("openai"));
    }

    #[test]
    fn debug_masks_keys() {
        let config = ProviderConfig::Anthropic {
            api_key: "sk-secret".into(),
            base_url: None,
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn load_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("questgen.toml");
        std::fs::write(&path, "parallelism = 2\n[storage]\ntype = \"jsonl\"\ndir = \"data\"\n")
            .unwrap();
        let config = load_config_from(Some(&path)).unwrap();
        assert_eq!(config.parallelism, 2);
        assert_eq!(
            config.storage,
            StorageConfig::Jsonl {
                dir: PathBuf::from("data")
            }
        );
        assert!(load_config_from(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn create_provider_requires_anthropic_key() {
        let config = ProviderConfig::Anthropic {
            api_key: String::new(),
            base_url: None,
        };
        assert!(create_provider(&config).is_err());
        let local = ProviderConfig::OpenAI {
            api_key: String::new(),
            base_url: Some("http://localhost:1".into()),
            org_id: None,
        };
        assert_eq!(create_provider(&local).unwrap().name(), "openai");
    }
}
