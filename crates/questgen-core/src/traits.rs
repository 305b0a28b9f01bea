//! Core trait definitions for the completion service and content storage.
//!
//! These async traits are implemented by the `questgen-providers` and
//! `questgen-storage` crates respectively. The engine only ever sees them as
//! `Arc<dyn ...>` handed in by the caller.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{CellKey, Difficulty, ResponseType};

// ---------------------------------------------------------------------------
// Completion service trait
// ---------------------------------------------------------------------------

/// Trait for LLM backends that complete a prompt.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Human-readable provider name (e.g. "anthropic").
    fn name(&self) -> &str;

    /// Complete a prompt.
    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<CompletionResponse>;

    /// List available models for this provider.
    fn available_models(&self) -> Vec<ModelInfo>;
}

/// Request to the completion service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model identifier.
    pub model: String,
    /// System context (role and house rules).
    pub system_context: String,
    /// The user prompt.
    pub prompt_text: String,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

/// Response from the completion service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// The raw completion text.
    pub text: String,
    /// Model that actually produced the response.
    pub model: String,
    #[serde(default)]
    pub usage: CompletionUsage,
    pub latency_ms: u64,
}

/// Token accounting for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Information about an available model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub provider: String,
    /// Maximum context window size in tokens.
    pub max_context: u32,
    /// Cost per 1K input tokens in USD.
    pub cost_per_1k_input: f64,
    /// Cost per 1K output tokens in USD.
    pub cost_per_1k_output: f64,
}

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// Persistence for generated content. Writes are append-only.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Stored question counts per cell for one test section.
    async fn existing_counts(
        &self,
        test_type: &str,
        section: &str,
    ) -> anyhow::Result<HashMap<CellKey, u32>>;

    /// Most recently stored questions of a sub-skill, newest first.
    async fn recent_questions(
        &self,
        test_type: &str,
        section: &str,
        sub_skill: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<StoredQuestion>>;

    /// Insert an accepted question, returning its id.
    async fn insert_question(&self, question: &NewQuestion) -> anyhow::Result<String>;

    /// Insert a generated passage, returning its id.
    async fn insert_passage(&self, passage: &NewPassage) -> anyhow::Result<String>;
}

/// A validated question ready to be stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQuestion {
    pub test_type: String,
    pub section: String,
    pub mode: String,
    pub sub_skill: String,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    pub response_type: ResponseType,
    #[serde(default)]
    pub passage_id: Option<String>,
    pub question_text: String,
    #[serde(default)]
    pub answer_options: Vec<String>,
    #[serde(default)]
    pub correct_answer: String,
    #[serde(default)]
    pub explanation: String,
    pub generation_model: String,
    /// Review flags raised during validation (e.g. long explanation).
    #[serde(default)]
    pub flags: Vec<String>,
}

impl NewQuestion {
    pub fn cell(&self) -> CellKey {
        CellKey::new(&self.mode, &self.sub_skill, self.difficulty)
    }
}

/// A question as read back from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredQuestion {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub question: NewQuestion,
}

/// A generated reading passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPassage {
    pub test_type: String,
    pub section: String,
    pub mode: String,
    pub passage_type: String,
    pub difficulty: Difficulty,
    pub title: String,
    pub text: String,
    pub word_count: u32,
}

/// A passage as read back from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPassage {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub passage: NewPassage,
}

// ---------------------------------------------------------------------------
// JSON extraction
// ---------------------------------------------------------------------------

/// Extract the JSON payload from a markdown-formatted LLM response.
///
/// Handles:
/// - ```json``` blocks (preferred)
/// - Generic ``` blocks (if no json-specific block found)
/// - Truncated, unclosed blocks
/// - Bare text, trimmed to the outermost `{ ... }`
pub fn extract_json_block(response: &str) -> String {
    let mut json_blocks = Vec::new();
    let mut generic_blocks = Vec::new();
    let mut in_block = false;
    let mut is_json_block = false;
    let mut is_generic_block = false;
    let mut current_block = String::new();

    for line in response.lines() {
        let trimmed = line.trim();

        if !in_block && trimmed.starts_with("```") {
            in_block = true;
            let lang = trimmed.trim_start_matches('`').trim().to_lowercase();
            is_json_block = lang == "json";
            is_generic_block = lang.is_empty();
            current_block.clear();
            continue;
        }

        if in_block && trimmed == "```" {
            in_block = false;
            if is_json_block {
                json_blocks.push(current_block.clone());
            } else if is_generic_block {
                generic_blocks.push(current_block.clone());
            }
            current_block.clear();
            continue;
        }

        if in_block {
            if !current_block.is_empty() {
                current_block.push('\n');
            }
            current_block.push_str(line);
        }
    }

    if in_block && !current_block.is_empty() {
        if is_json_block {
            json_blocks.push(current_block);
        } else if is_generic_block {
            generic_blocks.push(current_block);
        }
    }

    let body = json_blocks
        .into_iter()
        .next()
        .or_else(|| generic_blocks.into_iter().next())
        .unwrap_or_else(|| response.to_string());

    match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => body[start..=end].to_string(),
        _ => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_fenced_block() {
        let input = "Here you go:\n\n```json\n{\"question_text\": \"Q\"}\n```\n\nGood luck!";
        assert_eq!(extract_json_block(input), "{\"question_text\": \"Q\"}");
    }

    #[test]
    fn extract_prefers_json_over_generic() {
        let input = "```\n{\"a\": 1}\n```\n\n```json\n{\"b\": 2}\n```\n";
        assert_eq!(extract_json_block(input), "{\"b\": 2}");
    }

    #[test]
    fn extract_generic_block_fallback() {
        let input = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json_block(input), "{\"a\": 1}");
    }

    #[test]
    fn extract_bare_object_with_chatter() {
        let input = "Sure! {\"correct\": true, \"reason\": \"ok\"} Let me know.";
        assert_eq!(
            extract_json_block(input),
            "{\"correct\": true, \"reason\": \"ok\"}"
        );
    }

    #[test]
    fn extract_truncated_unclosed_block() {
        let input = "```json\n{\"question_text\": \"Q\", \"explanation\": \"E\"}";
        assert!(extract_json_block(input).contains("question_text"));
    }

    #[test]
    fn extract_ignores_other_languages() {
        let input = "```python\nprint('x')\n```\n\n```json\n{\"ok\": true}\n```\n";
        assert_eq!(extract_json_block(input), "{\"ok\": true}");
    }

    #[test]
    fn extract_without_object_returns_trimmed_text() {
        assert_eq!(extract_json_block("  no json here \n"), "no json here");
    }

    #[test]
    fn stored_question_flattens_fields() {
        let stored = StoredQuestion {
            id: "q-1".into(),
            created_at: Utc::now(),
            question: NewQuestion {
                test_type: "Year 7".into(),
                section: "Reading".into(),
                mode: "practice_1".into(),
                sub_skill: "Inference".into(),
                difficulty: Some(2),
                response_type: ResponseType::MultipleChoice,
                passage_id: None,
                question_text: "Why?".into(),
                answer_options: vec!["A) x".into(), "B) y".into()],
                correct_answer: "A".into(),
                explanation: "Because.".into(),
                generation_model: "mock".into(),
                flags: vec![],
            },
        };
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["sub_skill"], "Inference");
        assert_eq!(json["id"], "q-1");
        let back: StoredQuestion = serde_json::from_value(json).unwrap();
        assert_eq!(back, stored);
    }
}
