//! Scripted completion service for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use questgen_core::traits::{
    CompletionRequest, CompletionResponse, CompletionService, CompletionUsage, ModelInfo,
};

use crate::error::ProviderError;

/// Placeholder in reply text replaced by the rule's 1-based call number.
pub const CALL_NUMBER: &str = "{n}";

/// One scripted reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    Text(String),
    RateLimited { retry_after_ms: u64 },
    AuthenticationFailed,
    Timeout,
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        MockReply::Text(text.into())
    }

    fn resolve(&self, call: u32) -> anyhow::Result<String> {
        match self {
            MockReply::Text(text) => Ok(text.replace(CALL_NUMBER, &call.to_string())),
            MockReply::RateLimited { retry_after_ms } => Err(ProviderError::RateLimited {
                retry_after_ms: *retry_after_ms,
            }
            .into()),
            MockReply::AuthenticationFailed => {
                Err(ProviderError::AuthenticationFailed("mock credentials rejected".into()).into())
            }
            MockReply::Timeout => Err(ProviderError::Timeout(1).into()),
        }
    }
}

struct Rule {
    needle: String,
    replies: Vec<MockReply>,
    calls: u32,
}

/// A completion service that answers from scripted rules.
///
/// Rules are checked in the order they were added; the first whose needle
/// occurs in the prompt answers. A rule with several replies plays them in
/// order and then repeats the last one.
pub struct MockCompletion {
    rules: Mutex<Vec<Rule>>,
    default_reply: MockReply,
    call_count: AtomicU32,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl Default for MockCompletion {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCompletion {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            default_reply: MockReply::text("{}"),
            call_count: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that always returns the same text.
    pub fn with_fixed_response(text: &str) -> Self {
        Self::new().with_default(MockReply::text(text))
    }

    pub fn with_default(mut self, reply: MockReply) -> Self {
        self.default_reply = reply;
        self
    }

    /// Answer prompts containing `needle` with `text`.
    pub fn on(self, needle: &str, text: &str) -> Self {
        self.on_sequence(needle, vec![MockReply::text(text)])
    }

    /// Answer prompts containing `needle` with `replies`, in order.
    pub fn on_sequence(self, needle: &str, replies: Vec<MockReply>) -> Self {
        lock(&self.rules).push(Rule {
            needle: needle.to_string(),
            replies,
            calls: 0,
        });
        self
    }

    /// Total calls made.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Calls answered by the rule for `needle`.
    pub fn calls_matching(&self, needle: &str) -> u32 {
        lock(&self.rules)
            .iter()
            .filter(|r| r.needle == needle)
            .map(|r| r.calls)
            .sum()
    }

    /// Every request received, in arrival order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }

    /// Requests whose prompt contains `needle`.
    pub fn requests_matching(&self, needle: &str) -> Vec<CompletionRequest> {
        lock(&self.requests)
            .iter()
            .filter(|r| r.prompt_text.contains(needle))
            .cloned()
            .collect()
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        lock(&self.requests).last().cloned()
    }

    /// Calls per rule needle, for debugging test failures.
    pub fn call_breakdown(&self) -> HashMap<String, u32> {
        lock(&self.rules)
            .iter()
            .map(|r| (r.needle.clone(), r.calls))
            .collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl CompletionService for MockCompletion {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<CompletionResponse> {
        let total = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.requests).push(request.clone());

        let text = {
            let mut rules = lock(&self.rules);
            match rules
                .iter_mut()
                .find(|r| request.prompt_text.contains(&r.needle))
            {
                Some(rule) => {
                    rule.calls += 1;
                    let index = (rule.calls as usize - 1).min(rule.replies.len().saturating_sub(1));
                    match rule.replies.get(index) {
                        Some(reply) => reply.resolve(rule.calls),
                        None => self.default_reply.resolve(rule.calls),
                    }
                }
                None => self.default_reply.resolve(total),
            }
        }?;

        Ok(CompletionResponse {
            usage: CompletionUsage {
                input_tokens: (request.prompt_text.len() / 4) as u32,
                output_tokens: (text.len() / 4) as u32,
            },
            text,
            model: request.model.clone(),
            latency_ms: 1,
        })
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        vec![ModelInfo {
            id: "mock-model".into(),
            name: "Mock Model".into(),
            provider: "mock".into(),
            max_context: 100_000,
            cost_per_1k_input: 0.0,
            cost_per_1k_output: 0.0,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use questgen_core::error::provider_error;

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest {
            model: "mock-model".into(),
            system_context: String::new(),
            prompt_text: prompt.into(),
            max_tokens: 100,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn fixed_response() {
        let mock = MockCompletion::with_fixed_response("{\"ok\": true}");
        let response = mock.complete(&request("anything")).await.unwrap();
        assert_eq!(response.text, "{\"ok\": true}");
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn first_matching_rule_answers() {
        let mock = MockCompletion::new()
            .on("verify", "{\"correct\": true}")
            .on("write", "question {n}");

        assert_eq!(
            mock.complete(&request("please write")).await.unwrap().text,
            "question 1"
        );
        assert_eq!(
            mock.complete(&request("write then verify")).await.unwrap().text,
            "{\"correct\": true}"
        );
        assert_eq!(
            mock.complete(&request("write again")).await.unwrap().text,
            "question 2"
        );
        assert_eq!(mock.calls_matching("write"), 2);
        assert_eq!(mock.calls_matching("verify"), 1);
        assert_eq!(mock.requests_matching("again").len(), 1);
    }

    #[tokio::test]
    async fn sequence_repeats_last_reply() {
        let mock = MockCompletion::new().on_sequence(
            "dup",
            vec![
                MockReply::text("{\"duplicate\": true}"),
                MockReply::text("{\"duplicate\": false}"),
            ],
        );
        let texts: Vec<String> = complete_n(&mock, 3).await;
        assert_eq!(
            texts,
            vec![
                "{\"duplicate\": true}",
                "{\"duplicate\": false}",
                "{\"duplicate\": false}"
            ]
        );
    }

    async fn complete_n(mock: &MockCompletion, n: usize) -> Vec<String> {
        let mut out = Vec::new();
        for _ in 0..n {
            out.push(mock.complete(&request("dup check")).await.unwrap().text);
        }
        out
    }

    #[tokio::test]
    async fn scripted_failures_are_provider_errors() {
        let mock = MockCompletion::new().on_sequence(
            "x",
            vec![
                MockReply::RateLimited {
                    retry_after_ms: 10,
                },
                MockReply::AuthenticationFailed,
            ],
        );
        let first = mock.complete(&request("x")).await.unwrap_err();
        assert_eq!(provider_error(&first).unwrap().retry_after_ms(), Some(10));
        let second = mock.complete(&request("x")).await.unwrap_err();
        assert!(provider_error(&second).unwrap().is_permanent());
        assert_eq!(mock.requests().len(), 2);
    }
}
