//! Three-stage candidate validation: structure, correctness, duplicate.
//!
//! Stages short-circuit. Only the structure check is local; the other two
//! ask the completion service for a JSON verdict.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::candidate::{CandidateState, QuestionCandidate, ValidationResult, ValidationStage};
use crate::error::GenerationError;
use crate::generator::{word_count, PassageContext};
use crate::model::ResponseType;
use crate::traits::{
    extract_json_block, CompletionRequest, CompletionService, StorageAdapter, StoredQuestion,
};

/// Header line of answer-verification prompts.
pub const CORRECTNESS_TASK_HEADER: &str = "## Task: verify answer";
/// Header line of duplicate-check prompts.
pub const DUPLICATE_TASK_HEADER: &str = "## Task: duplicate check";

const VALIDATION_SYSTEM_CONTEXT: &str = "You are a careful exam reviewer. Respond ONLY with the requested JSON object.";

/// Validator settings.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Answer options a multiple-choice candidate must have.
    pub expected_options: usize,
    /// Explanations longer than this are flagged.
    pub explanation_word_limit: usize,
    /// Reject instead of flag when the explanation is too long.
    pub reject_long_explanations: bool,
    /// Stored questions of the same sub-skill compared for duplicates.
    pub duplicate_window: usize,
    /// Model used for verdict calls.
    pub model: String,
    pub max_tokens: u32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            expected_options: 4,
            explanation_word_limit: 200,
            reject_long_explanations: false,
            duplicate_window: 20,
            model: "claude-haiku-4-5".to_string(),
            max_tokens: 512,
        }
    }
}

/// Where a candidate will be stored, and the passage it was written against.
#[derive(Clone, Copy)]
pub struct ValidationScope<'a> {
    pub storage: &'a dyn StorageAdapter,
    pub test_type: &'a str,
    pub section: &'a str,
    pub passage: Option<&'a PassageContext>,
}

/// Result of the local structure check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureOutcome {
    pub result: ValidationResult,
    pub flags: Vec<String>,
}

#[derive(Deserialize)]
struct CorrectnessVerdict {
    correct: bool,
    #[serde(default)]
    reason: String,
}

#[derive(Deserialize)]
struct DuplicateVerdict {
    duplicate: bool,
    #[serde(default)]
    reason: String,
}

pub struct Validator {
    completion: Arc<dyn CompletionService>,
    config: ValidationConfig,
}

impl Validator {
    pub fn new(completion: Arc<dyn CompletionService>, config: ValidationConfig) -> Self {
        Self { completion, config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Run all stages against `candidate`, recording each outcome on it.
    ///
    /// `Ok` means the pipeline ran to a verdict: the candidate is either
    /// rejected or has passed every stage. `Err` means a verdict call or the
    /// history read failed and the candidate should be discarded.
    pub async fn validate(
        &self,
        candidate: &mut QuestionCandidate,
        scope: ValidationScope<'_>,
    ) -> Result<()> {
        self.validate_content(candidate, scope.passage).await?;
        self.validate_novelty(candidate, scope).await
    }

    /// Structure and correctness stages.
    pub async fn validate_content(
        &self,
        candidate: &mut QuestionCandidate,
        passage: Option<&PassageContext>,
    ) -> Result<()> {
        let structure = check_structure(candidate, &self.config);
        candidate.flags.extend(structure.flags);
        let passed = structure.result.passed;
        candidate.record(structure.result);
        if !passed {
            return Ok(());
        }

        let correctness = self.check_correctness(candidate, passage).await?;
        candidate.record(correctness);
        Ok(())
    }

    /// Duplicate stage. Does nothing unless the content stages passed.
    ///
    /// Callers that insert after a pass must hold the sub-skill's write lock
    /// across this call and the insert.
    pub async fn validate_novelty(
        &self,
        candidate: &mut QuestionCandidate,
        scope: ValidationScope<'_>,
    ) -> Result<()> {
        if candidate.state != CandidateState::CorrectnessChecked {
            return Ok(());
        }
        let history = scope
            .storage
            .recent_questions(
                scope.test_type,
                scope.section,
                &candidate.sub_skill,
                self.config.duplicate_window,
            )
            .await
            .context("reading recent questions for duplicate check")?;
        let duplicate = self.check_duplicate(candidate, &history).await?;
        candidate.record(duplicate);
        Ok(())
    }

    /// Ask the validation model whether the marked answer is right.
    pub async fn check_correctness(
        &self,
        candidate: &QuestionCandidate,
        passage: Option<&PassageContext>,
    ) -> Result<ValidationResult> {
        let Some(fields) = &candidate.fields else {
            return Ok(ValidationResult::fail(
                ValidationStage::Correctness,
                "no parsed question",
            ));
        };
        if candidate.response_type == ResponseType::Extended {
            return Ok(ValidationResult {
                stage: ValidationStage::Correctness,
                passed: true,
                reason: Some("skipped: writing prompts are unscored".to_string()),
            });
        }

        let mut prompt = String::new();
        prompt.push_str(&format!("{CORRECTNESS_TASK_HEADER}\n"));
        prompt.push_str("Solve the question yourself, then decide whether the marked answer is the single correct one.\n");
        if let Some(passage) = passage {
            prompt.push_str(&format!("\nPassage:\n{}\n\n", passage.text));
        }
        prompt.push_str(&format!("Question: {}\n", fields.question_text));
        for option in &fields.answer_options {
            prompt.push_str(&format!("  {option}\n"));
        }
        prompt.push_str(&format!("Marked answer: {}\n", fields.correct_answer));
        prompt.push_str(&format!("Explanation: {}\n", fields.explanation));
        prompt.push_str("\nRespond with JSON: {\"correct\": true|false, \"reason\": string}\n");

        let text = self.verdict(prompt).await?;
        let verdict: CorrectnessVerdict = serde_json::from_str(&extract_json_block(&text))
            .map_err(|e| GenerationError::ExternalService(format!("unparseable correctness verdict: {e}")))?;

        Ok(if verdict.correct {
            ValidationResult::pass(ValidationStage::Correctness)
        } else {
            let reason = if verdict.reason.is_empty() {
                "marked answer is not correct".to_string()
            } else {
                verdict.reason
            };
            ValidationResult::fail(ValidationStage::Correctness, reason)
        })
    }

    /// Compare against recently stored questions of the same sub-skill.
    pub async fn check_duplicate(
        &self,
        candidate: &QuestionCandidate,
        history: &[StoredQuestion],
    ) -> Result<ValidationResult> {
        let Some(fields) = &candidate.fields else {
            return Ok(ValidationResult::fail(
                ValidationStage::Duplicate,
                "no parsed question",
            ));
        };
        if history.is_empty() {
            return Ok(ValidationResult::pass(ValidationStage::Duplicate));
        }

        let text = normalize(&fields.question_text);
        if history
            .iter()
            .any(|stored| normalize(&stored.question.question_text) == text)
        {
            return Ok(ValidationResult::fail(
                ValidationStage::Duplicate,
                "duplicate: identical to a stored question",
            ));
        }

        let mut prompt = String::new();
        prompt.push_str(&format!("{DUPLICATE_TASK_HEADER}\n"));
        prompt.push_str("Decide whether the new question tests the same thing in the same way as any existing one.\n");
        prompt.push_str(&format!("New question: {}\n", fields.question_text));
        prompt.push_str("\nExisting questions:\n");
        for (i, stored) in history.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, stored.question.question_text));
        }
        prompt.push_str("\nRespond with JSON: {\"duplicate\": true|false, \"reason\": string}\n");

        let text = self.verdict(prompt).await?;
        let verdict: DuplicateVerdict = serde_json::from_str(&extract_json_block(&text))
            .map_err(|e| GenerationError::ExternalService(format!("unparseable duplicate verdict: {e}")))?;

        Ok(if verdict.duplicate {
            let reason = if verdict.reason.is_empty() {
                "duplicate".to_string()
            } else {
                format!("duplicate: {}", verdict.reason)
            };
            ValidationResult::fail(ValidationStage::Duplicate, reason)
        } else {
            ValidationResult::pass(ValidationStage::Duplicate)
        })
    }

    async fn verdict(&self, prompt: String) -> Result<String> {
        let response = self
            .completion
            .complete(&CompletionRequest {
                model: self.config.model.clone(),
                system_context: VALIDATION_SYSTEM_CONTEXT.to_string(),
                prompt_text: prompt,
                max_tokens: self.config.max_tokens,
                temperature: 0.0,
            })
            .await?;
        Ok(response.text)
    }
}

/// Local shape checks. Never calls out.
pub fn check_structure(candidate: &QuestionCandidate, config: &ValidationConfig) -> StructureOutcome {
    let fail = |reason: String| StructureOutcome {
        result: ValidationResult::fail(ValidationStage::Structure, reason),
        flags: Vec::new(),
    };

    let Some(fields) = &candidate.fields else {
        return fail("response could not be parsed as a question object".to_string());
    };
    if fields.question_text.trim().is_empty() {
        return fail("question_text is empty".to_string());
    }

    if candidate.response_type == ResponseType::MultipleChoice {
        if fields.answer_options.len() != config.expected_options {
            return fail(format!(
                "expected {} answer options, got {}",
                config.expected_options,
                fields.answer_options.len()
            ));
        }
        if fields.answer_options.iter().any(|o| o.trim().is_empty()) {
            return fail("an answer option is empty".to_string());
        }
        if fields.correct_answer.trim().is_empty() {
            return fail("correct_answer is empty".to_string());
        }
        if !fields
            .answer_options
            .iter()
            .any(|o| answer_matches(&fields.correct_answer, o))
        {
            return fail(format!(
                "correct answer '{}' is not one of the options",
                fields.correct_answer.trim()
            ));
        }
        if fields.explanation.trim().is_empty() {
            return fail("explanation is empty".to_string());
        }
    }

    let mut flags = Vec::new();
    let words = word_count(&fields.explanation) as usize;
    if words > config.explanation_word_limit {
        tracing::warn!(
            sub_skill = %candidate.sub_skill,
            words,
            limit = config.explanation_word_limit,
            "suspiciously long explanation"
        );
        if config.reject_long_explanations {
            return fail(format!(
                "explanation has {words} words, limit is {}",
                config.explanation_word_limit
            ));
        }
        flags.push(format!("long explanation ({words} words)"));
    }

    StructureOutcome {
        result: ValidationResult::pass(ValidationStage::Structure),
        flags,
    }
}

/// Split a lettered option such as `B) text`, `(B) text` or `B. text` into
/// its label and body. Numeric text like `3.5 km` carries no label.
fn split_label(option: &str) -> Option<(char, &str)> {
    let s = option.trim();
    let s = s.strip_prefix('(').unwrap_or(s);
    let mut chars = s.chars();
    let letter = chars.next().filter(|c| c.is_ascii_alphabetic())?;
    let rest = chars.as_str();
    let rest = rest.strip_prefix([')', '.'])?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some((letter, rest.trim()))
}

/// Whether `correct` names `option`, by full text, label or body.
pub fn answer_matches(correct: &str, option: &str) -> bool {
    let correct = correct.trim();
    if correct.eq_ignore_ascii_case(option.trim()) {
        return true;
    }
    if let Some((label, body)) = split_label(option) {
        let bare = correct.trim_start_matches('(').trim_end_matches([')', '.']).trim();
        let mut bare_chars = bare.chars();
        if bare_chars.next().is_some_and(|c| c.eq_ignore_ascii_case(&label))
            && bare_chars.next().is_none()
        {
            return true;
        }
        if !body.is_empty() && correct.eq_ignore_ascii_case(body) {
            return true;
        }
    }
    false
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
