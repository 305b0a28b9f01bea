//! Generated question candidates and their validation lifecycle.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Difficulty, ResponseType};

/// Validation pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStage {
    Structure,
    Correctness,
    Duplicate,
}

impl fmt::Display for ValidationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationStage::Structure => write!(f, "structure"),
            ValidationStage::Correctness => write!(f, "correctness"),
            ValidationStage::Duplicate => write!(f, "duplicate"),
        }
    }
}

/// Outcome of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub stage: ValidationStage,
    pub passed: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ValidationResult {
    pub fn pass(stage: ValidationStage) -> Self {
        Self {
            stage,
            passed: true,
            reason: None,
        }
    }

    pub fn fail(stage: ValidationStage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            passed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Why a candidate was discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// `None` when the candidate was dropped outside the validation stages
    /// (failed verdict call, failed insert).
    pub stage: Option<ValidationStage>,
    pub reason: String,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "{stage}: {}", self.reason),
            None => write!(f, "discarded: {}", self.reason),
        }
    }
}

/// Candidate lifecycle.
///
/// `Created -> StructureChecked -> CorrectnessChecked -> DuplicateChecked ->
/// Accepted`, with any failure going straight to `Rejected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CandidateState {
    Created,
    StructureChecked,
    CorrectnessChecked,
    DuplicateChecked,
    Accepted { id: String },
    Rejected(Rejection),
}

impl CandidateState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CandidateState::Accepted { .. } | CandidateState::Rejected(_)
        )
    }
}

/// Fields parsed out of the model's JSON answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionFields {
    #[serde(default)]
    pub question_text: String,
    #[serde(default)]
    pub answer_options: Vec<String>,
    #[serde(default)]
    pub correct_answer: String,
    #[serde(default)]
    pub explanation: String,
}

/// One generated, not yet accepted question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionCandidate {
    pub sub_skill: String,
    pub mode: String,
    pub difficulty: Option<Difficulty>,
    pub response_type: ResponseType,
    /// Worked example index the prompt was built from.
    pub example_index: Option<usize>,
    pub passage_id: Option<String>,
    /// The prompt text sent to the model.
    pub prompt_context: String,
    /// Raw completion text.
    pub raw_text: String,
    /// `None` when the completion could not be parsed.
    pub fields: Option<QuestionFields>,
    pub model: String,
    pub validation: Vec<ValidationResult>,
    /// Review flags (non-fatal findings).
    pub flags: Vec<String>,
    pub state: CandidateState,
}

impl QuestionCandidate {
    /// Record a stage outcome and advance the state machine.
    ///
    /// Only the validator calls this; a failed stage makes the candidate
    /// terminal.
    pub(crate) fn record(&mut self, result: ValidationResult) {
        debug_assert!(!self.state.is_terminal(), "candidate already terminal");
        self.state = if result.passed {
            match result.stage {
                ValidationStage::Structure => CandidateState::StructureChecked,
                ValidationStage::Correctness => CandidateState::CorrectnessChecked,
                ValidationStage::Duplicate => CandidateState::DuplicateChecked,
            }
        } else {
            CandidateState::Rejected(Rejection {
                stage: Some(result.stage),
                reason: result.reason.clone().unwrap_or_default(),
            })
        };
        self.validation.push(result);
    }

    pub(crate) fn accept(&mut self, id: String) {
        self.state = CandidateState::Accepted { id };
    }

    pub(crate) fn discard(&mut self, reason: impl Into<String>) {
        self.state = CandidateState::Rejected(Rejection {
            stage: None,
            reason: reason.into(),
        });
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match &self.state {
            CandidateState::Rejected(r) => Some(r),
            _ => None,
        }
    }

    pub fn passed_all_stages(&self) -> bool {
        self.state == CandidateState::DuplicateChecked
    }
}
