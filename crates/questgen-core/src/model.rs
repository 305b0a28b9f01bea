//! Core data model types for questgen.
//!
//! Section blueprints, worked examples, difficulty strategies and the content
//! cell key used by gap detection and storage.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Difficulty level of a question (1 = easiest).
pub type Difficulty = u8;

/// Mode used when a blueprint does not name any.
pub const DEFAULT_MODE: &str = "practice_1";

/// How difficulties are spread across a batch of questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum DifficultyStrategy {
    /// Every question gets the same difficulty.
    Single { level: Difficulty },
    /// Even split across the listed levels, extras to the first levels.
    Balanced { levels: Vec<Difficulty> },
    /// Proportional split by weight.
    Weighted { weights: BTreeMap<Difficulty, f64> },
    /// Ascending weights `1..k` over `start..=end`.
    Progressive { start: Difficulty, end: Difficulty },
}

impl Default for DifficultyStrategy {
    fn default() -> Self {
        DifficultyStrategy::Balanced {
            levels: vec![1, 2, 3],
        }
    }
}

impl DifficultyStrategy {
    pub fn kind(&self) -> &'static str {
        match self {
            DifficultyStrategy::Single { .. } => "single",
            DifficultyStrategy::Balanced { .. } => "balanced",
            DifficultyStrategy::Weighted { .. } => "weighted",
            DifficultyStrategy::Progressive { .. } => "progressive",
        }
    }
}

/// A worked example the generator imitates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkedExample {
    pub question_text: String,
    #[serde(default)]
    pub answer_options: Vec<String>,
    #[serde(default)]
    pub correct_answer: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
}

/// A standalone sub-skill and how many questions it needs per mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubSkillTarget {
    pub name: String,
    pub count: u32,
}

/// Inclusive word-count bounds for a generated passage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordRange {
    pub min: u32,
    pub max: u32,
}

impl WordRange {
    pub fn contains(&self, words: u32) -> bool {
        (self.min..=self.max).contains(&words)
    }
}

/// Number of questions attached to each passage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionsPerPassage {
    Fixed(u32),
    Range { min: u32, max: u32 },
}

impl QuestionsPerPassage {
    /// Question count for passage slot `slot`.
    ///
    /// Ranges cycle through `min..=max` by slot index, so `[3, 4]` alternates
    /// 3, 4, 3, 4 and the same blueprint always yields the same plan.
    pub fn for_slot(&self, slot: usize) -> u32 {
        match *self {
            QuestionsPerPassage::Fixed(n) => n,
            QuestionsPerPassage::Range { min, max } => {
                if max <= min {
                    return min;
                }
                let span = (max - min + 1) as usize;
                min + (slot % span) as u32
            }
        }
    }
}

/// A group of passages of one type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageSpec {
    pub passage_type: String,
    /// Number of passages per mode.
    pub count: u32,
    pub word_count: WordRange,
    pub questions_per_passage: QuestionsPerPassage,
    /// Sub-skills the attached questions cycle through.
    pub sub_skills: Vec<String>,
}

/// Open-ended writing prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WritingPromptSpec {
    pub total_prompts: u32,
    pub prompt_types: Vec<String>,
    #[serde(default)]
    pub time_limit_minutes: Option<u32>,
    #[serde(default)]
    pub word_limit: Option<u32>,
}

/// Ordering of standalone and passage work in a hybrid section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interleaving {
    #[default]
    PassagesLast,
    Mixed,
}

impl FromStr for Interleaving {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "passages_last" => Ok(Interleaving::PassagesLast),
            "mixed" => Ok(Interleaving::Mixed),
            other => Err(format!("unknown interleaving strategy: {other}")),
        }
    }
}

/// How a section is generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationStrategy {
    Balanced {
        sub_skills: Vec<SubSkillTarget>,
    },
    PassageBased {
        passages: Vec<PassageSpec>,
    },
    Hybrid {
        standalone: Vec<SubSkillTarget>,
        passages: Vec<PassageSpec>,
        interleaving: Interleaving,
    },
    WritingPrompt {
        writing: WritingPromptSpec,
    },
}

impl GenerationStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            GenerationStrategy::Balanced { .. } => "balanced",
            GenerationStrategy::PassageBased { .. } => "passage_based",
            GenerationStrategy::Hybrid { .. } => "hybrid",
            GenerationStrategy::WritingPrompt { .. } => "writing_prompt",
        }
    }

    /// Standalone sub-skill targets, if the strategy has any.
    pub fn standalone(&self) -> &[SubSkillTarget] {
        match self {
            GenerationStrategy::Balanced { sub_skills } => sub_skills,
            GenerationStrategy::Hybrid { standalone, .. } => standalone,
            _ => &[],
        }
    }

    /// Passage specs, if the strategy has any.
    pub fn passages(&self) -> &[PassageSpec] {
        match self {
            GenerationStrategy::PassageBased { passages }
            | GenerationStrategy::Hybrid { passages, .. } => passages,
            _ => &[],
        }
    }
}

/// Declarative generation target for one test section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionBlueprint {
    pub test_type: String,
    pub section: String,
    /// Test modes to fill (e.g. "practice_1", "diagnostic").
    pub modes: Vec<String>,
    pub difficulty: DifficultyStrategy,
    /// Expected answer-option cardinality for multiple-choice items.
    pub answer_options: usize,
    pub strategy: GenerationStrategy,
    /// Worked examples keyed by sub-skill (or writing prompt type).
    #[serde(default)]
    pub examples: BTreeMap<String, Vec<WorkedExample>>,
}

impl SectionBlueprint {
    pub fn examples_for(&self, sub_skill: &str) -> &[WorkedExample] {
        self.examples
            .get(sub_skill)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether questions in this section are scored multiple-choice items.
    pub fn response_type(&self) -> ResponseType {
        match self.strategy {
            GenerationStrategy::WritingPrompt { .. } => ResponseType::Extended,
            _ => ResponseType::MultipleChoice,
        }
    }
}

/// Shape of the expected answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    MultipleChoice,
    /// Unscored open-ended writing.
    Extended,
}

/// One content cell: the unit gap detection counts against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    pub mode: String,
    pub sub_skill: String,
    /// `None` for unscored writing prompts.
    pub difficulty: Option<Difficulty>,
}

impl CellKey {
    pub fn new(mode: &str, sub_skill: &str, difficulty: Option<Difficulty>) -> Self {
        Self {
            mode: mode.to_string(),
            sub_skill: sub_skill.to_string(),
            difficulty,
        }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.difficulty {
            Some(d) => write!(f, "{}/{}/d{}", self.mode, self.sub_skill, d),
            None => write!(f, "{}/{}", self.mode, self.sub_skill),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_questions_alternate_per_slot() {
        let q = QuestionsPerPassage::Range { min: 3, max: 4 };
        let counts: Vec<u32> = (0..5).map(|s| q.for_slot(s)).collect();
        assert_eq!(counts, vec![3, 4, 3, 4, 3]);

        let wide = QuestionsPerPassage::Range { min: 2, max: 4 };
        let counts: Vec<u32> = (0..4).map(|s| wide.for_slot(s)).collect();
        assert_eq!(counts, vec![2, 3, 4, 2]);

        assert_eq!(QuestionsPerPassage::Fixed(5).for_slot(9), 5);
    }

    #[test]
    fn interleaving_parse() {
        assert_eq!("mixed".parse::<Interleaving>().unwrap(), Interleaving::Mixed);
        assert_eq!(
            "PASSAGES_LAST".parse::<Interleaving>().unwrap(),
            Interleaving::PassagesLast
        );
        assert!("random".parse::<Interleaving>().is_err());
    }

    #[test]
    fn cell_key_display() {
        assert_eq!(
            CellKey::new("practice_1", "Inference", Some(2)).to_string(),
            "practice_1/Inference/d2"
        );
        assert_eq!(
            CellKey::new("diagnostic", "narrative", None).to_string(),
            "diagnostic/narrative"
        );
    }

    #[test]
    fn word_range_bounds_inclusive() {
        let range = WordRange { min: 300, max: 450 };
        assert!(range.contains(300));
        assert!(range.contains(450));
        assert!(!range.contains(299));
        assert!(!range.contains(451));
    }
}
