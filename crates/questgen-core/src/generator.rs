//! Unit generation: prompt construction and candidate parsing.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::candidate::{CandidateState, QuestionCandidate, QuestionFields};
use crate::model::{Difficulty, ResponseType, SectionBlueprint, WorkedExample};
use crate::plan::{PassageTask, QuestionTask};
use crate::traits::{extract_json_block, CompletionRequest, CompletionService};

/// Header line of question-generation prompts.
pub const QUESTION_TASK_HEADER: &str = "## Task: write one new question";
/// Header line of passage-generation prompts.
pub const PASSAGE_TASK_HEADER: &str = "## Task: write one reading passage";

/// Default system context for generation calls.
pub const GENERATION_SYSTEM_CONTEXT: &str = "You are an experienced test item writer for school entrance and selective exams. You write clear, unambiguous items with exactly one defensible answer. Respond ONLY with a JSON object in the requested shape.";

/// Reading passage produced for a passage unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedPassage {
    pub title: String,
    pub text: String,
    pub word_count: u32,
    pub model: String,
}

/// A stored passage handed to its question prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassageContext {
    pub id: String,
    pub title: String,
    pub text: String,
}

/// Builds prompts and calls the completion service for single units.
pub struct Generator {
    completion: Arc<dyn CompletionService>,
    model: String,
    max_tokens: u32,
    temperature: f64,
    system_context: String,
}

impl Generator {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        model: impl Into<String>,
        max_tokens: u32,
        temperature: f64,
    ) -> Self {
        Self {
            completion,
            model: model.into(),
            max_tokens,
            temperature,
            system_context: GENERATION_SYSTEM_CONTEXT.to_string(),
        }
    }

    pub fn with_system_context(mut self, system_context: impl Into<String>) -> Self {
        self.system_context = system_context.into();
        self
    }

    /// Generate one question candidate. Fails only when the completion call
    /// fails; unparseable output yields a candidate with no fields.
    pub async fn generate_question(
        &self,
        blueprint: &SectionBlueprint,
        task: &QuestionTask,
        attempt: u32,
        passage: Option<&PassageContext>,
        feedback: Option<&str>,
    ) -> Result<QuestionCandidate> {
        let example_index = task.example_for_attempt(attempt);
        let example = example_index
            .and_then(|i| blueprint.examples_for(&task.sub_skill).get(i).map(|e| (i, e)));
        let prompt = question_prompt(blueprint, task, example, passage, feedback);

        let response = self
            .completion
            .complete(&CompletionRequest {
                model: self.model.clone(),
                system_context: self.system_context.clone(),
                prompt_text: prompt.clone(),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            })
            .await
            .with_context(|| format!("generating question for {}", task.sub_skill))?;

        let fields = parse_question_fields(&response.text);
        if fields.is_none() {
            tracing::debug!(sub_skill = %task.sub_skill, "completion was not a question object");
        }

        Ok(QuestionCandidate {
            sub_skill: task.sub_skill.clone(),
            mode: task.mode.clone(),
            difficulty: task.difficulty,
            response_type: task.response_type,
            example_index,
            passage_id: passage.map(|p| p.id.clone()),
            prompt_context: prompt,
            raw_text: response.text,
            fields,
            model: response.model,
            validation: Vec::new(),
            flags: Vec::new(),
            state: CandidateState::Created,
        })
    }

    /// Generate the reading passage for a passage unit.
    pub async fn generate_passage(
        &self,
        blueprint: &SectionBlueprint,
        task: &PassageTask,
        feedback: Option<&str>,
    ) -> Result<GeneratedPassage> {
        let prompt = passage_prompt(blueprint, task, feedback);
        let response = self
            .completion
            .complete(&CompletionRequest {
                model: self.model.clone(),
                system_context: self.system_context.clone(),
                prompt_text: prompt,
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            })
            .await
            .with_context(|| format!("generating {} passage", task.passage_type))?;

        let parsed: RawPassage = serde_json::from_str(&extract_json_block(&response.text))
            .context("passage response is not a JSON object with title and passage_text")?;
        anyhow::ensure!(
            !parsed.passage_text.trim().is_empty(),
            "passage response has empty passage_text"
        );
        Ok(GeneratedPassage {
            word_count: word_count(&parsed.passage_text),
            title: parsed.title,
            text: parsed.passage_text,
            model: response.model,
        })
    }
}

#[derive(Deserialize)]
struct RawPassage {
    #[serde(default)]
    title: String,
    passage_text: String,
}

/// Whitespace-separated word count.
pub fn word_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

/// Human wording for a difficulty level.
pub fn describe_difficulty(difficulty: Difficulty) -> String {
    match difficulty {
        1 => "easy".to_string(),
        2 => "medium".to_string(),
        3 => "hard".to_string(),
        other => format!("level {other}"),
    }
}

/// Parse the question JSON object out of a completion, if there is one.
pub fn parse_question_fields(raw: &str) -> Option<QuestionFields> {
    serde_json::from_str(&extract_json_block(raw)).ok()
}

/// Prompt for a single question.
pub fn question_prompt(
    blueprint: &SectionBlueprint,
    task: &QuestionTask,
    example: Option<(usize, &WorkedExample)>,
    passage: Option<&PassageContext>,
    feedback: Option<&str>,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!("{QUESTION_TASK_HEADER}\n"));
    prompt.push_str(&format!("Test: {}\n", blueprint.test_type));
    prompt.push_str(&format!("Section: {}\n", blueprint.section));

    match task.response_type {
        ResponseType::MultipleChoice => {
            prompt.push_str(&format!("Sub-skill: {}\n", task.sub_skill));
            if let Some(d) = task.difficulty {
                prompt.push_str(&format!("Difficulty: {} ({})\n", d, describe_difficulty(d)));
            }
            prompt.push_str(&format!(
                "Write exactly {} answer options labelled A), B), ... and mark one correct.\n",
                blueprint.answer_options,
            ));
        }
        ResponseType::Extended => {
            prompt.push_str(&format!("Prompt type: {}\n", task.sub_skill));
            prompt.push_str("Write an open-ended writing prompt. Leave answer_options empty.\n");
        }
    }

    if let Some(passage) = passage {
        prompt.push_str("\nThe question must be answerable from this passage only.\n");
        prompt.push_str(&format!("Passage title: {}\n", passage.title));
        prompt.push_str(&format!("Passage:\n{}\n\n", passage.text));
    }

    if let Some((index, example)) = example {
        prompt.push_str(&format!(
            "\nMatch the style of this worked example (example {}) without copying it:\n",
            index + 1,
        ));
        prompt.push_str(&format!("Question: {}\n", example.question_text));
        for option in &example.answer_options {
            prompt.push_str(&format!("  {option}\n"));
        }
        if !example.correct_answer.is_empty() {
            prompt.push_str(&format!("Answer: {}\n", example.correct_answer));
        }
        if !example.explanation.is_empty() {
            prompt.push_str(&format!("Explanation: {}\n", example.explanation));
        }
    }

    if let Some(feedback) = feedback {
        prompt.push_str(&format!(
            "\nA previous attempt was rejected ({feedback}). Write something clearly different.\n",
        ));
    }

    prompt.push_str(
        "\nRespond with JSON: {\"question_text\": string, \"answer_options\": [string], \"correct_answer\": string, \"explanation\": string}\n",
    );
    prompt
}

/// Prompt for a reading passage.
pub fn passage_prompt(
    blueprint: &SectionBlueprint,
    task: &PassageTask,
    feedback: Option<&str>,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!("{PASSAGE_TASK_HEADER}\n"));
    prompt.push_str(&format!("Test: {}\n", blueprint.test_type));
    prompt.push_str(&format!("Section: {}\n", blueprint.section));
    prompt.push_str(&format!("Passage type: {}\n", task.passage_type));
    prompt.push_str(&format!(
        "Difficulty: {} ({})\n",
        task.difficulty, describe_difficulty(task.difficulty),
    ));
    prompt.push_str(&format!(
        "Length: between {} and {} words.\n",
        task.word_count.min, task.word_count.max,
    ));
    let mut skills: Vec<&str> = task.questions.iter().map(|q| q.sub_skill.as_str()).collect();
    skills.dedup();
    prompt.push_str(&format!("It must support questions on: {}.\n", skills.join(", ")));
    if let Some(feedback) = feedback {
        prompt.push_str(&format!("\nA previous attempt was rejected ({feedback}).\n"));
    }
    prompt.push_str("\nRespond with JSON: {\"title\": string, \"passage_text\": string}\n");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DifficultyStrategy, GenerationStrategy, SubSkillTarget, WordRange};
    use std::collections::BTreeMap;

    fn blueprint() -> SectionBlueprint {
        let mut examples = BTreeMap::new();
        examples.insert(
            "Analogies".to_string(),
            vec![
                WorkedExample {
                    question_text: "Hot is to cold as up is to?".into(),
                    answer_options: vec!["A) down".into(), "B) left".into()],
                    correct_answer: "A".into(),
                    explanation: "Opposites.".into(),
                    difficulty: Some(1),
                },
                WorkedExample {
                    question_text: "Bird is to nest as bee is to?".into(),
                    answer_options: vec!["A) honey".into(), "B) hive".into()],
                    correct_answer: "B".into(),
                    explanation: "Homes.".into(),
                    difficulty: Some(2),
                },
            ],
        );
        SectionBlueprint {
            test_type: "Year 7 Entrance".into(),
            section: "Verbal Reasoning".into(),
            modes: vec!["practice_1".into()],
            difficulty: DifficultyStrategy::default(),
            answer_options: 4,
            strategy: GenerationStrategy::Balanced {
                sub_skills: vec![SubSkillTarget {
                    name: "Analogies".into(),
                    count: 2,
                }],
            },
            examples,
        }
    }

    fn task() -> QuestionTask {
        QuestionTask {
            id: 0,
            mode: "practice_1".into(),
            sub_skill: "Analogies".into(),
            difficulty: Some(3),
            response_type: ResponseType::MultipleChoice,
            example_index: Some(1),
            example_count: 2,
        }
    }

    #[test]
    fn question_prompt_includes_binding() {
        let bp = blueprint();
        let t = task();
        let prompt = question_prompt(
            &bp,
            &t,
            bp.examples_for("Analogies").get(1).map(|e| (1, e)),
            None,
            None,
        );
        assert!(prompt.starts_with(QUESTION_TASK_HEADER));
        assert!(prompt.contains("Sub-skill: Analogies"));
        assert!(prompt.contains("Difficulty: 3 (hard)"));
        assert!(prompt.contains("exactly 4 answer options"));
        assert!(prompt.contains("(example 2)"));
        assert!(prompt.contains("Bird is to nest"));
        assert!(!prompt.contains("previous attempt"));
    }

    #[test]
    fn question_prompt_carries_feedback_and_passage() {
        let bp = blueprint();
        let passage = PassageContext {
            id: "p-1".into(),
            title: "The Lighthouse".into(),
            text: "The keeper climbed the stairs.".into(),
        };
        let prompt = question_prompt(
            &bp,
            &task(),
            None,
            Some(&passage),
            Some("duplicate of an existing item"),
        );
        assert!(prompt.contains("The keeper climbed the stairs."));
        assert!(prompt.contains("duplicate of an existing item"));
    }

    #[test]
    fn passage_prompt_lists_sub_skills_and_length() {
        let bp = blueprint();
        let passage = PassageTask {
            mode: "practice_1".into(),
            spec_index: 0,
            slot: 0,
            passage_type: "narrative".into(),
            difficulty: 2,
            word_count: WordRange { min: 250, max: 350 },
            questions: vec![task(), task()],
        };
        let prompt = passage_prompt(&bp, &passage, None);
        assert!(prompt.starts_with(PASSAGE_TASK_HEADER));
        assert!(prompt.contains("between 250 and 350 words"));
        assert!(prompt.contains("questions on: Analogies."));
    }

    #[test]
    fn parse_fields_from_fenced_json() {
        let raw = "```json\n{\"question_text\": \"Q?\", \"answer_options\": [\"A) x\", \"B) y\"], \"correct_answer\": \"A\", \"explanation\": \"E\"}\n```";
        let fields = parse_question_fields(raw).unwrap();
        assert_eq!(fields.question_text, "Q?");
        assert_eq!(fields.answer_options.len(), 2);
    }

    #[test]
    fn parse_fields_rejects_prose() {
        assert!(parse_question_fields("I cannot help with that.").is_none());
    }

    #[test]
    fn word_count_splits_on_whitespace() {
        assert_eq!(word_count("one two\nthree\t four "), 4);
        assert_eq!(word_count(""), 0);
    }
}
