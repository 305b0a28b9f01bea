//! Worked-example rotation.
//!
//! Generation prompts cycle through every worked example of a sub-skill as
//! evenly as possible, in a seeded order independent of the difficulty order.

use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::shuffle::{seeded_shuffle, EXAMPLE_SEED};

/// How often each example is used, plus the shuffled index sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleDistributionPlan {
    pub total_questions: u32,
    pub total_examples: u32,
    pub per_example_use_count: Vec<u32>,
    pub sequence: Vec<usize>,
}

/// Build the full example plan for `questions` prompts over `num_examples` examples.
pub fn create_example_plan(
    num_examples: usize,
    questions: u32,
) -> Result<ExampleDistributionPlan, GenerationError> {
    if num_examples == 0 {
        return Err(GenerationError::invalid("no examples available"));
    }
    if questions == 0 {
        return Err(GenerationError::invalid(
            "number of questions to generate must be greater than zero",
        ));
    }

    let n = num_examples as u32;
    let base = questions / n;
    let remainder = questions % n;
    let per_example_use_count: Vec<u32> = (0..n).map(|i| base + u32::from(i < remainder)).collect();

    let mut sequence: Vec<usize> = per_example_use_count
        .iter()
        .enumerate()
        .flat_map(|(idx, &uses)| std::iter::repeat(idx).take(uses as usize))
        .collect();
    seeded_shuffle(&mut sequence, EXAMPLE_SEED);

    Ok(ExampleDistributionPlan {
        total_questions: questions,
        total_examples: n,
        per_example_use_count,
        sequence,
    })
}

/// Shuffled example indices, one per question to generate.
pub fn generate_example_sequence(
    num_examples: usize,
    questions: u32,
) -> Result<Vec<usize>, GenerationError> {
    create_example_plan(num_examples, questions).map(|plan| plan.sequence)
}

/// Round-robin step: the example at `current` (wrapped) and the next index.
pub fn get_next_example<T>(examples: &[T], current: usize) -> Result<(&T, usize), GenerationError> {
    if examples.is_empty() {
        return Err(GenerationError::invalid("no examples available"));
    }
    let idx = current % examples.len();
    Ok((&examples[idx], (idx + 1) % examples.len()))
}
