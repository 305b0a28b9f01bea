//! Generation planning.
//!
//! Turns a blueprint and its gap report into an ordered list of work units.
//! Planning is pure: the same blueprint and gaps always give the same plan.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::difficulty::{create_difficulty_plan, DistributionPlan};
use crate::error::GenerationError;
use crate::examples::generate_example_sequence;
use crate::gaps::GapReport;
use crate::model::{
    CellKey, Difficulty, DifficultyStrategy, GenerationStrategy, Interleaving, PassageSpec,
    ResponseType, SectionBlueprint, SubSkillTarget, WordRange, WritingPromptSpec,
};

/// One question to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionTask {
    /// Position of the task in plan order.
    pub id: usize,
    pub mode: String,
    pub sub_skill: String,
    pub difficulty: Option<Difficulty>,
    pub response_type: ResponseType,
    /// Planned worked example, from the sub-skill's example sequence.
    pub example_index: Option<usize>,
    /// Number of worked examples available for rebinding on retry.
    pub example_count: usize,
}

impl QuestionTask {
    /// Example binding for a zero-based attempt; retries rotate away from
    /// the planned example.
    pub fn example_for_attempt(&self, attempt: u32) -> Option<usize> {
        let planned = self.example_index?;
        if self.example_count == 0 {
            return None;
        }
        Some((planned + attempt as usize) % self.example_count)
    }

    pub fn cell(&self) -> CellKey {
        CellKey::new(&self.mode, &self.sub_skill, self.difficulty)
    }
}

/// A passage and the questions that depend on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassageTask {
    pub mode: String,
    pub spec_index: usize,
    pub slot: usize,
    pub passage_type: String,
    pub difficulty: Difficulty,
    pub word_count: WordRange,
    pub questions: Vec<QuestionTask>,
}

/// A schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "unit", rename_all = "snake_case")]
pub enum WorkUnit {
    Question(QuestionTask),
    Passage(PassageTask),
}

impl WorkUnit {
    pub fn question_count(&self) -> usize {
        match self {
            WorkUnit::Question(_) => 1,
            WorkUnit::Passage(p) => p.questions.len(),
        }
    }
}

/// Ordered generation plan for one section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationPlan {
    pub test_type: String,
    pub section: String,
    pub strategy: String,
    pub units: Vec<WorkUnit>,
}

impl GenerationPlan {
    /// Total question tasks, including passage questions.
    pub fn task_count(&self) -> usize {
        self.units.iter().map(WorkUnit::question_count).sum()
    }

    pub fn passage_count(&self) -> usize {
        self.units
            .iter()
            .filter(|u| matches!(u, WorkUnit::Passage(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Every question task in plan order.
    pub fn question_tasks(&self) -> impl Iterator<Item = &QuestionTask> {
        self.units.iter().flat_map(|unit| match unit {
            WorkUnit::Question(task) => std::slice::from_ref(task).iter(),
            WorkUnit::Passage(passage) => passage.questions.iter(),
        })
    }
}

/// Layout of one passage slot: its difficulty and the sub-skill of each question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassageSlot {
    pub slot: usize,
    pub difficulty: Difficulty,
    pub sub_skills: Vec<String>,
}

/// Lay out every passage slot of a spec.
///
/// Passage difficulties come from the section strategy over the passage count;
/// question sub-skills cycle through the passage group's list with one cursor shared by
/// all slots.
pub fn passage_slots(
    spec: &PassageSpec,
    strategy: &DifficultyStrategy,
) -> Result<Vec<PassageSlot>, GenerationError> {
    if spec.count == 0 {
        return Ok(Vec::new());
    }
    if spec.sub_skills.is_empty() {
        return Err(GenerationError::invalid(format!(
            "passage group '{}' lists no sub-skills",
            spec.passage_type
        )));
    }
    let difficulties = create_difficulty_plan(spec.count, strategy)?;
    let mut cursor = 0usize;
    let mut slots = Vec::with_capacity(spec.count as usize);
    for (slot, &difficulty) in difficulties.sequence.iter().enumerate() {
        let questions = spec.questions_per_passage.for_slot(slot) as usize;
        let sub_skills = (0..questions)
            .map(|_| {
                let name = spec.sub_skills[cursor % spec.sub_skills.len()].clone();
                cursor += 1;
                name
            })
            .collect();
        slots.push(PassageSlot {
            slot,
            difficulty,
            sub_skills,
        });
    }
    Ok(slots)
}

/// Prompt type of each writing task, cycling the declared types.
pub fn writing_prompt_types(spec: &WritingPromptSpec) -> Result<Vec<String>, GenerationError> {
    if spec.total_prompts == 0 {
        return Ok(Vec::new());
    }
    if spec.prompt_types.is_empty() {
        return Err(GenerationError::invalid("writing section lists no prompt types"));
    }
    Ok((0..spec.total_prompts as usize)
        .map(|i| spec.prompt_types[i % spec.prompt_types.len()].clone())
        .collect())
}

/// Build the generation plan for the cells the gap report still has open.
pub fn build_plan(
    blueprint: &SectionBlueprint,
    gaps: &GapReport,
) -> Result<GenerationPlan, GenerationError> {
    let mut remaining = gaps.deficits();
    let mut units = Vec::new();

    for mode in &blueprint.modes {
        let standalone = plan_standalone(blueprint, mode, &mut remaining)?;
        let passages = plan_passages(blueprint, mode, &mut remaining)?;

        match &blueprint.strategy {
            GenerationStrategy::Hybrid {
                interleaving: Interleaving::Mixed,
                ..
            } => units.extend(interleave_mixed(standalone, passages)),
            GenerationStrategy::WritingPrompt { writing } => {
                units.extend(plan_writing(blueprint, writing, mode, &mut remaining)?);
            }
            _ => {
                units.extend(standalone);
                units.extend(passages);
            }
        }
    }

    let mut next_id = 0usize;
    for unit in &mut units {
        let tasks: &mut [QuestionTask] = match unit {
            WorkUnit::Question(task) => std::slice::from_mut(task),
            WorkUnit::Passage(passage) => &mut passage.questions,
        };
        for task in tasks {
            task.id = next_id;
            next_id += 1;
        }
    }

    let plan = GenerationPlan {
        test_type: blueprint.test_type.clone(),
        section: blueprint.section.clone(),
        strategy: blueprint.strategy.name().to_string(),
        units,
    };
    tracing::info!(
        test_type = %plan.test_type,
        section = %plan.section,
        strategy = %plan.strategy,
        tasks = plan.task_count(),
        passages = plan.passage_count(),
        "generation plan built"
    );
    Ok(plan)
}

fn take_remaining(remaining: &mut HashMap<CellKey, u32>, key: &CellKey, want: u32) -> u32 {
    match remaining.get_mut(key) {
        Some(left) => {
            let taken = want.min(*left);
            *left -= taken;
            taken
        }
        None => 0,
    }
}

fn with_context(sub_skill: &str, err: GenerationError) -> GenerationError {
    match err {
        GenerationError::InvalidArgument(msg) => {
            GenerationError::InvalidArgument(format!("{sub_skill}: {msg}"))
        }
        other => other,
    }
}

fn plan_standalone(
    blueprint: &SectionBlueprint,
    mode: &str,
    remaining: &mut HashMap<CellKey, u32>,
) -> Result<Vec<WorkUnit>, GenerationError> {
    let mut units = Vec::new();
    for target in blueprint.strategy.standalone() {
        units.extend(plan_sub_skill(blueprint, target, mode, remaining)?);
    }
    Ok(units)
}

fn plan_sub_skill(
    blueprint: &SectionBlueprint,
    target: &SubSkillTarget,
    mode: &str,
    remaining: &mut HashMap<CellKey, u32>,
) -> Result<Vec<WorkUnit>, GenerationError> {
    if target.count == 0 {
        return Ok(Vec::new());
    }
    let full = create_difficulty_plan(target.count, &blueprint.difficulty)?;

    let mut deficits: BTreeMap<Difficulty, u32> = BTreeMap::new();
    let mut untouched = true;
    for bucket in full.buckets.iter().filter(|b| b.count > 0) {
        let key = CellKey::new(mode, &target.name, Some(bucket.difficulty));
        let taken = take_remaining(remaining, &key, bucket.count);
        untouched &= taken == bucket.count;
        if taken > 0 {
            *deficits.entry(bucket.difficulty).or_default() += taken;
        }
    }
    let deficit: u32 = deficits.values().sum();
    if deficit == 0 {
        return Ok(Vec::new());
    }

    // A partially filled sub-skill is weighted by what each cell still lacks.
    let difficulty_plan: DistributionPlan = if untouched {
        create_difficulty_plan(deficit, &blueprint.difficulty)?
    } else {
        let weights = deficits.iter().map(|(&d, &n)| (d, n as f64)).collect();
        create_difficulty_plan(deficit, &DifficultyStrategy::Weighted { weights })?
    };

    let examples = blueprint.examples_for(&target.name);
    let example_sequence = generate_example_sequence(examples.len(), deficit)
        .map_err(|e| with_context(&target.name, e))?;

    Ok(difficulty_plan
        .sequence
        .iter()
        .zip(example_sequence)
        .map(|(&difficulty, example)| {
            WorkUnit::Question(QuestionTask {
                id: 0,
                mode: mode.to_string(),
                sub_skill: target.name.clone(),
                difficulty: Some(difficulty),
                response_type: ResponseType::MultipleChoice,
                example_index: Some(example),
                example_count: examples.len(),
            })
        })
        .collect())
}

/// Passage slots are generated whole: a slot with any open cell is scheduled
/// with all of its questions, so a partly filled section can overshoot its
/// targets by up to one passage's worth per open cell.
fn plan_passages(
    blueprint: &SectionBlueprint,
    mode: &str,
    remaining: &mut HashMap<CellKey, u32>,
) -> Result<Vec<WorkUnit>, GenerationError> {
    let mut scheduled: Vec<(usize, &PassageSpec, PassageSlot)> = Vec::new();
    for (spec_index, spec) in blueprint.strategy.passages().iter().enumerate() {
        for slot in passage_slots(spec, &blueprint.difficulty)? {
            let open = slot.sub_skills.iter().any(|s| {
                let key = CellKey::new(mode, s, Some(slot.difficulty));
                remaining.get(&key).copied().unwrap_or(0) > 0
            });
            if !open {
                continue;
            }
            for s in &slot.sub_skills {
                take_remaining(remaining, &CellKey::new(mode, s, Some(slot.difficulty)), 1);
            }
            scheduled.push((spec_index, spec, slot));
        }
    }

    // One example rotation per sub-skill across all scheduled passage questions.
    let mut per_sub_skill: BTreeMap<&str, u32> = BTreeMap::new();
    for (_, _, slot) in &scheduled {
        for s in &slot.sub_skills {
            *per_sub_skill.entry(s.as_str()).or_default() += 1;
        }
    }
    let mut rotations: HashMap<&str, (Vec<usize>, usize)> = HashMap::new();
    for (&sub_skill, &count) in &per_sub_skill {
        let examples = blueprint.examples_for(sub_skill);
        let sequence = generate_example_sequence(examples.len(), count)
            .map_err(|e| with_context(sub_skill, e))?;
        rotations.insert(sub_skill, (sequence, 0));
    }

    let mut units = Vec::with_capacity(scheduled.len());
    for (spec_index, spec, slot) in &scheduled {
        let questions = slot
            .sub_skills
            .iter()
            .map(|s| {
                let example = rotations.get_mut(s.as_str()).and_then(|(sequence, cursor)| {
                    let next = sequence.get(*cursor).copied();
                    *cursor += 1;
                    next
                });
                QuestionTask {
                    id: 0,
                    mode: mode.to_string(),
                    sub_skill: s.clone(),
                    difficulty: Some(slot.difficulty),
                    response_type: ResponseType::MultipleChoice,
                    example_index: example,
                    example_count: blueprint.examples_for(s).len(),
                }
            })
            .collect();
        units.push(WorkUnit::Passage(PassageTask {
            mode: mode.to_string(),
            spec_index: *spec_index,
            slot: slot.slot,
            passage_type: spec.passage_type.clone(),
            difficulty: slot.difficulty,
            word_count: spec.word_count,
            questions,
        }));
    }
    Ok(units)
}

fn plan_writing(
    blueprint: &SectionBlueprint,
    writing: &WritingPromptSpec,
    mode: &str,
    remaining: &mut HashMap<CellKey, u32>,
) -> Result<Vec<WorkUnit>, GenerationError> {
    let mut units = Vec::new();
    for prompt_type in writing_prompt_types(writing)? {
        let key = CellKey::new(mode, &prompt_type, None);
        if take_remaining(remaining, &key, 1) == 0 {
            continue;
        }
        units.push(WorkUnit::Question(QuestionTask {
            id: 0,
            mode: mode.to_string(),
            sub_skill: prompt_type,
            difficulty: None,
            response_type: blueprint.response_type(),
            example_index: None,
            example_count: 0,
        }));
    }
    Ok(units)
}

/// Spread `passages` evenly among `standalone`: passage `j` of `P` lands after
/// standalone unit `floor((j + 1) * S / (P + 1))`.
fn interleave_mixed(standalone: Vec<WorkUnit>, passages: Vec<WorkUnit>) -> Vec<WorkUnit> {
    let s = standalone.len();
    let p = passages.len();
    let mut out = Vec::with_capacity(s + p);
    let mut standalone = standalone.into_iter();
    let mut placed = 0usize;
    for (j, passage) in passages.into_iter().enumerate() {
        let boundary = (j + 1) * s / (p + 1);
        while placed < boundary {
            if let Some(unit) = standalone.next() {
                out.push(unit);
            }
            placed += 1;
        }
        out.push(passage);
    }
    out.extend(standalone);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gaps::detect_section_gaps;
    use crate::model::{QuestionsPerPassage, WorkedExample};

    fn example(text: &str) -> WorkedExample {
        WorkedExample {
            question_text: text.into(),
            answer_options: vec!["A) one".into(), "B) two".into()],
            correct_answer: "A".into(),
            explanation: "Because.".into(),
            difficulty: None,
        }
    }

    fn blueprint(strategy: GenerationStrategy) -> SectionBlueprint {
        let mut examples = BTreeMap::new();
        for skill in ["Vocabulary", "Main Idea", "Inference"] {
            examples.insert(
                skill.to_string(),
                (0..5).map(|i| example(&format!("{skill} {i}"))).collect(),
            );
        }
        SectionBlueprint {
            test_type: "Year 7 Entrance".into(),
            section: "Reading".into(),
            modes: vec!["practice_1".into()],
            difficulty: DifficultyStrategy::default(),
            answer_options: 4,
            strategy,
            examples,
        }
    }

    fn gaps_for(bp: &SectionBlueprint, existing: &HashMap<CellKey, u32>) -> GapReport {
        GapReport {
            test_type: bp.test_type.clone(),
            section: bp.section.clone(),
            cells: detect_section_gaps(bp, existing).unwrap(),
        }
    }

    fn passage_spec(count: u32) -> PassageSpec {
        PassageSpec {
            passage_type: "narrative".into(),
            count,
            word_count: WordRange { min: 200, max: 400 },
            questions_per_passage: QuestionsPerPassage::Range { min: 3, max: 4 },
            sub_skills: vec!["Main Idea".into(), "Inference".into()],
        }
    }

    #[test]
    fn balanced_eight_questions_five_examples() {
        let bp = blueprint(GenerationStrategy::Balanced {
            sub_skills: vec![SubSkillTarget {
                name: "Vocabulary".into(),
                count: 8,
            }],
        });
        let plan = build_plan(&bp, &gaps_for(&bp, &HashMap::new())).unwrap();
        assert_eq!(plan.task_count(), 8);

        let mut uses = [0u32; 5];
        for task in plan.question_tasks() {
            uses[task.example_index.unwrap()] += 1;
        }
        assert_eq!(uses, [2, 2, 2, 1, 1]);

        let ids: Vec<usize> = plan.question_tasks().map(|t| t.id).collect();
        assert_eq!(ids, (0..8).collect::<Vec<_>>());

        // Same inputs, same plan.
        let again = build_plan(&bp, &gaps_for(&bp, &HashMap::new())).unwrap();
        assert_eq!(plan, again);
    }

    #[test]
    fn balanced_partial_fill_targets_open_cells_only() {
        let bp = blueprint(GenerationStrategy::Balanced {
            sub_skills: vec![SubSkillTarget {
                name: "Vocabulary".into(),
                count: 9,
            }],
        });
        let mut existing = HashMap::new();
        existing.insert(CellKey::new("practice_1", "Vocabulary", Some(1)), 3);
        existing.insert(CellKey::new("practice_1", "Vocabulary", Some(2)), 1);

        let plan = build_plan(&bp, &gaps_for(&bp, &existing)).unwrap();
        let mut per_difficulty = BTreeMap::new();
        for task in plan.question_tasks() {
            *per_difficulty.entry(task.difficulty.unwrap()).or_insert(0) += 1;
        }
        assert_eq!(per_difficulty.get(&1), None);
        assert_eq!(per_difficulty[&2], 2);
        assert_eq!(per_difficulty[&3], 3);
    }

    #[test]
    fn nothing_to_do_when_full() {
        let bp = blueprint(GenerationStrategy::Balanced {
            sub_skills: vec![SubSkillTarget {
                name: "Vocabulary".into(),
                count: 3,
            }],
        });
        let existing: HashMap<CellKey, u32> = (1..=3)
            .map(|d| (CellKey::new("practice_1", "Vocabulary", Some(d)), 1))
            .collect();
        let plan = build_plan(&bp, &gaps_for(&bp, &existing)).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn missing_examples_abort_planning() {
        let bp = blueprint(GenerationStrategy::Balanced {
            sub_skills: vec![SubSkillTarget {
                name: "Spelling".into(),
                count: 2,
            }],
        });
        let err = build_plan(&bp, &gaps_for(&bp, &HashMap::new())).unwrap_err();
        assert!(
            matches!(&err, GenerationError::InvalidArgument(msg) if msg.starts_with("Spelling")),
            "{err}"
        );
    }

    #[test]
    fn passages_carry_their_questions() {
        let bp = blueprint(GenerationStrategy::PassageBased {
            passages: vec![passage_spec(3)],
        });
        let plan = build_plan(&bp, &gaps_for(&bp, &HashMap::new())).unwrap();
        assert_eq!(plan.passage_count(), 3);
        let sizes: Vec<usize> = plan.units.iter().map(WorkUnit::question_count).collect();
        assert_eq!(sizes, vec![3, 4, 3]);
        assert_eq!(plan.task_count(), 10);
        for unit in &plan.units {
            let WorkUnit::Passage(p) = unit else {
                panic!("expected passage unit");
            };
            assert!(p.questions.iter().all(|q| q.difficulty == Some(p.difficulty)));
        }
    }

    #[test]
    fn filled_passage_slots_are_skipped() {
        let bp = blueprint(GenerationStrategy::PassageBased {
            passages: vec![PassageSpec {
                questions_per_passage: QuestionsPerPassage::Fixed(2),
                ..passage_spec(2)
            }],
        });
        let slots = passage_slots(&bp.strategy.passages()[0], &bp.difficulty).unwrap();
        // Fill every cell the first slot targets.
        let mut existing = HashMap::new();
        for s in &slots[0].sub_skills {
            *existing
                .entry(CellKey::new("practice_1", s, Some(slots[0].difficulty)))
                .or_insert(0) += 1;
        }
        let plan = build_plan(&bp, &gaps_for(&bp, &existing)).unwrap();
        assert_eq!(plan.passage_count(), 1);
        let WorkUnit::Passage(p) = &plan.units[0] else {
            panic!("expected passage unit");
        };
        assert_eq!(p.slot, 1);
    }

    #[test]
    fn partly_filled_slot_is_generated_whole() {
        let mut bp = blueprint(GenerationStrategy::PassageBased {
            passages: vec![PassageSpec {
                questions_per_passage: QuestionsPerPassage::Fixed(4),
                ..passage_spec(3)
            }],
        });
        bp.difficulty = DifficultyStrategy::Single { level: 2 };
        let mut existing = HashMap::new();
        for s in ["Main Idea", "Inference"] {
            existing.insert(CellKey::new("practice_1", s, Some(2)), 5);
        }
        let gaps = gaps_for(&bp, &existing);
        assert_eq!(gaps.total_deficit(), 2);

        let plan = build_plan(&bp, &gaps).unwrap();
        assert_eq!(plan.passage_count(), 1);
        assert_eq!(plan.task_count(), 4);
    }

    #[test]
    fn hybrid_passages_last() {
        let bp = blueprint(GenerationStrategy::Hybrid {
            standalone: vec![SubSkillTarget {
                name: "Vocabulary".into(),
                count: 4,
            }],
            passages: vec![passage_spec(2)],
            interleaving: Interleaving::PassagesLast,
        });
        let plan = build_plan(&bp, &gaps_for(&bp, &HashMap::new())).unwrap();
        let kinds: Vec<bool> = plan
            .units
            .iter()
            .map(|u| matches!(u, WorkUnit::Passage(_)))
            .collect();
        assert_eq!(kinds, vec![false, false, false, false, true, true]);
    }

    #[test]
    fn hybrid_mixed_spreads_passages() {
        let bp = blueprint(GenerationStrategy::Hybrid {
            standalone: vec![SubSkillTarget {
                name: "Vocabulary".into(),
                count: 6,
            }],
            passages: vec![passage_spec(2)],
            interleaving: Interleaving::Mixed,
        });
        let plan = build_plan(&bp, &gaps_for(&bp, &HashMap::new())).unwrap();
        let layout: String = plan
            .units
            .iter()
            .map(|u| match u {
                WorkUnit::Question(_) => 'S',
                WorkUnit::Passage(_) => 'P',
            })
            .collect();
        assert_eq!(layout, "SSPSSPSS");
    }

    #[test]
    fn interleave_without_standalone() {
        let passages = vec![
            WorkUnit::Passage(PassageTask {
                mode: "m".into(),
                spec_index: 0,
                slot: 0,
                passage_type: "t".into(),
                difficulty: 1,
                word_count: WordRange { min: 1, max: 2 },
                questions: vec![],
            });
            2
        ];
        assert_eq!(interleave_mixed(Vec::new(), passages).len(), 2);
    }

    #[test]
    fn writing_prompts_cycle_types() {
        let bp = blueprint(GenerationStrategy::WritingPrompt {
            writing: WritingPromptSpec {
                total_prompts: 3,
                prompt_types: vec!["narrative".into(), "persuasive".into()],
                time_limit_minutes: None,
                word_limit: None,
            },
        });
        let plan = build_plan(&bp, &gaps_for(&bp, &HashMap::new())).unwrap();
        let types: Vec<&str> = plan.question_tasks().map(|t| t.sub_skill.as_str()).collect();
        assert_eq!(types, vec!["narrative", "persuasive", "narrative"]);
        assert!(plan
            .question_tasks()
            .all(|t| t.difficulty.is_none() && t.example_index.is_none()));
        assert!(plan
            .question_tasks()
            .all(|t| t.response_type == ResponseType::Extended));
    }

    #[test]
    fn retry_rotates_example() {
        let task = QuestionTask {
            id: 0,
            mode: "practice_1".into(),
            sub_skill: "Vocabulary".into(),
            difficulty: Some(1),
            response_type: ResponseType::MultipleChoice,
            example_index: Some(3),
            example_count: 5,
        };
        assert_eq!(task.example_for_attempt(0), Some(3));
        assert_eq!(task.example_for_attempt(1), Some(4));
        assert_eq!(task.example_for_attempt(2), Some(0));
    }
}
