//! TOML section blueprint parser.
//!
//! Loads blueprints from TOML files and directories, and validates them.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::difficulty::create_difficulty_plan;
use crate::model::{
    Difficulty, DifficultyStrategy, GenerationStrategy, Interleaving, PassageSpec,
    QuestionsPerPassage, SectionBlueprint, SubSkillTarget, WordRange, WorkedExample,
    WritingPromptSpec, DEFAULT_MODE,
};

/// Intermediate TOML structure for parsing blueprint files.
#[derive(Debug, Deserialize)]
struct TomlBlueprintFile {
    blueprint: TomlBlueprintHeader,
    #[serde(default)]
    sub_skills: Vec<TomlSubSkill>,
    #[serde(default)]
    passages: Vec<TomlPassage>,
    #[serde(default)]
    writing: Option<TomlWriting>,
    #[serde(default)]
    examples: BTreeMap<String, Vec<WorkedExample>>,
}

#[derive(Debug, Deserialize)]
struct TomlBlueprintHeader {
    test_type: String,
    section: String,
    #[serde(default = "default_strategy")]
    strategy: String,
    #[serde(default)]
    modes: Vec<String>,
    #[serde(default = "default_answer_options")]
    answer_options: usize,
    #[serde(default)]
    interleaving_strategy: Option<String>,
    #[serde(default)]
    difficulty: Option<TomlDifficulty>,
}

fn default_strategy() -> String {
    "balanced".to_string()
}

fn default_answer_options() -> usize {
    4
}

#[derive(Debug, Deserialize)]
struct TomlDifficulty {
    #[serde(default = "default_strategy")]
    strategy: String,
    #[serde(default)]
    level: Option<Difficulty>,
    #[serde(default)]
    levels: Option<Vec<Difficulty>>,
    /// TOML keys are strings; parsed to levels below.
    #[serde(default)]
    weights: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    start: Option<Difficulty>,
    #[serde(default)]
    end: Option<Difficulty>,
}

#[derive(Debug, Deserialize)]
struct TomlSubSkill {
    name: String,
    count: u32,
}

#[derive(Debug, Deserialize)]
struct TomlPassage {
    passage_type: String,
    #[serde(default = "default_passage_count")]
    count: u32,
    word_count: Vec<u32>,
    questions_per_passage: TomlQuestionCount,
    #[serde(default)]
    sub_skills: Vec<String>,
}

fn default_passage_count() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TomlQuestionCount {
    Fixed(u32),
    Range(Vec<u32>),
}

#[derive(Debug, Deserialize)]
struct TomlWriting {
    total_prompts: u32,
    #[serde(default)]
    prompt_types: Vec<String>,
    #[serde(default)]
    time_limit_minutes: Option<u32>,
    #[serde(default)]
    word_limit: Option<u32>,
}

/// Parse a single TOML file into a `SectionBlueprint`.
pub fn parse_blueprint(path: &Path) -> Result<SectionBlueprint> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read blueprint file: {}", path.display()))?;

    parse_blueprint_str(&content, path)
}

/// Parse a TOML string into a `SectionBlueprint` (useful for testing).
pub fn parse_blueprint_str(content: &str, source_path: &Path) -> Result<SectionBlueprint> {
    let parsed: TomlBlueprintFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;
    let header = parsed.blueprint;

    let difficulty = match header.difficulty {
        Some(d) => parse_difficulty(d)?,
        None => DifficultyStrategy::default(),
    };

    let standalone: Vec<SubSkillTarget> = parsed
        .sub_skills
        .into_iter()
        .map(|s| SubSkillTarget {
            name: s.name,
            count: s.count,
        })
        .collect();
    let passages = parsed
        .passages
        .into_iter()
        .map(parse_passage)
        .collect::<Result<Vec<_>>>()?;

    let strategy = match header.strategy.to_lowercase().as_str() {
        "balanced" => GenerationStrategy::Balanced {
            sub_skills: standalone,
        },
        "passage_based" => GenerationStrategy::PassageBased { passages },
        "hybrid" => GenerationStrategy::Hybrid {
            standalone,
            passages,
            interleaving: header
                .interleaving_strategy
                .as_deref()
                .map(str::parse::<Interleaving>)
                .transpose()
                .map_err(|e: String| anyhow::anyhow!("{}", e))?
                .unwrap_or_default(),
        },
        "writing_prompt" => {
            let writing = parsed
                .writing
                .context("writing_prompt strategy needs a [writing] table")?;
            GenerationStrategy::WritingPrompt {
                writing: WritingPromptSpec {
                    total_prompts: writing.total_prompts,
                    prompt_types: writing.prompt_types,
                    time_limit_minutes: writing.time_limit_minutes,
                    word_limit: writing.word_limit,
                },
            }
        }
        other => anyhow::bail!("unknown generation strategy: {other}"),
    };

    let modes = if header.modes.is_empty() {
        vec![DEFAULT_MODE.to_string()]
    } else {
        header.modes
    };

    Ok(SectionBlueprint {
        test_type: header.test_type,
        section: header.section,
        modes,
        difficulty,
        answer_options: header.answer_options,
        strategy,
        examples: parsed.examples,
    })
}

fn parse_difficulty(d: TomlDifficulty) -> Result<DifficultyStrategy> {
    Ok(match d.strategy.to_lowercase().as_str() {
        "single" => DifficultyStrategy::Single {
            level: d.level.context("single difficulty needs `level`")?,
        },
        "balanced" => DifficultyStrategy::Balanced {
            levels: d.levels.unwrap_or_else(|| vec![1, 2, 3]),
        },
        "weighted" => {
            let raw = d.weights.context("weighted difficulty needs `weights`")?;
            let mut weights = BTreeMap::new();
            for (level, weight) in raw {
                let level: Difficulty = level
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid difficulty level in weights: {level}"))?;
                weights.insert(level, weight);
            }
            DifficultyStrategy::Weighted { weights }
        }
        "progressive" => DifficultyStrategy::Progressive {
            start: d.start.context("progressive difficulty needs `start`")?,
            end: d.end.context("progressive difficulty needs `end`")?,
        },
        other => anyhow::bail!("unknown difficulty strategy: {other}"),
    })
}

fn parse_passage(p: TomlPassage) -> Result<PassageSpec> {
    let word_count = match p.word_count.as_slice() {
        [min, max] => WordRange {
            min: *min,
            max: *max,
        },
        other => anyhow::bail!(
            "word_count for {} passages must be [min, max], got {} value(s)",
            p.passage_type,
            other.len()
        ),
    };
    let questions_per_passage = match p.questions_per_passage {
        TomlQuestionCount::Fixed(n) => QuestionsPerPassage::Fixed(n),
        TomlQuestionCount::Range(range) => match range.as_slice() {
            [n] => QuestionsPerPassage::Fixed(*n),
            [min, max] => QuestionsPerPassage::Range {
                min: *min,
                max: *max,
            },
            other => anyhow::bail!(
                "questions_per_passage for {} passages must be an integer or [min, max], got {} value(s)",
                p.passage_type,
                other.len()
            ),
        },
    };
    Ok(PassageSpec {
        passage_type: p.passage_type,
        count: p.count,
        word_count,
        questions_per_passage,
        sub_skills: p.sub_skills,
    })
}

/// Recursively load all `.toml` blueprint files from a directory.
pub fn load_blueprint_directory(dir: &Path) -> Result<Vec<SectionBlueprint>> {
    let mut blueprints = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    let mut paths = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    paths.sort();

    for path in paths {
        if path.is_dir() {
            blueprints.extend(load_blueprint_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_blueprint(&path) {
                Ok(blueprint) => blueprints.push(blueprint),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    Ok(blueprints)
}

/// A warning from blueprint validation.
#[derive(Debug, Clone)]
pub struct BlueprintWarning {
    /// Sub-skill or passage type the warning is about, if any.
    pub subject: Option<String>,
    pub message: String,
}

impl BlueprintWarning {
    fn about(subject: &str, message: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.to_string()),
            message: message.into(),
        }
    }

    fn general(message: impl Into<String>) -> Self {
        Self {
            subject: None,
            message: message.into(),
        }
    }
}

/// Validate a blueprint for common issues.
pub fn validate_blueprint(blueprint: &SectionBlueprint) -> Vec<BlueprintWarning> {
    let mut warnings = Vec::new();

    if let Err(e) = create_difficulty_plan(1, &blueprint.difficulty) {
        warnings.push(BlueprintWarning::general(format!(
            "difficulty strategy is unusable: {e}"
        )));
    }

    let standalone = blueprint.strategy.standalone();
    if matches!(blueprint.strategy, GenerationStrategy::Balanced { .. }) && standalone.is_empty() {
        warnings.push(BlueprintWarning::general("balanced strategy has no sub_skills"));
    }

    let mut seen = HashSet::new();
    for target in standalone {
        if !seen.insert(target.name.as_str()) {
            warnings.push(BlueprintWarning::about(
                &target.name,
                format!("duplicate sub-skill: {}", target.name),
            ));
        }
        if target.count == 0 {
            warnings.push(BlueprintWarning::about(&target.name, "count is zero"));
        }
        if blueprint.examples_for(&target.name).is_empty() {
            warnings.push(BlueprintWarning::about(
                &target.name,
                "no worked examples; planning will fail while this sub-skill has a gap",
            ));
        }
    }

    let passages = blueprint.strategy.passages();
    if matches!(
        blueprint.strategy,
        GenerationStrategy::PassageBased { .. } | GenerationStrategy::Hybrid { .. }
    ) && passages.is_empty()
    {
        warnings.push(BlueprintWarning::general(format!(
            "{} strategy has no passages",
            blueprint.strategy.name()
        )));
    }

    for spec in passages {
        let subject = spec.passage_type.as_str();
        if spec.count == 0 {
            warnings.push(BlueprintWarning::about(subject, "passage count is zero"));
        }
        if spec.word_count.min > spec.word_count.max {
            warnings.push(BlueprintWarning::about(
                subject,
                format!(
                    "word_count range is inverted: {} > {}",
                    spec.word_count.min, spec.word_count.max
                ),
            ));
        }
        match spec.questions_per_passage {
            QuestionsPerPassage::Fixed(0) => {
                warnings.push(BlueprintWarning::about(subject, "questions_per_passage is zero"))
            }
            QuestionsPerPassage::Range { min, max } if min > max => {
                warnings.push(BlueprintWarning::about(
                    subject,
                    format!("questions_per_passage range is inverted: {min} > {max}"),
                ))
            }
            _ => {}
        }
        if spec.sub_skills.is_empty() {
            warnings.push(BlueprintWarning::about(subject, "passage has no sub_skills"));
        }
        for sub_skill in &spec.sub_skills {
            if blueprint.examples_for(sub_skill).is_empty() {
                warnings.push(BlueprintWarning::about(
                    sub_skill,
                    format!("passage sub-skill has no worked examples ({subject})"),
                ));
            }
        }
    }

    if let GenerationStrategy::WritingPrompt { writing } = &blueprint.strategy {
        if writing.total_prompts == 0 {
            warnings.push(BlueprintWarning::general("total_prompts is zero"));
        }
        if writing.prompt_types.is_empty() {
            warnings.push(BlueprintWarning::general("writing has no prompt_types"));
        }
    } else if blueprint.answer_options < 2 {
        warnings.push(BlueprintWarning::general(format!(
            "answer_options is {}, multiple-choice items need at least 2",
            blueprint.answer_options
        )));
    }

    warnings
}
