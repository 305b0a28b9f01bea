//! Section generation engine.
//!
//! Detects gaps for a blueprint, plans the missing questions and executes the
//! plan across concurrent lanes with per-task retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{Mutex, MutexGuard, Semaphore};
use uuid::Uuid;

use crate::candidate::{CandidateState, QuestionCandidate, Rejection};
use crate::error::{provider_error, GenerationError};
use crate::gaps::{detect_section_gaps, GapReport};
use crate::generator::{Generator, PassageContext};
use crate::model::SectionBlueprint;
use crate::plan::{build_plan, GenerationPlan, PassageTask, QuestionTask, WorkUnit};
use crate::report::{PassageOutcome, PassageStatus, RunReport, RunSummary};
use crate::task::{AttemptBudget, TaskOutcome, TaskRun, TaskState, TaskStatus};
use crate::traits::{CompletionService, NewPassage, NewQuestion, StorageAdapter};
use crate::validator::{ValidationConfig, ValidationScope, Validator};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Configuration for the generation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum concurrent lanes.
    pub parallelism: usize,
    /// Attempts per task, first try included.
    pub max_attempts_per_task: u32,
    /// Optional cap on attempts across the whole run.
    pub max_total_attempts: Option<u32>,
    /// Base delay before retrying after an external failure.
    pub retry_delay: Duration,
    /// Model used to write questions and passages.
    pub generation_model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Optional system context override for generation calls.
    pub system_context_override: Option<String>,
    /// Validator settings. `expected_options` is taken from each blueprint.
    pub validation: ValidationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            max_attempts_per_task: 3,
            max_total_attempts: None,
            retry_delay: Duration::from_secs(1),
            generation_model: "claude-sonnet-4-5".to_string(),
            max_tokens: 2048,
            temperature: 0.7,
            system_context_override: None,
            validation: ValidationConfig::default(),
        }
    }
}

/// Progress reporting trait.
pub trait ProgressReporter: Send + Sync {
    fn on_plan(&self, plan: &GenerationPlan);
    fn on_attempt(&self, task: &QuestionTask, attempt: u32);
    fn on_accepted(&self, task: &QuestionTask, question_id: &str);
    fn on_rejected(&self, task: &QuestionTask, rejection: &Rejection);
    fn on_abandoned(&self, task: &QuestionTask, reason: &str);
    fn on_passage(&self, outcome: &PassageOutcome);
    fn on_run_complete(&self, summary: &RunSummary, elapsed: Duration);
}

/// No-op progress reporter.
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_plan(&self, _: &GenerationPlan) {}
    fn on_attempt(&self, _: &QuestionTask, _: u32) {}
    fn on_accepted(&self, _: &QuestionTask, _: &str) {}
    fn on_rejected(&self, _: &QuestionTask, _: &Rejection) {}
    fn on_abandoned(&self, _: &QuestionTask, _: &str) {}
    fn on_passage(&self, _: &PassageOutcome) {}
    fn on_run_complete(&self, _: &RunSummary, _: Duration) {}
}

/// Results of executing one plan.
#[derive(Debug, Clone)]
pub struct Execution {
    /// Question outcomes in plan order.
    pub outcomes: Vec<TaskOutcome>,
    pub passages: Vec<PassageOutcome>,
    pub attempts_used: u32,
}

/// Fills the gaps of one test section.
pub struct SectionGenerator {
    completion: Arc<dyn CompletionService>,
    storage: Arc<dyn StorageAdapter>,
    generator: Generator,
    config: EngineConfig,
}

impl SectionGenerator {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        storage: Arc<dyn StorageAdapter>,
        config: EngineConfig,
    ) -> Self {
        let mut generator = Generator::new(
            Arc::clone(&completion),
            config.generation_model.clone(),
            config.max_tokens,
            config.temperature,
        );
        if let Some(context) = &config.system_context_override {
            generator = generator.with_system_context(context.clone());
        }
        Self {
            completion,
            storage,
            generator,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compare the blueprint's targets with what storage already holds.
    pub async fn detect_gaps(&self, blueprint: &SectionBlueprint) -> Result<GapReport> {
        let existing = self
            .storage
            .existing_counts(&blueprint.test_type, &blueprint.section)
            .await
            .with_context(|| {
                format!(
                    "reading stored counts for {} / {}",
                    blueprint.test_type, blueprint.section
                )
            })?;
        Ok(GapReport {
            test_type: blueprint.test_type.clone(),
            section: blueprint.section.clone(),
            cells: detect_section_gaps(blueprint, &existing)?,
        })
    }

    pub fn plan(&self, blueprint: &SectionBlueprint, gaps: &GapReport) -> Result<GenerationPlan> {
        Ok(build_plan(blueprint, gaps)?)
    }

    /// Detect gaps, plan, execute, then re-detect gaps for the report.
    pub async fn run(
        &self,
        blueprint: &SectionBlueprint,
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport> {
        let start = Instant::now();
        let run_id = Uuid::new_v4();

        let gaps_before = self.detect_gaps(blueprint).await?;
        let plan = self.plan(blueprint, &gaps_before)?;
        tracing::info!(
            run = %run_id,
            test_type = %blueprint.test_type,
            section = %blueprint.section,
            deficit = gaps_before.total_deficit(),
            tasks = plan.task_count(),
            passages = plan.passage_count(),
            "starting generation run"
        );
        progress.on_plan(&plan);

        let execution = self.execute(blueprint, &plan, progress).await?;
        let remaining_gaps = self.detect_gaps(blueprint).await?;

        let elapsed = start.elapsed();
        let report = RunReport {
            id: run_id,
            created_at: chrono::Utc::now(),
            test_type: blueprint.test_type.clone(),
            section: blueprint.section.clone(),
            strategy: plan.strategy.clone(),
            gaps_before,
            planned_tasks: plan.task_count(),
            planned_passages: plan.passage_count(),
            outcomes: execution.outcomes,
            passages: execution.passages,
            remaining_gaps,
            attempts_used: execution.attempts_used,
            duration_ms: elapsed.as_millis() as u64,
        };
        let summary = report.summary();
        tracing::info!(
            run = %run_id,
            accepted = summary.accepted,
            abandoned = summary.abandoned,
            remaining = summary.deficit_after,
            "generation run finished"
        );
        progress.on_run_complete(&summary, elapsed);
        Ok(report)
    }

    /// Execute a plan. Failures inside a task never abort other tasks.
    pub async fn execute(
        &self,
        blueprint: &SectionBlueprint,
        plan: &GenerationPlan,
        progress: &dyn ProgressReporter,
    ) -> Result<Execution> {
        let validator = Validator::new(
            Arc::clone(&self.completion),
            ValidationConfig {
                expected_options: blueprint.answer_options,
                ..self.config.validation.clone()
            },
        );
        let mut write_locks = HashMap::new();
        for task in plan.question_tasks() {
            write_locks
                .entry(task.sub_skill.clone())
                .or_insert_with(|| Mutex::new(()));
        }
        let ctx = RunContext {
            blueprint,
            storage: self.storage.as_ref(),
            generator: &self.generator,
            validator,
            budget: AttemptBudget::new(self.config.max_total_attempts),
            write_locks,
            config: &self.config,
            progress,
        };

        let semaphore = Semaphore::new(self.config.parallelism.max(1));
        let mut futures = FuturesUnordered::new();
        for lane in group_lanes(plan) {
            let ctx = &ctx;
            let semaphore = &semaphore;
            futures.push(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| anyhow::anyhow!("semaphore closed"))?;
                Ok::<_, anyhow::Error>(ctx.run_lane(lane).await)
            });
        }

        let mut outcomes = Vec::with_capacity(plan.task_count());
        let mut passages = Vec::new();
        while let Some(result) = futures.next().await {
            let (lane_outcomes, passage) = result?;
            outcomes.extend(lane_outcomes);
            passages.extend(passage);
        }
        drop(futures);
        outcomes.sort_by_key(|o| o.task_id);

        Ok(Execution {
            outcomes,
            passages,
            attempts_used: ctx.budget.used(),
        })
    }
}

/// Work that runs sequentially inside one concurrency slot.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Lane {
    /// Standalone tasks of one (mode, sub-skill), in plan order.
    Standalone(Vec<QuestionTask>),
    Passage(PassageTask),
}

fn group_lanes(plan: &GenerationPlan) -> Vec<Lane> {
    let mut lanes = Vec::new();
    let mut by_skill: HashMap<(&str, &str), usize> = HashMap::new();
    for unit in &plan.units {
        match unit {
            WorkUnit::Question(task) => {
                let key = (task.mode.as_str(), task.sub_skill.as_str());
                match by_skill.get(&key) {
                    Some(&i) => {
                        if let Some(Lane::Standalone(tasks)) = lanes.get_mut(i) {
                            tasks.push(task.clone());
                        }
                    }
                    None => {
                        by_skill.insert(key, lanes.len());
                        lanes.push(Lane::Standalone(vec![task.clone()]));
                    }
                }
            }
            WorkUnit::Passage(passage) => lanes.push(Lane::Passage(passage.clone())),
        }
    }
    lanes
}

/// Exponential retry delay, armed only by external failures.
struct Backoff {
    next: Duration,
    armed: Option<Duration>,
}

impl Backoff {
    fn new(base: Duration) -> Self {
        Self {
            next: base,
            armed: None,
        }
    }

    fn arm(&mut self, hint: Option<Duration>) {
        self.armed = Some(hint.unwrap_or(self.next));
        self.next = (self.next * 2).min(MAX_RETRY_DELAY);
    }

    async fn wait(&mut self) {
        if let Some(delay) = self.armed.take() {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

struct RunContext<'a> {
    blueprint: &'a SectionBlueprint,
    storage: &'a dyn StorageAdapter,
    generator: &'a Generator,
    validator: Validator,
    budget: AttemptBudget,
    /// One lock per sub-skill, held from the duplicate check through the insert.
    write_locks: HashMap<String, Mutex<()>>,
    config: &'a EngineConfig,
    progress: &'a dyn ProgressReporter,
}

impl RunContext<'_> {
    async fn run_lane(&self, lane: Lane) -> (Vec<TaskOutcome>, Option<PassageOutcome>) {
        match lane {
            Lane::Standalone(tasks) => {
                let mut outcomes = Vec::with_capacity(tasks.len());
                for task in &tasks {
                    outcomes.push(self.run_question(task, None).await);
                }
                (outcomes, None)
            }
            Lane::Passage(task) => self.run_passage(&task).await,
        }
    }

    fn scope<'s>(&'s self, passage: Option<&'s PassageContext>) -> ValidationScope<'s> {
        ValidationScope {
            storage: self.storage,
            test_type: &self.blueprint.test_type,
            section: &self.blueprint.section,
            passage,
        }
    }

    async fn write_lock(&self, sub_skill: &str) -> Option<MutexGuard<'_, ()>> {
        match self.write_locks.get(sub_skill) {
            Some(lock) => Some(lock.lock().await),
            None => None,
        }
    }

    /// Record an external failure. Returns `true` when the task must stop.
    fn record_failure(&self, run: &mut TaskRun, backoff: &mut Backoff, err: anyhow::Error) -> bool {
        let reason = format!("{err:#}");
        match provider_error(&err) {
            Some(e) if e.is_permanent() => {
                run.abandon(reason);
                return true;
            }
            Some(e) => backoff.arm(e.retry_after_ms().map(Duration::from_millis)),
            None => backoff.arm(None),
        }
        tracing::warn!(attempt = run.attempts(), %reason, "attempt failed");
        run.fail(reason);
        false
    }

    async fn run_question(
        &self,
        task: &QuestionTask,
        passage: Option<&PassageContext>,
    ) -> TaskOutcome {
        let mut run = TaskRun::new(task.sub_skill.clone(), self.config.max_attempts_per_task);
        let mut backoff = Backoff::new(self.config.retry_delay);
        let mut flags = Vec::new();

        while let Some(attempt) = run.begin_attempt(&self.budget) {
            backoff.wait().await;
            self.progress.on_attempt(task, attempt);
            tracing::debug!(
                task = task.id,
                cell = %task.cell(),
                attempt,
                example = ?task.example_for_attempt(attempt),
                "generating question"
            );

            let mut candidate = match self
                .generator
                .generate_question(self.blueprint, task, attempt, passage, run.feedback())
                .await
            {
                Ok(candidate) => candidate,
                Err(e) => {
                    if self.record_failure(&mut run, &mut backoff, e) {
                        break;
                    }
                    continue;
                }
            };

            let verdict = match self.validator.validate_content(&mut candidate, passage).await {
                Ok(()) => self.finish_candidate(&mut candidate, passage).await,
                Err(e) => Err(e),
            };

            match verdict {
                Err(e) => {
                    if self.record_failure(&mut run, &mut backoff, e) {
                        break;
                    }
                }
                Ok(Some(id)) => {
                    tracing::debug!(task = task.id, question = %id, "question accepted");
                    self.progress.on_accepted(task, &id);
                    flags = std::mem::take(&mut candidate.flags);
                    run.accept(id);
                    break;
                }
                Ok(None) => match candidate.rejection().cloned() {
                    Some(rejection) => {
                        let error = GenerationError::from(&rejection);
                        tracing::warn!(task = task.id, cell = %task.cell(), %error, "candidate rejected");
                        self.progress.on_rejected(task, &rejection);
                        run.reject(rejection);
                    }
                    None => run.fail("candidate did not reach a verdict"),
                },
            }
        }

        let (status, attempts, rejections) = run.into_status();
        if let TaskStatus::Abandoned { reason } = &status {
            tracing::error!(task = task.id, cell = %task.cell(), %reason, "task abandoned");
            self.progress.on_abandoned(task, reason);
        }
        TaskOutcome {
            task_id: task.id,
            cell: task.cell(),
            attempts,
            status,
            rejections,
            flags,
        }
    }

    /// Duplicate check and insert for a candidate that passed the content
    /// stages. Returns the stored id on acceptance.
    async fn finish_candidate(
        &self,
        candidate: &mut QuestionCandidate,
        passage: Option<&PassageContext>,
    ) -> Result<Option<String>> {
        if candidate.state != CandidateState::CorrectnessChecked {
            return Ok(None);
        }

        let _guard = self.write_lock(&candidate.sub_skill).await;
        self.validator
            .validate_novelty(candidate, self.scope(passage))
            .await?;
        if !candidate.passed_all_stages() {
            return Ok(None);
        }

        match self
            .storage
            .insert_question(&to_new_question(self.blueprint, candidate))
            .await
        {
            Ok(id) => {
                candidate.accept(id.clone());
                Ok(Some(id))
            }
            Err(e) => {
                candidate.discard(format!("insert failed: {e:#}"));
                Ok(None)
            }
        }
    }

    async fn run_passage(&self, task: &PassageTask) -> (Vec<TaskOutcome>, Option<PassageOutcome>) {
        let mut run = TaskRun::new(
            format!("{} passage", task.passage_type),
            self.config.max_attempts_per_task,
        );
        let mut backoff = Backoff::new(self.config.retry_delay);
        let mut stored = None;

        while let Some(attempt) = run.begin_attempt(&self.budget) {
            backoff.wait().await;
            tracing::debug!(mode = %task.mode, slot = task.slot, attempt, "generating passage");

            let passage = match self
                .generator
                .generate_passage(self.blueprint, task, run.feedback())
                .await
            {
                Ok(passage) => passage,
                Err(e) => {
                    if self.record_failure(&mut run, &mut backoff, e) {
                        break;
                    }
                    continue;
                }
            };

            if !task.word_count.contains(passage.word_count) {
                tracing::warn!(
                    slot = task.slot,
                    words = passage.word_count,
                    "passage length outside range"
                );
                run.fail(format!(
                    "passage has {} words, expected {} to {}",
                    passage.word_count, task.word_count.min, task.word_count.max
                ));
                continue;
            }

            let record = NewPassage {
                test_type: self.blueprint.test_type.clone(),
                section: self.blueprint.section.clone(),
                mode: task.mode.clone(),
                passage_type: task.passage_type.clone(),
                difficulty: task.difficulty,
                title: passage.title.clone(),
                text: passage.text.clone(),
                word_count: passage.word_count,
            };
            match self.storage.insert_passage(&record).await {
                Ok(id) => {
                    run.accept(id.clone());
                    stored = Some((
                        PassageContext {
                            id,
                            title: passage.title,
                            text: passage.text,
                        },
                        passage.word_count,
                    ));
                    break;
                }
                Err(e) => run.fail(format!("passage insert failed: {e:#}")),
            }
        }

        let attempts = run.attempts();
        let outcome = |status| PassageOutcome {
            mode: task.mode.clone(),
            passage_type: task.passage_type.clone(),
            slot: task.slot,
            difficulty: task.difficulty,
            attempts,
            status,
        };

        match stored {
            Some((context, word_count)) => {
                let passage_outcome = outcome(PassageStatus::Stored {
                    passage_id: context.id.clone(),
                    word_count,
                });
                self.progress.on_passage(&passage_outcome);
                let mut outcomes = Vec::with_capacity(task.questions.len());
                for question in &task.questions {
                    outcomes.push(self.run_question(question, Some(&context)).await);
                }
                (outcomes, Some(passage_outcome))
            }
            None => {
                let reason = match run.state() {
                    TaskState::Abandoned(reason) => reason.clone(),
                    _ => "passage was not stored".to_string(),
                };
                tracing::error!(mode = %task.mode, slot = task.slot, %reason, "passage abandoned");
                let passage_outcome = outcome(PassageStatus::Abandoned {
                    reason: reason.clone(),
                });
                self.progress.on_passage(&passage_outcome);
                let outcomes = task
                    .questions
                    .iter()
                    .map(|question| {
                        let reason = format!("passage abandoned: {reason}");
                        self.progress.on_abandoned(question, &reason);
                        TaskOutcome {
                            task_id: question.id,
                            cell: question.cell(),
                            attempts: 0,
                            status: TaskStatus::Abandoned { reason },
                            rejections: Vec::new(),
                            flags: Vec::new(),
                        }
                    })
                    .collect();
                (outcomes, Some(passage_outcome))
            }
        }
    }
}

fn to_new_question(blueprint: &SectionBlueprint, candidate: &QuestionCandidate) -> NewQuestion {
    let fields = candidate.fields.clone().unwrap_or_default();
    NewQuestion {
        test_type: blueprint.test_type.clone(),
        section: blueprint.section.clone(),
        mode: candidate.mode.clone(),
        sub_skill: candidate.sub_skill.clone(),
        difficulty: candidate.difficulty,
        response_type: candidate.response_type,
        passage_id: candidate.passage_id.clone(),
        question_text: fields.question_text,
        answer_options: fields.answer_options,
        correct_answer: fields.correct_answer,
        explanation: fields.explanation,
        generation_model: candidate.model.clone(),
        flags: candidate.flags.clone(),
    }
}
