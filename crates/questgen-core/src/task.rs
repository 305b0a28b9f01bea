//! Per-task retry accounting and the run-wide attempt budget.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::candidate::Rejection;
use crate::error::GenerationError;
use crate::model::CellKey;

/// Shared cap on attempts across every lane of a run.
#[derive(Debug)]
pub struct AttemptBudget {
    limit: Option<u32>,
    used: AtomicU32,
}

impl AttemptBudget {
    pub fn new(limit: Option<u32>) -> Self {
        Self {
            limit,
            used: AtomicU32::new(0),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Take one attempt from the budget. `false` once it is spent.
    pub fn try_acquire(&self) -> bool {
        match self.limit {
            None => {
                self.used.fetch_add(1, Ordering::SeqCst);
                true
            }
            Some(limit) => self
                .used
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                    (used < limit).then_some(used + 1)
                })
                .is_ok(),
        }
    }

    pub fn used(&self) -> u32 {
        self.used.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }
}

/// Where a task is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    /// Zero-based attempt in flight.
    Attempting(u32),
    Accepted(String),
    Abandoned(String),
}

/// Retry state machine for one unit of work.
///
/// `Pending -> Attempting(k) -> Accepted | Pending (retry) | Abandoned`.
#[derive(Debug)]
pub struct TaskRun {
    label: String,
    max_attempts: u32,
    attempts: u32,
    state: TaskState,
    last_reason: Option<String>,
    rejections: Vec<Rejection>,
}

impl TaskRun {
    pub fn new(label: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            label: label.into(),
            max_attempts: max_attempts.max(1),
            attempts: 0,
            state: TaskState::Pending,
            last_reason: None,
            rejections: Vec::new(),
        }
    }

    /// Start the next attempt, returning its zero-based index.
    ///
    /// Returns `None` and abandons the task when either its own attempts or
    /// the shared budget are spent.
    pub fn begin_attempt(&mut self, budget: &AttemptBudget) -> Option<u32> {
        if self.state.is_finished() {
            return None;
        }
        if self.attempts >= self.max_attempts {
            let exhausted = GenerationError::PlanExhausted {
                sub_skill: self.label.clone(),
                attempts: self.attempts,
                reason: self
                    .last_reason
                    .clone()
                    .unwrap_or_else(|| "no attempt succeeded".to_string()),
            };
            self.state = TaskState::Abandoned(exhausted.to_string());
            return None;
        }
        if !budget.try_acquire() {
            self.state = TaskState::Abandoned("budget exhausted".to_string());
            return None;
        }
        let attempt = self.attempts;
        self.attempts += 1;
        self.state = TaskState::Attempting(attempt);
        Some(attempt)
    }

    /// The attempt was rejected by validation; the task goes back to pending.
    pub fn reject(&mut self, rejection: Rejection) {
        self.last_reason = Some(rejection.to_string());
        self.rejections.push(rejection);
        self.state = TaskState::Pending;
    }

    /// The attempt failed on an external call; the task goes back to pending.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.last_reason = Some(reason.into());
        self.state = TaskState::Pending;
    }

    pub fn accept(&mut self, id: impl Into<String>) {
        self.state = TaskState::Accepted(id.into());
    }

    pub fn abandon(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.last_reason = Some(reason.clone());
        self.state = TaskState::Abandoned(reason);
    }

    /// Reason the previous attempt failed, fed back into the next prompt.
    pub fn feedback(&self) -> Option<&str> {
        self.last_reason.as_deref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn rejections(&self) -> &[Rejection] {
        &self.rejections
    }

    /// Final status. A task still pending or attempting counts as abandoned.
    pub fn into_status(self) -> (TaskStatus, u32, Vec<Rejection>) {
        let status = match self.state {
            TaskState::Accepted(question_id) => TaskStatus::Accepted { question_id },
            TaskState::Abandoned(reason) => TaskStatus::Abandoned { reason },
            TaskState::Pending | TaskState::Attempting(_) => TaskStatus::Abandoned {
                reason: self
                    .last_reason
                    .unwrap_or_else(|| "not attempted".to_string()),
            },
        };
        (status, self.attempts, self.rejections)
    }
}

impl TaskState {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskState::Accepted(_) | TaskState::Abandoned(_))
    }
}

/// Terminal status of a question task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    Accepted { question_id: String },
    Abandoned { reason: String },
}

/// Record of one question task after execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: usize,
    pub cell: CellKey,
    pub attempts: u32,
    #[serde(flatten)]
    pub status: TaskStatus,
    #[serde(default)]
    pub rejections: Vec<Rejection>,
    #[serde(default)]
    pub flags: Vec<String>,
}

impl TaskOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self.status, TaskStatus::Accepted { .. })
    }

    pub fn abandon_reason(&self) -> Option<&str> {
        match &self.status {
            TaskStatus::Abandoned { reason } => Some(reason),
            TaskStatus::Accepted { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::ValidationStage;

    fn duplicate() -> Rejection {
        Rejection {
            stage: Some(ValidationStage::Duplicate),
            reason: "duplicate".into(),
        }
    }

    #[test]
    fn retries_until_per_task_limit() {
        let budget = AttemptBudget::unlimited();
        let mut run = TaskRun::new("Analogies", 3);

        assert_eq!(run.begin_attempt(&budget), Some(0));
        run.reject(duplicate());
        assert_eq!(run.feedback(), Some("duplicate: duplicate"));
        assert_eq!(run.begin_attempt(&budget), Some(1));
        run.fail("timeout");
        assert_eq!(run.begin_attempt(&budget), Some(2));
        run.fail("timeout");
        assert_eq!(run.begin_attempt(&budget), None);

        match run.state() {
            TaskState::Abandoned(reason) => {
                assert!(reason.contains("Analogies after 3 attempt(s): timeout"))
            }
            other => panic!("unexpected state {other:?}"),
        }
        assert_eq!(budget.used(), 3);
    }

    #[test]
    fn accepted_task_takes_no_more_attempts() {
        let budget = AttemptBudget::unlimited();
        let mut run = TaskRun::new("Analogies", 3);
        run.begin_attempt(&budget);
        run.accept("q-9");
        assert_eq!(run.begin_attempt(&budget), None);
        let (status, attempts, _) = run.into_status();
        assert_eq!(
            status,
            TaskStatus::Accepted {
                question_id: "q-9".into()
            }
        );
        assert_eq!(attempts, 1);
    }

    #[test]
    fn shared_budget_stops_all_tasks() {
        let budget = AttemptBudget::new(Some(2));
        let mut a = TaskRun::new("A", 5);
        let mut b = TaskRun::new("B", 5);

        assert!(a.begin_attempt(&budget).is_some());
        a.fail("x");
        assert!(b.begin_attempt(&budget).is_some());
        b.fail("y");
        assert!(a.begin_attempt(&budget).is_none());
        assert_eq!(a.state(), &TaskState::Abandoned("budget exhausted".into()));
        assert!(b.begin_attempt(&budget).is_none());
        assert_eq!(budget.used(), 2);
    }

    #[test]
    fn budget_is_safe_across_threads() {
        let budget = std::sync::Arc::new(AttemptBudget::new(Some(50)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let budget = budget.clone();
                std::thread::spawn(move || (0..20).filter(|_| budget.try_acquire()).count())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 50);
        assert_eq!(budget.used(), 50);
    }
}
