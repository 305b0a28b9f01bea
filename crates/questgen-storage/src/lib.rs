//! questgen-storage: persistence for generated content.
//!
//! Both backends implement `StorageAdapter` on top of the same in-memory
//! index; `JsonlStore` additionally appends every insert to disk.

pub mod jsonl;
pub mod memory;

use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use questgen_core::model::CellKey;
use questgen_core::traits::{NewPassage, NewQuestion, StoredPassage, StoredQuestion};

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

/// Questions and passages in insertion order.
#[derive(Debug, Default, Clone)]
pub(crate) struct Records {
    pub questions: Vec<StoredQuestion>,
    pub passages: Vec<StoredPassage>,
}

impl Records {
    pub fn counts(&self, test_type: &str, section: &str) -> HashMap<CellKey, u32> {
        let mut counts = HashMap::new();
        for stored in &self.questions {
            let q = &stored.question;
            if q.test_type == test_type && q.section == section {
                *counts.entry(q.cell()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Newest first. Insertion order breaks timestamp ties.
    pub fn recent(
        &self,
        test_type: &str,
        section: &str,
        sub_skill: &str,
        limit: usize,
    ) -> Vec<StoredQuestion> {
        self.questions
            .iter()
            .rev()
            .filter(|s| {
                s.question.test_type == test_type
                    && s.question.section == section
                    && s.question.sub_skill == sub_skill
            })
            .take(limit)
            .cloned()
            .collect()
    }
}

pub(crate) fn stamp_question(question: &NewQuestion) -> StoredQuestion {
    StoredQuestion {
        id: Uuid::new_v4().to_string(),
        created_at: Utc::now(),
        question: question.clone(),
    }
}

pub(crate) fn stamp_passage(passage: &NewPassage) -> StoredPassage {
    StoredPassage {
        id: Uuid::new_v4().to_string(),
        created_at: Utc::now(),
        passage: passage.clone(),
    }
}
