//! In-process storage.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use questgen_core::model::CellKey;
use questgen_core::traits::{
    NewPassage, NewQuestion, StorageAdapter, StoredPassage, StoredQuestion,
};

use crate::{stamp_passage, stamp_question, Records};

/// Storage that lives for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with already-stored questions.
    pub fn with_questions(questions: Vec<StoredQuestion>) -> Self {
        Self {
            records: RwLock::new(Records {
                questions,
                passages: Vec::new(),
            }),
        }
    }

    /// Snapshot of all stored questions in insertion order.
    pub async fn questions(&self) -> Vec<StoredQuestion> {
        self.records.read().await.questions.clone()
    }

    pub async fn passages(&self) -> Vec<StoredPassage> {
        self.records.read().await.passages.clone()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStore {
    async fn existing_counts(
        &self,
        test_type: &str,
        section: &str,
    ) -> anyhow::Result<HashMap<CellKey, u32>> {
        Ok(self.records.read().await.counts(test_type, section))
    }

    async fn recent_questions(
        &self,
        test_type: &str,
        section: &str,
        sub_skill: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<StoredQuestion>> {
        Ok(self
            .records
            .read()
            .await
            .recent(test_type, section, sub_skill, limit))
    }

    async fn insert_question(&self, question: &NewQuestion) -> anyhow::Result<String> {
        let stored = stamp_question(question);
        let id = stored.id.clone();
        self.records.write().await.questions.push(stored);
        Ok(id)
    }

    async fn insert_passage(&self, passage: &NewPassage) -> anyhow::Result<String> {
        let stored = stamp_passage(passage);
        let id = stored.id.clone();
        self.records.write().await.passages.push(stored);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{passage, question};

    #[tokio::test]
    async fn counts_per_cell() {
        let store = MemoryStore::new();
        store.insert_question(&question("Analogies", Some(1), "a")).await.unwrap();
        store.insert_question(&question("Analogies", Some(1), "b")).await.unwrap();
        store.insert_question(&question("Analogies", Some(2), "c")).await.unwrap();
        store.insert_question(&question("Synonyms", None, "d")).await.unwrap();

        let counts = store.existing_counts("Year 7", "Verbal").await.unwrap();
        assert_eq!(counts[&CellKey::new("practice_1", "Analogies", Some(1))], 2);
        assert_eq!(counts[&CellKey::new("practice_1", "Analogies", Some(2))], 1);
        assert_eq!(counts[&CellKey::new("practice_1", "Synonyms", None)], 1);
        assert!(store
            .existing_counts("Year 7", "Reading")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_limited() {
        let store = MemoryStore::new();
        for text in ["one", "two", "three"] {
            store.insert_question(&question("Analogies", Some(1), text)).await.unwrap();
        }
        store.insert_question(&question("Synonyms", Some(1), "other")).await.unwrap();

        let recent = store
            .recent_questions("Year 7", "Verbal", "Analogies", 2)
            .await
            .unwrap();
        let texts: Vec<&str> = recent
            .iter()
            .map(|s| s.question.question_text.as_str())
            .collect();
        assert_eq!(texts, vec!["three", "two"]);
    }

    #[tokio::test]
    async fn inserts_return_distinct_ids() {
        let store = MemoryStore::new();
        let a = store.insert_question(&question("Analogies", None, "a")).await.unwrap();
        let b = store.insert_question(&question("Analogies", None, "b")).await.unwrap();
        assert_ne!(a, b);

        let p = store.insert_passage(&passage()).await.unwrap();
        let passages = store.passages().await;
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].id, p);
    }
}
