//! Append-only JSON-lines storage.
//!
//! A store is a directory holding `questions.jsonl` and `passages.jsonl`, one
//! serialized record per line. Existing files are loaded into an in-memory
//! index on open; every insert appends a line and updates the index.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use questgen_core::model::CellKey;
use questgen_core::traits::{
    NewPassage, NewQuestion, StorageAdapter, StoredPassage, StoredQuestion,
};

use crate::{stamp_passage, stamp_question, Records};

pub const QUESTIONS_FILE: &str = "questions.jsonl";
pub const PASSAGES_FILE: &str = "passages.jsonl";

/// File-backed store in a directory.
#[derive(Debug)]
pub struct JsonlStore {
    dir: PathBuf,
    records: RwLock<Records>,
}

impl JsonlStore {
    /// Open (or create) a store in `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create store directory {}", dir.display()))?;

        let questions: Vec<StoredQuestion> = read_lines(&dir.join(QUESTIONS_FILE)).await?;
        let passages: Vec<StoredPassage> = read_lines(&dir.join(PASSAGES_FILE)).await?;
        tracing::debug!(
            dir = %dir.display(),
            questions = questions.len(),
            passages = passages.len(),
            "opened store"
        );

        Ok(Self {
            dir,
            records: RwLock::new(Records {
                questions,
                passages,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn question_count(&self) -> usize {
        self.records.read().await.questions.len()
    }

    pub async fn passages(&self) -> Vec<StoredPassage> {
        self.records.read().await.passages.clone()
    }
}

/// Read every record in a JSON-lines file. Missing files are empty; lines
/// that fail to parse are skipped with a warning.
async fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    let mut records = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(
                file = %path.display(),
                line = index + 1,
                "skipping unreadable record: {e}"
            ),
        }
    }
    Ok(records)
}

async fn append_line<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let mut line = serde_json::to_string(record).context("failed to serialize record")?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(line.as_bytes())
        .await
        .with_context(|| format!("failed to append to {}", path.display()))?;
    file.flush().await?;
    Ok(())
}

#[async_trait]
impl StorageAdapter for JsonlStore {
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
        // Hold the index lock across the append so file order matches memory.
        let mut records = self.records.write().await;
        append_line(&self.dir.join(QUESTIONS_FILE), &stored).await?;
        let id = stored.id.clone();
        records.questions.push(stored);
        Ok(id)
    }

    async fn insert_passage(&self, passage: &NewPassage) -> anyhow::Result<String> {
        let stored = stamp_passage(passage);
        let mut records = self.records.write().await;
        append_line(&self.dir.join(PASSAGES_FILE), &stored).await?;
        let id = stored.id.clone();
        records.passages.push(stored);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{passage, question};

    #[tokio::test]
    async fn inserts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = JsonlStore::open(dir.path()).await.unwrap();
            store.insert_question(&question("Analogies", Some(1), "first")).await.unwrap();
            let id = store
                .insert_question(&question("Analogies", Some(1), "second"))
                .await
                .unwrap();
            store.insert_passage(&passage()).await.unwrap();
            id
        };

        let reopened = JsonlStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.question_count().await, 2);
        assert_eq!(reopened.passages().await.len(), 1);

        let recent = reopened
            .recent_questions("Year 7", "Verbal", "Analogies", 1)
            .await
            .unwrap();
        assert_eq!(recent[0].id, id);
        assert_eq!(recent[0].question.question_text, "second");

        let counts = reopened.existing_counts("Year 7", "Verbal").await.unwrap();
        assert_eq!(counts[&CellKey::new("practice_1", "Analogies", Some(1))], 2);
    }

    #[tokio::test]
    async fn file_is_one_record_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::open(dir.path()).await.unwrap();
        store.insert_question(&question("Synonyms", None, "a")).await.unwrap();
        store.insert_question(&question("Synonyms", None, "b")).await.unwrap();

        let content = std::fs::read_to_string(dir.path().join(QUESTIONS_FILE)).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["question_text"], "a");
        assert!(first["id"].is_string());
    }

    #[tokio::test]
    async fn unreadable_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonlStore::open(dir.path()).await.unwrap();
            store.insert_question(&question("Synonyms", None, "kept")).await.unwrap();
        }
        let path = dir.path().join(QUESTIONS_FILE);
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{not json\n\n");
        std::fs::write(&path, content).unwrap();

        let store = JsonlStore::open(dir.path()).await.unwrap();
        assert_eq!(store.question_count().await, 1);
    }

    #[tokio::test]
    async fn open_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("data").join("store");
        let store = JsonlStore::open(&nested).await.unwrap();
        assert!(nested.is_dir());
        assert_eq!(store.dir(), nested.as_path());
    }
}
