//! In-process [`Storage`] implementation.
//!
//! Holds everything in memory behind one lock. Items not inserted
//! explicitly are derived from stored questions, so an assessment
//! assembled from generated questions can be evaluated directly.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use gradeflow_core::{
    Assessment, EvaluationRecord, GeneratedQuestion, GradableItem, ItemId, ItemResult,
    QuestionKey, StoredQuestion, SubmittedAnswer,
};

use crate::collaborators::{Storage, StorageError};

#[derive(Default)]
struct MemoryState {
    assessments: HashMap<String, Assessment>,
    items: HashMap<ItemId, GradableItem>,
    answers: HashMap<String, Vec<SubmittedAnswer>>,
    questions: BTreeMap<QuestionKey, Vec<StoredQuestion>>,
    /// Keyed by (evaluation id, item id)
    results: HashMap<(String, ItemId), ItemResult>,
    evaluations: Vec<EvaluationRecord>,
}

/// Memory-backed storage.
pub struct MemoryStorage {
    objective_max_score: u32,
    read_only: AtomicBool,
    state: RwLock<MemoryState>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            objective_max_score: 1,
            read_only: AtomicBool::new(false),
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// Score given to objective items derived from stored questions.
    pub fn with_objective_max_score(mut self, score: u32) -> Self {
        self.objective_max_score = score;
        self
    }

    /// Make every write fail with a backend error.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    pub fn insert_item(&self, item: GradableItem) {
        self.state.write().items.insert(item.id.clone(), item);
    }

    pub fn insert_assessment(&self, assessment: Assessment) {
        self.state
            .write()
            .assessments
            .insert(assessment.id.clone(), assessment);
    }

    pub fn insert_answers(&self, assessment_id: &str, answers: Vec<SubmittedAnswer>) {
        self.state
            .write()
            .answers
            .insert(assessment_id.to_string(), answers);
    }

    /// Saved evaluations, oldest first.
    pub fn evaluations(&self) -> Vec<EvaluationRecord> {
        self.state.read().evaluations.clone()
    }

    /// Stored result of one item in one evaluation run.
    pub fn result(&self, evaluation_id: &str, item_id: &str) -> Option<ItemResult> {
        self.state
            .read()
            .results
            .get(&(evaluation_id.to_string(), item_id.to_string()))
            .cloned()
    }

    pub fn result_count(&self) -> usize {
        self.state.read().results.len()
    }

    pub fn question_count(&self, key: &QuestionKey) -> usize {
        self.state.read().questions.get(key).map_or(0, Vec::len)
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("storage is read-only".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load_assessment(&self, id: &str) -> Result<Assessment, StorageError> {
        self.state
            .read()
            .assessments
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("assessment", id))
    }

    async fn load_item(&self, id: &str) -> Result<GradableItem, StorageError> {
        let state = self.state.read();
        if let Some(item) = state.items.get(id) {
            return Ok(item.clone());
        }
        state
            .questions
            .values()
            .flatten()
            .find(|stored| stored.id == id)
            .map(|stored| GradableItem::from_stored(stored, self.objective_max_score))
            .ok_or_else(|| StorageError::not_found("item", id))
    }

    async fn load_answers(&self, assessment_id: &str) -> Result<Vec<SubmittedAnswer>, StorageError> {
        Ok(self
            .state
            .read()
            .answers
            .get(assessment_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_questions(&self, key: &QuestionKey) -> Result<Vec<StoredQuestion>, StorageError> {
        Ok(self
            .state
            .read()
            .questions
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_questions(
        &self,
        key: &QuestionKey,
        questions: Vec<GeneratedQuestion>,
    ) -> Result<Vec<StoredQuestion>, StorageError> {
        self.check_writable()?;
        let stored: Vec<StoredQuestion> = questions
            .into_iter()
            .map(|question| StoredQuestion {
                id: uuid::Uuid::new_v4().to_string(),
                question,
            })
            .collect();

        self.state
            .write()
            .questions
            .entry(key.clone())
            .or_default()
            .extend(stored.iter().cloned());
        Ok(stored)
    }

    async fn save_result(&self, evaluation_id: &str, result: &ItemResult) -> Result<(), StorageError> {
        self.check_writable()?;
        self.state.write().results.insert(
            (evaluation_id.to_string(), result.item_id.clone()),
            result.clone(),
        );
        Ok(())
    }

    async fn save_evaluation(&self, record: &EvaluationRecord) -> Result<(), StorageError> {
        self.check_writable()?;
        self.state.write().evaluations.push(record.clone());
        Ok(())
    }

    async fn save_assessment(&self, assessment: &Assessment) -> Result<(), StorageError> {
        self.check_writable()?;
        self.insert_assessment(assessment.clone());
        Ok(())
    }
}
