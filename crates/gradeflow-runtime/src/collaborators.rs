//! Interfaces to the systems the pipeline consumes but does not own:
//! persistence, knowledge retrieval and text extraction from images.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use gradeflow_core::{
    Assessment, EvaluationRecord, GeneratedQuestion, GradableItem, ItemResult, QuestionKey,
    StoredQuestion, SubmittedAnswer,
};

/// Errors from the storage collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StorageError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Persistence used by the pipeline.
///
/// Results are keyed by evaluation run and item. Concurrent `save_result`
/// calls never touch the same record, and a re-grade never overwrites an
/// earlier run.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn load_assessment(&self, id: &str) -> Result<Assessment, StorageError>;

    async fn load_item(&self, id: &str) -> Result<GradableItem, StorageError>;

    async fn load_answers(&self, assessment_id: &str) -> Result<Vec<SubmittedAnswer>, StorageError>;

    /// Stored questions for a key, in insertion order.
    async fn find_questions(&self, key: &QuestionKey) -> Result<Vec<StoredQuestion>, StorageError>;

    /// Persist questions and return them with their assigned ids.
    async fn save_questions(
        &self,
        key: &QuestionKey,
        questions: Vec<GeneratedQuestion>,
    ) -> Result<Vec<StoredQuestion>, StorageError>;

    /// Persist one item result of the evaluation run `evaluation_id`.
    async fn save_result(&self, evaluation_id: &str, result: &ItemResult) -> Result<(), StorageError>;

    async fn save_evaluation(&self, record: &EvaluationRecord) -> Result<(), StorageError>;

    async fn save_assessment(&self, assessment: &Assessment) -> Result<(), StorageError>;
}

/// Errors from the retrieval collaborator.
///
/// "No results" is not an error; it is an empty [`Retrieval`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrievalError {
    #[error("retrieval backend unavailable: {0}")]
    Unavailable(String),

    #[error("retrieval failed: {0}")]
    Failed(String),
}

/// A retrieval request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetrievalQuery {
    pub text: String,
    pub subject: Option<String>,
    pub topic: Option<String>,
    pub top_k: usize,
}

impl RetrievalQuery {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            subject: None,
            topic: None,
            top_k,
        }
    }

    pub fn subject(mut self, subject: Option<&str>) -> Self {
        self.subject = subject.map(str::to_string);
        self
    }

    pub fn topic(mut self, topic: Option<&str>) -> Self {
        self.topic = topic.map(str::to_string);
        self
    }
}

/// One retrieved passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    #[serde(default)]
    pub score: Option<f32>,
    #[serde(default)]
    pub source_label: Option<String>,
}

impl Passage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            score: None,
            source_label: None,
        }
    }

    pub fn with_source(mut self, label: impl Into<String>) -> Self {
        self.source_label = Some(label.into());
        self
    }
}

/// Ranked retrieval output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Retrieval {
    /// One-line synthesized answer, may be empty
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub passages: Vec<Passage>,
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        self.summary.trim().is_empty() && self.passages.is_empty()
    }
}

/// Knowledge retrieval capability.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Retrieval, RetrievalError>;
}

/// Text extracted from an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub text: String,
    /// 0.0 to 1.0
    pub confidence: f32,
    pub success: bool,
}

impl Extraction {
    pub fn failed() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            success: false,
        }
    }
}

/// Image-to-text capability. Failure is reported in the result, never raised.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, image: &[u8]) -> Extraction;
}

/// Retriever for deployments without a knowledge base.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetrieval;

#[async_trait]
impl Retriever for NoRetrieval {
    async fn retrieve(&self, _query: &RetrievalQuery) -> Result<Retrieval, RetrievalError> {
        Ok(Retrieval::default())
    }
}

/// Extractor for deployments without OCR.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTextExtraction;

#[async_trait]
impl TextExtractor for NoTextExtraction {
    async fn extract(&self, _image: &[u8]) -> Extraction {
        Extraction::failed()
    }
}
