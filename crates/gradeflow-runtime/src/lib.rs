//! # gradeflow-runtime
//!
//! Provider-backed orchestration for gradeflow.
//!
//! `gradeflow-core` holds the deterministic parts (objective grading,
//! validation, aggregation). This crate adds everything that waits on
//! something else:
//! - the generation gateway with ordered provider fallback
//! - retrieval context building and reference lookups
//! - the grading orchestrator (bounded fan-out, per-item failure isolation)
//! - the question generation orchestrator and assessment assembly
//!
//! ## Example
//!
//! ```rust,ignore
//! use gradeflow_runtime::{MemoryStorage, Pipeline, RuntimeConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = RuntimeConfig::from_file("gradeflow.yaml")?;
//! let pipeline = Pipeline::builder()
//!     .config(config)
//!     .storage(Arc::new(MemoryStorage::new()))
//!     .build()?;
//!
//! let record = pipeline.evaluate("assessment-1", &CancellationToken::new()).await?;
//! println!("{}%", record.overall_percentage);
//! ```

use thiserror::Error;

pub mod collaborators;
pub mod config;
pub mod context;
pub mod gateway;
pub mod generation;
pub mod grading;
pub mod memory;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod recommend;

#[cfg(test)]
mod test_support;

pub use collaborators::{
    Extraction, NoRetrieval, NoTextExtraction, Passage, Retrieval, RetrievalError, RetrievalQuery,
    Retriever, Storage, StorageError, TextExtractor,
};
pub use config::{
    ConfigError, ContextSettings, GenerationSettings, GradingSettings, ProviderEntry,
    RecommendationSettings, RuntimeConfig,
};
pub use context::{ContextError, RetrievalContextBuilder};
pub use gateway::{GatewayError, GatewayStats, Generation, GenerationGateway, ProviderStats};
pub use generation::{QuestionGenerationOrchestrator, QuestionRequest};
pub use grading::GradingOrchestrator;
pub use memory::MemoryStorage;
pub use pipeline::{Pipeline, PipelineBuilder};
pub use providers::{
    Completion, CompletionRequest, LlmProvider, ProviderError, ProviderFactory, ProviderRegistry,
};
pub use recommend::ReferenceLookup;

/// Errors surfaced to callers of the pipeline.
///
/// Per-item problems never show up here; they become item statuses.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("no responses submitted for assessment '{0}'")]
    NoResponses(String),

    #[error("invalid input: {0}")]
    InputInvalid(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { kind, id } => PipelineError::NotFound { kind, id },
            StorageError::Backend(message) => PipelineError::Storage(message),
        }
    }
}
