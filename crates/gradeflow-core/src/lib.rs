//! # gradeflow-core
//!
//! Deterministic building blocks of the gradeflow pipeline.
//!
//! This crate never performs I/O. It covers:
//! - the data model for items, answers, results and generated questions
//! - objective grading and score clamping
//! - validation of untrusted provider payloads
//! - aggregation of item results into an evaluation record
//! - fallback question templates and assessment selection strategies
//!
//! ## Example
//!
//! ```rust,ignore
//! use gradeflow_core::{validate, SchemaKind, ValidatedPayload};
//!
//! let raw = "```json\n{\"score\": 7, \"strengths\": [], \"weaknesses\": [], \"concept_gaps\": []}\n```";
//! match validate(raw, &SchemaKind::Evaluation { max_score: 10 })? {
//!     ValidatedPayload::Evaluation(grade) => println!("score {}", grade.score),
//!     _ => unreachable!(),
//! }
//! ```

pub mod aggregator;
pub mod fallback;
pub mod grading;
pub mod payload;
pub mod selection;
pub mod types;

// Re-export main types at crate root
pub use aggregator::{
    merge_gaps, overall_percentage, practice_recommendations, top_gaps, Aggregate, Aggregator,
};
pub use fallback::{fallback_objective, fallback_subjective};
pub use grading::{clamp_score, grade_objective};
pub use payload::{
    strip_fences, validate, validate_evaluation, validate_objective_batch,
    validate_subjective_batch, EvaluationPayload, SchemaKind, SchemaViolation, ValidatedPayload,
};
pub use selection::{FirstN, SelectionStrategy, UniformRandom};
pub use types::{
    Assessment, ConceptGap, Difficulty, EvaluationRecord, ExpectedAnswer, GeneratedQuestion,
    GradableItem, ItemId, ItemKind, ItemResult, ItemStatus, Locator, Priority, QuestionBody,
    QuestionKey, Recommendation, RecommendationKind, Severity, SkillBreakdown, SkillDimension,
    SkillScore, SkillScores, StoredQuestion, SubmittedAnswer,
};
