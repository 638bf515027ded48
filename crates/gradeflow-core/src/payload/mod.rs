//! Response validation for untrusted provider output.
//!
//! Raw text goes through four gates, and the first one that fails rejects
//! the whole payload:
//! 1. fence stripping and JSON parsing
//! 2. top-level shape (object or list)
//! 3. the embedded JSON Schema for the payload kind
//! 4. semantic checks (score range, correct label among options, allowed marks)
//!
//! Invalid data is never repaired. A batch with one bad question is
//! rejected as a whole.

mod parser;
mod schema;

pub use parser::{excerpt, strip_fences};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ConceptGap, GeneratedQuestion, QuestionBody, SkillScores};
use parser::Shape;
use schema::SchemaId;

/// Source citation used when a provider leaves it out.
const DEFAULT_SOURCE: &str = "Generated";

/// Ways a provider payload can fail validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaViolation {
    #[error("payload is not valid JSON: {reason}")]
    Unparseable { reason: String, excerpt: String },

    #[error("expected a top-level {expected}, found {found}")]
    ShapeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("payload does not match schema: {}", .0.join("; "))]
    Schema(Vec<String>),

    #[error("{}", constraint_message(.index, .message))]
    Constraint {
        index: Option<usize>,
        message: String,
    },

    #[error("schema unavailable: {0}")]
    SchemaUnavailable(String),
}

fn constraint_message(index: &Option<usize>, message: &str) -> String {
    match index {
        Some(i) => format!("entry {}: {}", i, message),
        None => message.to_string(),
    }
}

impl SchemaViolation {
    fn constraint(index: Option<usize>, message: impl Into<String>) -> Self {
        SchemaViolation::Constraint {
            index,
            message: message.into(),
        }
    }
}

/// What a payload is expected to contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaKind {
    /// Grade for one subjective answer, score bounded by `max_score`
    Evaluation { max_score: u32 },
    /// List of multiple-choice questions
    ObjectiveBatch,
    /// List of essay questions; an empty `allowed_marks` accepts any positive value
    SubjectiveBatch { allowed_marks: Vec<u32> },
}

impl SchemaKind {
    pub fn name(&self) -> &'static str {
        match self {
            SchemaKind::Evaluation { .. } => "evaluation",
            SchemaKind::ObjectiveBatch => "objective-batch",
            SchemaKind::SubjectiveBatch { .. } => "subjective-batch",
        }
    }
}

/// A validated evaluation of one subjective answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationPayload {
    pub score: f64,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub concept_gaps: Vec<ConceptGap>,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub skill_scores: Option<SkillScores>,
}

/// A payload that passed every gate, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedPayload {
    Evaluation(EvaluationPayload),
    ObjectiveBatch(Vec<GeneratedQuestion>),
    SubjectiveBatch(Vec<GeneratedQuestion>),
}

impl ValidatedPayload {
    pub fn into_evaluation(self) -> Option<EvaluationPayload> {
        match self {
            ValidatedPayload::Evaluation(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn into_questions(self) -> Option<Vec<GeneratedQuestion>> {
        match self {
            ValidatedPayload::ObjectiveBatch(qs) | ValidatedPayload::SubjectiveBatch(qs) => Some(qs),
            ValidatedPayload::Evaluation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct RawObjective {
    question: String,
    options: BTreeMap<String, String>,
    correct_answer: String,
    #[serde(default)]
    source: Option<String>,
}

#[derive(Deserialize)]
struct RawSubjective {
    question: String,
    marks: u32,
    rubric: String,
    #[serde(default)]
    source: Option<String>,
}

/// Validate raw provider text against the expected payload kind.
pub fn validate(raw: &str, kind: &SchemaKind) -> Result<ValidatedPayload, SchemaViolation> {
    match kind {
        SchemaKind::Evaluation { max_score } => {
            validate_evaluation(raw, *max_score).map(ValidatedPayload::Evaluation)
        }
        SchemaKind::ObjectiveBatch => {
            validate_objective_batch(raw).map(ValidatedPayload::ObjectiveBatch)
        }
        SchemaKind::SubjectiveBatch { allowed_marks } => {
            validate_subjective_batch(raw, allowed_marks).map(ValidatedPayload::SubjectiveBatch)
        }
    }
}

/// Validate an evaluation payload for an item worth `max_score`.
pub fn validate_evaluation(raw: &str, max_score: u32) -> Result<EvaluationPayload, SchemaViolation> {
    let value = parser::parse(raw, Shape::Object)?;
    schema::check(SchemaId::Evaluation, &value)?;

    let payload: EvaluationPayload = from_value(value)?;

    if !payload.score.is_finite() || payload.score < 0.0 || payload.score > f64::from(max_score) {
        return Err(SchemaViolation::constraint(
            None,
            format!("score {} outside 0..={}", payload.score, max_score),
        ));
    }

    for (i, gap) in payload.concept_gaps.iter().enumerate() {
        if gap.concept.trim().is_empty() {
            return Err(SchemaViolation::constraint(Some(i), "concept gap has an empty label"));
        }
    }

    Ok(payload)
}

/// Validate a batch of multiple-choice questions.
pub fn validate_objective_batch(raw: &str) -> Result<Vec<GeneratedQuestion>, SchemaViolation> {
    let value = parser::parse(raw, Shape::List)?;
    schema::check(SchemaId::ObjectiveBatch, &value)?;

    let entries: Vec<RawObjective> = from_value(value)?;
    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            require_text(i, "question", &entry.question)?;

            if !(2..=8).contains(&entry.options.len()) {
                return Err(SchemaViolation::constraint(
                    Some(i),
                    format!("expected 2 to 8 options, found {}", entry.options.len()),
                ));
            }
            if !entry.options.contains_key(&entry.correct_answer) {
                return Err(SchemaViolation::constraint(
                    Some(i),
                    format!(
                        "correct_answer '{}' is not one of the options ({})",
                        entry.correct_answer,
                        entry.options.keys().cloned().collect::<Vec<_>>().join(", ")
                    ),
                ));
            }

            Ok(GeneratedQuestion {
                prompt: entry.question.trim().to_string(),
                body: QuestionBody::Objective {
                    options: entry.options,
                    correct_answer: entry.correct_answer,
                },
                source: source_or_default(entry.source),
            })
        })
        .collect()
}

/// Validate a batch of essay questions.
pub fn validate_subjective_batch(
    raw: &str,
    allowed_marks: &[u32],
) -> Result<Vec<GeneratedQuestion>, SchemaViolation> {
    let value = parser::parse(raw, Shape::List)?;
    schema::check(SchemaId::SubjectiveBatch, &value)?;

    let entries: Vec<RawSubjective> = from_value(value)?;
    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            require_text(i, "question", &entry.question)?;
            require_text(i, "rubric", &entry.rubric)?;

            if entry.marks == 0 || (!allowed_marks.is_empty() && !allowed_marks.contains(&entry.marks)) {
                return Err(SchemaViolation::constraint(
                    Some(i),
                    format!("marks {} not in {:?}", entry.marks, allowed_marks),
                ));
            }

            Ok(GeneratedQuestion {
                prompt: entry.question.trim().to_string(),
                body: QuestionBody::Subjective {
                    rubric: entry.rubric.trim().to_string(),
                    marks: entry.marks,
                },
                source: source_or_default(entry.source),
            })
        })
        .collect()
}

fn from_value<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, SchemaViolation> {
    serde_json::from_value(value).map_err(|e| SchemaViolation::Schema(vec![e.to_string()]))
}

fn require_text(index: usize, field: &str, text: &str) -> Result<(), SchemaViolation> {
    if text.trim().is_empty() {
        Err(SchemaViolation::constraint(Some(index), format!("{} is empty", field)))
    } else {
        Ok(())
    }
}

fn source_or_default(source: Option<String>) -> String {
    source
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SOURCE.to_string())
}
