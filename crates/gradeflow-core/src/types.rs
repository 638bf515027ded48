//! Data model shared by grading, aggregation and question generation.
//!
//! Everything here is plain data. Items and generated questions are created
//! once and never edited; results and evaluation records are produced fresh
//! on every grading run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::grading::clamp_score;

/// Identifier of a gradable item / stored question.
pub type ItemId = String;

/// Whether an item is graded deterministically or by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// One discrete correct choice
    Objective,
    /// Free text graded against a rubric
    Subjective,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKind::Objective => write!(f, "objective"),
            ItemKind::Subjective => write!(f, "subjective"),
        }
    }
}

/// Expected-answer data attached to an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpectedAnswer {
    /// Label of the correct choice (objective items)
    Choice { label: String },
    /// Grading rubric (subjective items)
    Rubric { rubric: String },
}

/// A question as it appears in an assembled assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradableItem {
    pub id: ItemId,
    pub kind: ItemKind,
    pub prompt: String,

    /// Missing expected data leaves the item unscored
    #[serde(default)]
    pub expected: Option<ExpectedAnswer>,

    pub max_score: u32,
}

impl GradableItem {
    pub fn objective(
        id: impl Into<ItemId>,
        prompt: impl Into<String>,
        label: impl Into<String>,
        max_score: u32,
    ) -> Self {
        Self {
            id: id.into(),
            kind: ItemKind::Objective,
            prompt: prompt.into(),
            expected: Some(ExpectedAnswer::Choice {
                label: label.into(),
            }),
            max_score,
        }
    }

    pub fn subjective(
        id: impl Into<ItemId>,
        prompt: impl Into<String>,
        rubric: impl Into<String>,
        max_score: u32,
    ) -> Self {
        Self {
            id: id.into(),
            kind: ItemKind::Subjective,
            prompt: prompt.into(),
            expected: Some(ExpectedAnswer::Rubric {
                rubric: rubric.into(),
            }),
            max_score,
        }
    }

    /// Build the gradable view of a stored question.
    ///
    /// Objective questions carry no marks of their own, so the caller
    /// supplies the score they are worth.
    pub fn from_stored(stored: &StoredQuestion, objective_max_score: u32) -> Self {
        let q = &stored.question;
        match &q.body {
            QuestionBody::Objective { correct_answer, .. } => Self::objective(
                stored.id.clone(),
                q.prompt.clone(),
                correct_answer.clone(),
                objective_max_score,
            ),
            QuestionBody::Subjective { rubric, marks } => {
                Self::subjective(stored.id.clone(), q.prompt.clone(), rubric.clone(), *marks)
            }
        }
    }
}

/// A submitted answer for one item.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubmittedAnswer {
    pub item_id: ItemId,

    #[serde(default)]
    pub text: Option<String>,

    /// Raw image of a handwritten answer
    #[serde(default)]
    pub image: Option<Vec<u8>>,
}

impl SubmittedAnswer {
    pub fn text(item_id: impl Into<ItemId>, text: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            text: Some(text.into()),
            image: None,
        }
    }

    pub fn image(item_id: impl Into<ItemId>, bytes: Vec<u8>) -> Self {
        Self {
            item_id: item_id.into(),
            text: None,
            image: Some(bytes),
        }
    }

    /// Submitted text, trimmed, if any is present. Objective grading
    /// compares the raw text instead.
    pub fn answer_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Image payload, if a non-empty one was submitted.
    pub fn image_bytes(&self) -> Option<&[u8]> {
        self.image.as_deref().filter(|b| !b.is_empty())
    }
}

/// Outcome status of a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemStatus {
    /// Graded; counts toward the overall percentage
    Ok,
    /// Context, generation or validation failed for this item
    ProviderFailed,
    /// Nothing gradable (no answer text, malformed item)
    Unscored,
    /// Grading did not finish before cancellation
    Cancelled,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemStatus::Ok => "ok",
            ItemStatus::ProviderFailed => "provider-failed",
            ItemStatus::Unscored => "unscored",
            ItemStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Severity tier of a concept gap. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

/// An identified area of misunderstanding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptGap {
    pub concept: String,
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
}

impl ConceptGap {
    pub fn new(
        concept: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            concept: concept.into(),
            severity,
            description: description.into(),
        }
    }

    /// Dedup key: the concept label, trimmed and lower-cased.
    pub fn key(&self) -> String {
        self.concept.trim().to_lowercase()
    }
}

/// Priority tier of a recommendation. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl From<Severity> for Priority {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Low => Priority::Low,
            Severity::Medium => Priority::Medium,
            Severity::High => Priority::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationKind {
    /// Study material to read
    Reference,
    /// A question to attempt again
    Practice,
}

/// Where a recommendation points.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Locator {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub title: String,
    #[serde(default)]
    pub locator: Locator,
    pub priority: Priority,
}

/// The five fixed skill dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillDimension {
    FactualRecall,
    Analysis,
    CriticalThinking,
    Structure,
    Relevance,
}

impl SkillDimension {
    pub const ALL: [SkillDimension; 5] = [
        SkillDimension::FactualRecall,
        SkillDimension::Analysis,
        SkillDimension::CriticalThinking,
        SkillDimension::Structure,
        SkillDimension::Relevance,
    ];
}

/// Per-item skill scores reported by a provider, each 0-100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillScores {
    pub factual_recall: u8,
    pub analysis: u8,
    pub critical_thinking: u8,
    pub structure: u8,
    pub relevance: u8,
}

impl SkillScores {
    pub fn get(&self, dimension: SkillDimension) -> u8 {
        match dimension {
            SkillDimension::FactualRecall => self.factual_recall,
            SkillDimension::Analysis => self.analysis,
            SkillDimension::CriticalThinking => self.critical_thinking,
            SkillDimension::Structure => self.structure,
            SkillDimension::Relevance => self.relevance,
        }
    }
}

/// Assessment-level value of one skill dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum SkillScore {
    Computed { value: u8 },
    /// No graded item reported this dimension
    NotComputed,
}

/// Assessment-level skill breakdown, always holding all five dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillBreakdown(pub BTreeMap<SkillDimension, SkillScore>);

impl SkillBreakdown {
    pub fn not_computed() -> Self {
        Self(
            SkillDimension::ALL
                .iter()
                .map(|d| (*d, SkillScore::NotComputed))
                .collect(),
        )
    }

    pub fn get(&self, dimension: SkillDimension) -> SkillScore {
        self.0
            .get(&dimension)
            .copied()
            .unwrap_or(SkillScore::NotComputed)
    }
}

impl Default for SkillBreakdown {
    fn default() -> Self {
        Self::not_computed()
    }
}

/// Grading outcome for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    pub item_id: ItemId,
    pub kind: ItemKind,
    pub status: ItemStatus,

    /// Always within `[0, max_score]`
    pub score: f64,
    pub max_score: u32,

    /// Objective items only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,

    /// The text that was actually graded (typed or extracted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graded_text: Option<String>,

    #[serde(default)]
    pub strengths: Vec<String>,

    #[serde(default)]
    pub weaknesses: Vec<String>,

    #[serde(default)]
    pub concept_gaps: Vec<ConceptGap>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_scores: Option<SkillScores>,

    /// Provider that produced the grade
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Why the item did not reach `ok`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ItemResult {
    /// A zero-score result with the given status.
    pub fn with_status(item: &GradableItem, status: ItemStatus) -> Self {
        Self {
            item_id: item.id.clone(),
            kind: item.kind,
            status,
            score: 0.0,
            max_score: item.max_score,
            is_correct: None,
            graded_text: None,
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            concept_gaps: Vec::new(),
            feedback: None,
            skill_scores: None,
            provider: None,
            failure: None,
        }
    }

    pub fn unscored(item: &GradableItem, reason: impl Into<String>) -> Self {
        Self::with_status(item, ItemStatus::Unscored).with_failure(reason)
    }

    pub fn provider_failed(item: &GradableItem, reason: impl Into<String>) -> Self {
        Self::with_status(item, ItemStatus::ProviderFailed).with_failure(reason)
    }

    pub fn cancelled(item: &GradableItem) -> Self {
        Self::with_status(item, ItemStatus::Cancelled).with_failure("cancelled before grading finished")
    }

    /// Set the awarded score, clamped into `[0, max_score]`.
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = clamp_score(score, self.max_score);
        self
    }

    pub fn with_failure(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    pub fn with_graded_text(mut self, text: impl Into<String>) -> Self {
        self.graded_text = Some(text.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ItemStatus::Ok
    }
}

/// Difficulty tier of an assessment or question set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "easy"),
            Difficulty::Medium => write!(f, "medium"),
            Difficulty::Hard => write!(f, "hard"),
        }
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty '{}': expected easy, medium or hard", other)),
        }
    }
}

/// Lookup key for stored question sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuestionKey {
    pub subject: String,
    pub topic: String,
    pub difficulty: Difficulty,
}

impl QuestionKey {
    pub fn new(subject: impl Into<String>, topic: impl Into<String>, difficulty: Difficulty) -> Self {
        Self {
            subject: subject.into(),
            topic: topic.into(),
            difficulty,
        }
    }
}

impl fmt::Display for QuestionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.subject, self.topic, self.difficulty)
    }
}

/// Kind-specific part of a generated question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuestionBody {
    Objective {
        /// 2 to 8 labeled choices
        options: BTreeMap<String, String>,
        /// Always one of the `options` keys
        correct_answer: String,
    },
    Subjective {
        rubric: String,
        marks: u32,
    },
}

/// A question produced by generation (or the static fallback templates).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedQuestion {
    pub prompt: String,
    #[serde(flatten)]
    pub body: QuestionBody,
    /// Citation of the material the question was drawn from
    pub source: String,
}

impl GeneratedQuestion {
    pub fn kind(&self) -> ItemKind {
        match self.body {
            QuestionBody::Objective { .. } => ItemKind::Objective,
            QuestionBody::Subjective { .. } => ItemKind::Subjective,
        }
    }

    /// Prompt normalized for duplicate detection.
    pub fn dedup_key(&self) -> String {
        self.prompt
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

/// A generated question after persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredQuestion {
    pub id: ItemId,
    #[serde(flatten)]
    pub question: GeneratedQuestion,
}

/// An assembled assessment: which items a candidate answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub id: String,
    #[serde(flatten)]
    pub key: QuestionKey,
    pub item_ids: Vec<ItemId>,
    pub created_at: DateTime<Utc>,
}

/// The result of one grading run over an assessment.
///
/// A re-grade produces a new record; records are never edited in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub id: String,
    pub assessment_id: String,

    /// 0-100, rounded to two decimals
    pub overall_percentage: f64,

    /// Set when no item reached `ok`
    pub low_confidence: bool,

    /// Set when grading was cancelled before every item finished
    pub partial: bool,

    pub feedback_summary: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub concept_gaps: Vec<ConceptGap>,
    pub recommendations: Vec<Recommendation>,
    pub skill_breakdown: SkillBreakdown,
    pub item_results: Vec<ItemResult>,

    /// Providers that produced at least one grade, first-used first
    pub providers_used: Vec<String>,

    pub latency_ms: u64,
    pub evaluated_at: DateTime<Utc>,
}
