//! Aggregator: combines item results into assessment-level figures.
//!
//! The arithmetic is fixed:
//! 1. Percentage = 100 × Σ awarded / Σ max over `ok` items, two decimals
//! 2. No `ok` item → 0% and the record is flagged low-confidence
//! 3. Concept gaps merge by case-normalized label, keeping the higher severity
//! 4. Recommendations rank high → medium → low, stable within a tier

use std::collections::{HashMap, HashSet};

use crate::types::{
    ConceptGap, ItemKind, ItemResult, ItemStatus, Locator, Priority, Recommendation,
    RecommendationKind, SkillBreakdown, SkillDimension, SkillScore,
};

/// Assessment-level figures derived from item results alone.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub overall_percentage: f64,
    pub low_confidence: bool,
    pub partial: bool,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub concept_gaps: Vec<ConceptGap>,
    pub skill_breakdown: SkillBreakdown,
    pub feedback_summary: String,
}

/// The Aggregator folds item results into an [`Aggregate`].
#[derive(Debug, Clone)]
pub struct Aggregator {
    max_highlights: usize,
    max_recommendations: usize,
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            max_highlights: 5,
            max_recommendations: 10,
        }
    }

    /// Override the recommendation cap.
    pub fn with_max_recommendations(mut self, max: usize) -> Self {
        self.max_recommendations = max;
        self
    }

    pub fn aggregate(&self, results: &[ItemResult]) -> Aggregate {
        let (overall_percentage, low_confidence) = overall_percentage(results);
        let partial = results.iter().any(|r| r.status == ItemStatus::Cancelled);
        let concept_gaps = merge_gaps(results.iter().flat_map(|r| r.concept_gaps.iter()));

        let strengths = merge_highlights(
            results.iter().flat_map(|r| r.strengths.iter()),
            self.max_highlights,
        );
        let weaknesses = merge_highlights(
            results.iter().flat_map(|r| r.weaknesses.iter()),
            self.max_highlights,
        );

        let feedback_summary =
            build_summary(results, overall_percentage, low_confidence, &concept_gaps);

        Aggregate {
            overall_percentage,
            low_confidence,
            partial,
            strengths,
            weaknesses,
            concept_gaps,
            skill_breakdown: skill_breakdown(results),
            feedback_summary,
        }
    }

    /// Rank recommendations by priority and cap the list.
    ///
    /// The sort is stable, so discovery order survives within a tier.
    pub fn rank_recommendations(&self, mut recommendations: Vec<Recommendation>) -> Vec<Recommendation> {
        recommendations.sort_by(|a, b| b.priority.cmp(&a.priority));
        recommendations.truncate(self.max_recommendations);
        recommendations
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Overall percentage over `ok` items, and whether it is low-confidence.
pub fn overall_percentage(results: &[ItemResult]) -> (f64, bool) {
    let (awarded, possible) = results
        .iter()
        .filter(|r| r.is_ok())
        .fold((0.0_f64, 0.0_f64), |(awarded, possible), r| {
            (awarded + r.score, possible + f64::from(r.max_score))
        });

    if !results.iter().any(ItemResult::is_ok) {
        return (0.0, true);
    }
    if possible <= 0.0 {
        return (0.0, false);
    }

    (round2(100.0 * awarded / possible), false)
}

/// Merge concept gaps by case-normalized label.
///
/// The first-seen position is kept; a later duplicate only replaces the
/// stored instance when its severity is strictly higher. Blank labels are
/// dropped.
pub fn merge_gaps<'a>(gaps: impl IntoIterator<Item = &'a ConceptGap>) -> Vec<ConceptGap> {
    let mut merged: Vec<ConceptGap> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for gap in gaps {
        let key = gap.key();
        if key.is_empty() {
            continue;
        }
        match index.get(&key) {
            Some(&pos) => {
                tracing::debug!(
                    concept = %gap.concept,
                    kept = %merged[pos].severity.max(gap.severity),
                    "Collapsing duplicate concept gap"
                );
                if gap.severity > merged[pos].severity {
                    merged[pos] = gap.clone();
                }
            }
            None => {
                index.insert(key, merged.len());
                merged.push(gap.clone());
            }
        }
    }

    merged
}

/// The `n` most severe gaps, ties broken by discovery order.
pub fn top_gaps(gaps: &[ConceptGap], n: usize) -> Vec<ConceptGap> {
    let mut ranked = gaps.to_vec();
    ranked.sort_by(|a, b| b.severity.cmp(&a.severity));
    ranked.truncate(n);
    ranked
}

/// Practice recommendations for graded items that scored under half marks.
pub fn practice_recommendations(results: &[ItemResult]) -> Vec<Recommendation> {
    results
        .iter()
        .filter(|r| r.is_ok() && r.max_score > 0 && r.score * 2.0 < f64::from(r.max_score))
        .map(|r| Recommendation {
            kind: RecommendationKind::Practice,
            title: format!("Reattempt question {}", r.item_id),
            locator: Locator {
                question: Some(r.item_id.clone()),
                ..Locator::default()
            },
            priority: match r.kind {
                ItemKind::Subjective => Priority::Medium,
                ItemKind::Objective => Priority::Low,
            },
        })
        .collect()
}

fn merge_highlights<'a>(items: impl IntoIterator<Item = &'a String>, cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for item in items {
        let text = item.trim();
        if text.is_empty() || !seen.insert(text.to_lowercase()) {
            continue;
        }
        merged.push(text.to_string());
        if merged.len() == cap {
            break;
        }
    }

    merged
}

fn skill_breakdown(results: &[ItemResult]) -> SkillBreakdown {
    let reported: Vec<_> = results
        .iter()
        .filter(|r| r.is_ok())
        .filter_map(|r| r.skill_scores)
        .collect();

    if reported.is_empty() {
        return SkillBreakdown::not_computed();
    }

    let count = reported.len() as f64;
    SkillBreakdown(
        SkillDimension::ALL
            .iter()
            .map(|dim| {
                let total: f64 = reported.iter().map(|s| f64::from(s.get(*dim))).sum();
                let value = (total / count).round().clamp(0.0, 100.0) as u8;
                (*dim, SkillScore::Computed { value })
            })
            .collect(),
    )
}

fn build_summary(
    results: &[ItemResult],
    percentage: f64,
    low_confidence: bool,
    gaps: &[ConceptGap],
) -> String {
    let count = |status: ItemStatus| results.iter().filter(|r| r.status == status).count();
    let graded = count(ItemStatus::Ok);
    let failed = count(ItemStatus::ProviderFailed);
    let unscored = count(ItemStatus::Unscored);
    let cancelled = count(ItemStatus::Cancelled);

    let mut summary = if low_confidence {
        String::from("No item could be graded, so the overall score is not meaningful. ")
    } else {
        format!(
            "Scored {:.2}% across {} graded item{}. ",
            percentage,
            graded,
            plural(graded)
        )
    };

    if failed > 0 {
        summary.push_str(&format!("{} item{} could not be graded by a provider. ", failed, plural(failed)));
    }
    if unscored > 0 {
        summary.push_str(&format!("{} item{} left unscored. ", unscored, plural(unscored)));
    }
    if cancelled > 0 {
        summary.push_str(&format!("{} item{} cancelled before grading finished. ", cancelled, plural(cancelled)));
    }

    let top = top_gaps(gaps, 3);
    let focus: Vec<&str> = top.iter().map(|g| g.concept.as_str()).collect();
    if !focus.is_empty() {
        summary.push_str(&format!("Focus areas: {}.", focus.join(", ")));
    }

    summary.trim_end().to_string()
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
