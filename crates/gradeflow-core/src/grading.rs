//! Deterministic grading of objective items.

use crate::types::{ExpectedAnswer, GradableItem, ItemKind, ItemResult, ItemStatus, SubmittedAnswer};

/// Clamp an awarded score into `[0, max_score]`. Non-finite input scores zero.
pub fn clamp_score(score: f64, max_score: u32) -> f64 {
    if !score.is_finite() {
        return 0.0;
    }
    score.clamp(0.0, f64::from(max_score))
}

/// Grade an objective item by exact, case-sensitive label match.
///
/// The submitted text is compared as-is, without trimming. A match earns
/// the full max score, anything else earns zero. A blank answer is a
/// mismatch, not an error. Only an item without a choice label
/// comes back `unscored`.
pub fn grade_objective(item: &GradableItem, answer: &SubmittedAnswer) -> ItemResult {
    let expected = match (&item.kind, &item.expected) {
        (ItemKind::Objective, Some(ExpectedAnswer::Choice { label })) => label,
        _ => return ItemResult::unscored(item, "item has no expected choice label"),
    };

    let submitted = answer.text.as_deref();
    let is_correct = submitted == Some(expected.as_str());
    let score = if is_correct { f64::from(item.max_score) } else { 0.0 };

    let mut result = ItemResult::with_status(item, ItemStatus::Ok).with_score(score);
    result.is_correct = Some(is_correct);
    result.graded_text = submitted.map(str::to_string);
    result
}
