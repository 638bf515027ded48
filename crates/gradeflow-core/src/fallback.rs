//! Guaranteed-valid questions used when a generated batch is rejected.

use std::collections::BTreeMap;

use crate::types::{GeneratedQuestion, QuestionBody};

const FALLBACK_SOURCE: &str = "Fallback template";

const FALLBACK_RUBRIC: &str =
    "Evaluate structure, factual accuracy, depth of analysis, and use of relevant examples.";

/// A single multiple-choice question templated on the topic.
pub fn fallback_objective(topic: &str) -> GeneratedQuestion {
    let options: BTreeMap<String, String> = [
        ("A", "It has no bearing on the wider subject"),
        ("B", "It rests on a set of core principles that shape its application"),
        ("C", "It is a purely historical term with no current use"),
        ("D", "It applies only in hypothetical cases"),
    ]
    .into_iter()
    .map(|(label, text)| (label.to_string(), text.to_string()))
    .collect();

    GeneratedQuestion {
        prompt: format!("Which of the following is a key characteristic of {}?", topic.trim()),
        body: QuestionBody::Objective {
            options,
            correct_answer: "B".to_string(),
        },
        source: FALLBACK_SOURCE.to_string(),
    }
}

/// A single essay question templated on subject and topic.
///
/// `marks` should be one of the allowed mark values for the deployment.
pub fn fallback_subjective(subject: &str, topic: &str, marks: u32) -> GeneratedQuestion {
    GeneratedQuestion {
        prompt: format!(
            "Discuss the significance of {} in {}.",
            topic.trim(),
            subject.trim()
        ),
        body: QuestionBody::Subjective {
            rubric: FALLBACK_RUBRIC.to_string(),
            marks,
        },
        source: FALLBACK_SOURCE.to_string(),
    }
}
