//! Reference recommendations for concept gaps.
//!
//! Each of the top gaps is looked up in the retrieval collaborator, scoped
//! to the assessment's subject and topic. A gap with no retrieved material
//! is left out; a lookup error is logged and treated the same way.

use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use gradeflow_core::{
    top_gaps, ConceptGap, Locator, Priority, QuestionKey, Recommendation, RecommendationKind,
};

use crate::collaborators::{RetrievalQuery, Retriever};
use crate::config::RecommendationSettings;
use crate::prompts;

/// Looks up reference material for concept gaps.
pub struct ReferenceLookup {
    retriever: Arc<dyn Retriever>,
    max_gaps: usize,
    depth: usize,
}

impl ReferenceLookup {
    pub fn new(retriever: Arc<dyn Retriever>, settings: &RecommendationSettings) -> Self {
        Self {
            retriever,
            max_gaps: settings.max_gaps,
            depth: settings.lookup_depth,
        }
    }

    /// One reference recommendation per top gap that has material, in
    /// gap rank order.
    pub async fn recommend(
        &self,
        gaps: &[ConceptGap],
        key: &QuestionKey,
        cancel: &CancellationToken,
    ) -> Vec<Recommendation> {
        let selected = top_gaps(gaps, self.max_gaps);
        let lookups = selected.iter().map(|gap| self.lookup(gap, key, cancel));
        join_all(lookups).await.into_iter().flatten().collect()
    }

    async fn lookup(
        &self,
        gap: &ConceptGap,
        key: &QuestionKey,
        cancel: &CancellationToken,
    ) -> Option<Recommendation> {
        if cancel.is_cancelled() {
            return None;
        }

        let query = RetrievalQuery::new(prompts::reference_query(&gap.concept), self.depth)
            .subject(Some(&key.subject))
            .topic(Some(&key.topic));
        let retrieval = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            retrieval = self.retriever.retrieve(&query) => retrieval,
        };

        let retrieval = match retrieval {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(concept = %gap.concept, error = %e, "Reference lookup failed");
                return None;
            }
        };

        let top = retrieval.passages.iter().find(|p| !p.text.trim().is_empty())?;
        let label = top
            .source_label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty());

        Some(Recommendation {
            kind: RecommendationKind::Reference,
            title: label
                .map(str::to_string)
                .unwrap_or_else(|| format!("Reference material for {}", gap.concept)),
            locator: Locator {
                chapter: Some(label.unwrap_or(&gap.concept).to_string()),
                ..Locator::default()
            },
            priority: Priority::from(gap.severity),
        })
    }
}
