//! Retrieval context builder.
//!
//! Turns retrieved passages into one prompt-ready block: the synthesized
//! summary first, then each passage in rank order. The character budget
//! is enforced by dropping trailing passages whole. Only when the very
//! first piece is over budget is it cut, at a word boundary.

use moka::future::Cache;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{Retrieval, RetrievalError, RetrievalQuery, Retriever};
use crate::config::ContextSettings;

const SEPARATOR: &str = "\n\n";

/// Errors from building a context.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContextError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error("context retrieval cancelled")]
    Cancelled,
}

/// Builds provider context from the retrieval collaborator.
pub struct RetrievalContextBuilder {
    retriever: Arc<dyn Retriever>,
    max_chars: usize,
    cache: Cache<RetrievalQuery, String>,
}

impl RetrievalContextBuilder {
    pub fn new(retriever: Arc<dyn Retriever>, settings: &ContextSettings) -> Self {
        let cache = Cache::builder()
            .max_capacity(settings.cache_capacity)
            .time_to_live(settings.cache_ttl)
            .build();

        Self {
            retriever,
            max_chars: settings.max_chars,
            cache,
        }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Build context for a query.
    ///
    /// Returns an empty string when retrieval finds nothing. Non-empty
    /// contexts are cached per query.
    pub async fn build(
        &self,
        query: &str,
        subject: Option<&str>,
        topic: Option<&str>,
        depth: usize,
        cancel: &CancellationToken,
    ) -> Result<String, ContextError> {
        let query = RetrievalQuery::new(query, depth).subject(subject).topic(topic);

        if let Some(cached) = self.cache.get(&query).await {
            tracing::debug!(chars = cached.len(), "Context served from cache");
            return Ok(cached);
        }

        let retrieval = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ContextError::Cancelled),
            retrieval = self.retriever.retrieve(&query) => retrieval?,
        };

        let context = compose(&retrieval, depth, self.max_chars);
        tracing::debug!(
            passages = retrieval.passages.len(),
            chars = context.chars().count(),
            "Built retrieval context"
        );

        if !context.is_empty() {
            self.cache.insert(query, context.clone()).await;
        }
        Ok(context)
    }
}

/// Compose a context string from a retrieval result.
pub fn compose(retrieval: &Retrieval, depth: usize, max_chars: usize) -> String {
    let summary = retrieval.summary.trim();
    let pieces = (!summary.is_empty())
        .then(|| summary.to_string())
        .into_iter()
        .chain(
            retrieval
                .passages
                .iter()
                .take(depth)
                .filter(|p| !p.text.trim().is_empty())
                .map(|p| match p.source_label.as_deref() {
                    Some(label) if !label.trim().is_empty() => {
                        format!("Source: {}\n{}", label.trim(), p.text.trim())
                    }
                    _ => p.text.trim().to_string(),
                }),
        );

    let mut context = String::new();
    let mut used = 0;

    for piece in pieces {
        let separator = if context.is_empty() { 0 } else { SEPARATOR.len() };
        let len = piece.chars().count();

        if used + separator + len > max_chars {
            if context.is_empty() {
                context = truncate_at_word(&piece, max_chars).to_string();
            }
            break;
        }

        if separator > 0 {
            context.push_str(SEPARATOR);
        }
        context.push_str(&piece);
        used += separator + len;
    }

    context
}

/// Longest prefix within `max_chars` that ends on a word boundary.
fn truncate_at_word(text: &str, max_chars: usize) -> &str {
    let end = match text.char_indices().nth(max_chars) {
        Some((idx, _)) => idx,
        None => return text,
    };
    let prefix = &text[..end];

    // The cut lands between words already
    if text[end..].starts_with(char::is_whitespace) {
        return prefix.trim_end();
    }

    match prefix.rfind(char::is_whitespace) {
        Some(idx) if idx > 0 => prefix[..idx].trim_end(),
        _ => prefix,
    }
}
