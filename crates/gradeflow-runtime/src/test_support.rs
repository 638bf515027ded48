//! Scripted collaborators for orchestration tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::collaborators::{
    Extraction, Passage, Retrieval, RetrievalError, RetrievalQuery, Retriever, TextExtractor,
};
use crate::providers::{Completion, CompletionRequest, LlmProvider, ProviderError};

type Responder = Box<dyn Fn(&CompletionRequest) -> Result<String, ProviderError> + Send + Sync>;

/// Provider whose replies come from a closure.
pub struct ScriptedProvider {
    name: String,
    responder: Responder,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new<F>(name: &str, responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<String, ProviderError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            responder: Box::new(responder),
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always(name: &str, reply: &str) -> Self {
        let reply = reply.to_string();
        Self::new(name, move |_| Ok(reply.clone()))
    }

    pub fn failing(name: &str) -> Self {
        Self::new(name, |_| {
            Err(ProviderError::ApiError {
                status: 503,
                message: "unavailable".into(),
            })
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.responder)(request).map(Completion::text)
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Retriever that answers every query with the same result.
pub struct StaticRetriever {
    result: Result<Retrieval, RetrievalError>,
    calls: AtomicUsize,
    queries: Mutex<Vec<RetrievalQuery>>,
}

impl StaticRetriever {
    pub fn new(result: Result<Retrieval, RetrievalError>) -> Self {
        Self {
            result,
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn passages(summary: &str, passages: &[(&str, &str)]) -> Self {
        Self::new(Ok(Retrieval {
            summary: summary.to_string(),
            passages: passages
                .iter()
                .map(|(label, text)| Passage::new(*text).with_source(*label))
                .collect(),
        }))
    }

    pub fn empty() -> Self {
        Self::new(Ok(Retrieval::default()))
    }

    pub fn failing() -> Self {
        Self::new(Err(RetrievalError::Unavailable("index offline".into())))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<RetrievalQuery> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Retrieval, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().push(query.clone());
        self.result.clone()
    }
}

/// Extractor returning a fixed extraction.
pub struct StaticExtractor(pub Extraction);

impl StaticExtractor {
    pub fn reading(text: &str) -> Self {
        Self(Extraction {
            text: text.to_string(),
            confidence: 0.9,
            success: true,
        })
    }
}

#[async_trait]
impl TextExtractor for StaticExtractor {
    async fn extract(&self, _image: &[u8]) -> Extraction {
        self.0.clone()
    }
}

/// A well-formed evaluation payload.
pub fn evaluation_reply(score: u32, concept: &str, severity: &str) -> String {
    serde_json::json!({
        "score": score,
        "strengths": ["Clear structure"],
        "weaknesses": ["Thin examples"],
        "concept_gaps": [
            {"concept": concept, "severity": severity, "description": "Needs review"}
        ],
        "feedback": "Solid attempt",
        "skill_scores": {
            "factual_recall": 70,
            "analysis": 60,
            "critical_thinking": 50,
            "structure": 80,
            "relevance": 90
        }
    })
    .to_string()
}
