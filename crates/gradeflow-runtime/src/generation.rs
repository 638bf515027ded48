//! Question generation orchestrator.
//!
//! A request is served from storage when enough questions already exist
//! for its (subject, topic, difficulty) key. Otherwise the objective and
//! subjective batches are requested as two independent gateway calls,
//! validated, de-duplicated and persisted. A batch that fails, or that is
//! empty after de-duplication, is replaced by one fallback question.
//! Only storage errors and cancellation reach the caller.

use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use gradeflow_core::payload::excerpt;
use gradeflow_core::{
    fallback_objective, fallback_subjective, validate_objective_batch, validate_subjective_batch,
    Assessment, GeneratedQuestion, ItemKind, QuestionKey, SelectionStrategy, StoredQuestion,
};

use crate::collaborators::Storage;
use crate::config::GenerationSettings;
use crate::context::RetrievalContextBuilder;
use crate::gateway::GenerationGateway;
use crate::prompts;
use crate::providers::CompletionRequest;
use crate::PipelineError;

/// How many questions of each kind to produce for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionRequest {
    pub key: QuestionKey,
    pub objective_count: usize,
    pub subjective_count: usize,
}

impl QuestionRequest {
    pub fn new(key: QuestionKey, objective_count: usize, subjective_count: usize) -> Self {
        Self {
            key,
            objective_count,
            subjective_count,
        }
    }

    pub fn total(&self) -> usize {
        self.objective_count + self.subjective_count
    }
}

/// Produces validated question sets.
pub struct QuestionGenerationOrchestrator {
    storage: Arc<dyn Storage>,
    gateway: Arc<GenerationGateway>,
    context: Arc<RetrievalContextBuilder>,
    settings: GenerationSettings,
}

impl QuestionGenerationOrchestrator {
    pub fn new(
        storage: Arc<dyn Storage>,
        gateway: Arc<GenerationGateway>,
        context: Arc<RetrievalContextBuilder>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            storage,
            gateway,
            context,
            settings,
        }
    }

    /// Return `request.total()` questions for the key, generating them if
    /// storage does not already hold enough.
    pub async fn generate_questions(
        &self,
        request: &QuestionRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoredQuestion>, PipelineError> {
        let total = request.total();
        if total == 0 {
            return Err(PipelineError::InputInvalid("no questions requested".into()));
        }

        let key = &request.key;
        let existing = self.storage.find_questions(key).await?;
        if existing.len() >= total {
            tracing::info!(
                key = %key,
                stored = existing.len(),
                requested = total,
                "Reusing stored questions"
            );
            return Ok(existing.into_iter().take(total).collect());
        }

        let context = match self
            .context
            .build(
                &prompts::generation_query(&key.topic),
                Some(&key.subject),
                Some(&key.topic),
                self.settings.context_depth,
                cancel,
            )
            .await
        {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Context retrieval failed, generating from topic alone");
                String::new()
            }
        };
        tracing::info!(key = %key, chars = context.chars().count(), "Retrieved generation context");

        let (objective, subjective) = tokio::join!(
            self.request_batch(key, ItemKind::Objective, request.objective_count, &context, cancel),
            self.request_batch(key, ItemKind::Subjective, request.subjective_count, &context, cancel),
        );

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let mut seen: HashSet<String> = existing.iter().map(|s| s.question.dedup_key()).collect();
        let mut accepted = self.accept(key, ItemKind::Objective, objective, request.objective_count, &mut seen);
        accepted.extend(self.accept(
            key,
            ItemKind::Subjective,
            subjective,
            request.subjective_count,
            &mut seen,
        ));

        let saved = self.storage.save_questions(key, accepted).await?;
        tracing::info!(key = %key, saved = saved.len(), "Generated questions");
        Ok(saved)
    }

    /// Generate (or reuse) questions, then draw an assessment from
    /// everything stored for the key.
    pub async fn assemble_assessment(
        &self,
        request: &QuestionRequest,
        size: usize,
        strategy: &dyn SelectionStrategy,
        cancel: &CancellationToken,
    ) -> Result<Assessment, PipelineError> {
        self.generate_questions(request, cancel).await?;

        let pool = self.storage.find_questions(&request.key).await?;
        if pool.is_empty() || size == 0 {
            return Err(PipelineError::InputInvalid(format!(
                "cannot assemble {} questions from a pool of {}",
                size,
                pool.len()
            )));
        }

        let item_ids = strategy
            .select(pool.len(), size)
            .into_iter()
            .filter_map(|i| pool.get(i).map(|q| q.id.clone()))
            .collect();

        let assessment = Assessment {
            id: uuid::Uuid::new_v4().to_string(),
            key: request.key.clone(),
            item_ids,
            created_at: chrono::Utc::now(),
        };
        self.storage.save_assessment(&assessment).await?;

        tracing::info!(
            assessment_id = %assessment.id,
            key = %request.key,
            items = assessment.item_ids.len(),
            strategy = strategy.name(),
            "Assembled assessment"
        );
        Ok(assessment)
    }

    /// One gateway call plus validation. `Ok(empty)` when nothing was asked.
    async fn request_batch(
        &self,
        key: &QuestionKey,
        kind: ItemKind,
        count: usize,
        context: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<GeneratedQuestion>, String> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let (prompt, max_tokens) = match kind {
            ItemKind::Objective => (
                prompts::objective_batch_prompt(key, count, context),
                self.settings.objective_max_tokens,
            ),
            ItemKind::Subjective => (
                prompts::subjective_batch_prompt(key, count, context, &self.settings.allowed_marks),
                self.settings.subjective_max_tokens,
            ),
        };
        let request = CompletionRequest::new(prompts::SETTER_SYSTEM_PROMPT, prompt)
            .temperature(self.settings.temperature)
            .max_tokens(max_tokens);

        let generation = self
            .gateway
            .generate(&request, cancel)
            .await
            .map_err(|e| e.to_string())?;

        let validated = match kind {
            ItemKind::Objective => validate_objective_batch(&generation.text),
            ItemKind::Subjective => {
                validate_subjective_batch(&generation.text, &self.settings.allowed_marks)
            }
        };

        validated.map_err(|violation| {
            tracing::warn!(
                key = %key,
                kind = %kind,
                provider = %generation.provider,
                error = %violation,
                excerpt = %excerpt(&generation.text),
                "Rejected question batch"
            );
            violation.to_string()
        })
    }

    /// De-duplicate and truncate a batch, substituting the fallback
    /// question when nothing usable is left.
    fn accept(
        &self,
        key: &QuestionKey,
        kind: ItemKind,
        batch: Result<Vec<GeneratedQuestion>, String>,
        count: usize,
        seen: &mut HashSet<String>,
    ) -> Vec<GeneratedQuestion> {
        if count == 0 {
            return Vec::new();
        }

        let accepted: Vec<GeneratedQuestion> = match batch {
            Ok(questions) => questions
                .into_iter()
                .filter(|q| seen.insert(q.dedup_key()))
                .take(count)
                .collect(),
            Err(reason) => {
                tracing::warn!(key = %key, kind = %kind, reason = %reason, "Question batch failed");
                Vec::new()
            }
        };

        if !accepted.is_empty() {
            return accepted;
        }

        tracing::warn!(key = %key, kind = %kind, "Substituting fallback question");
        let fallback = match kind {
            ItemKind::Objective => fallback_objective(&key.topic),
            ItemKind::Subjective => {
                fallback_subjective(&key.subject, &key.topic, self.fallback_marks())
            }
        };
        seen.insert(fallback.dedup_key());
        vec![fallback]
    }

    fn fallback_marks(&self) -> u32 {
        let allowed = &self.settings.allowed_marks;
        if allowed.is_empty() || allowed.contains(&10) {
            10
        } else {
            allowed[0]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{NoRetrieval, Retriever};
    use crate::config::ContextSettings;
    use crate::memory::MemoryStorage;
    use crate::providers::ProviderError;
    use crate::test_support::{ScriptedProvider, StaticRetriever};
    use gradeflow_core::{Difficulty, FirstN, QuestionBody, UniformRandom};
    use serde_json::json;
    use std::time::Duration;

    fn key() -> QuestionKey {
        QuestionKey::new("Physics", "Optics", Difficulty::Medium)
    }

    fn objective_json(prompts: &[&str]) -> String {
        serde_json::Value::Array(
            prompts
                .iter()
                .map(|p| {
                    json!({
                        "question": p,
                        "options": {"A": "one", "B": "two", "C": "three", "D": "four"},
                        "correct_answer": "C",
                        "source": "Chapter 10"
                    })
                })
                .collect(),
        )
        .to_string()
    }

    fn subjective_json(prompts: &[&str], marks: u32) -> String {
        serde_json::Value::Array(
            prompts
                .iter()
                .map(|p| json!({"question": p, "marks": marks, "rubric": "Depth and accuracy"}))
                .collect(),
        )
        .to_string()
    }

    /// Answers objective and subjective prompts separately.
    fn setter(objective: String, subjective: String) -> ScriptedProvider {
        ScriptedProvider::new("primary", move |request| {
            if request.user_prompt.contains("multiple-choice") {
                Ok(objective.clone())
            } else {
                Ok(subjective.clone())
            }
        })
    }

    fn orchestrator_with(
        storage: Arc<MemoryStorage>,
        provider: Arc<ScriptedProvider>,
        retriever: Arc<dyn Retriever>,
    ) -> QuestionGenerationOrchestrator {
        QuestionGenerationOrchestrator::new(
            storage,
            Arc::new(GenerationGateway::new().with_provider(provider, Duration::from_secs(5))),
            Arc::new(RetrievalContextBuilder::new(retriever, &ContextSettings::default())),
            GenerationSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_generates_both_batches() {
        let storage = Arc::new(MemoryStorage::new());
        let provider = Arc::new(setter(
            objective_json(&["What is refraction?", "What is a lens?"]),
            subjective_json(&["Discuss total internal reflection."], 10),
        ));
        let orchestrator = orchestrator_with(
            storage.clone(),
            provider.clone(),
            Arc::new(StaticRetriever::passages("Light bends", &[("Ch 10", "Refraction")])),
        );

        let questions = orchestrator
            .generate_questions(&QuestionRequest::new(key(), 2, 1), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(questions.len(), 3);
        assert_eq!(questions[0].question.kind(), ItemKind::Objective);
        assert_eq!(questions[2].question.kind(), ItemKind::Subjective);
        assert_eq!(questions[2].question.source, "Generated");
        assert_eq!(storage.question_count(&key()), 3);
        assert_eq!(provider.calls(), 2);

        let requests = provider.requests();
        assert!(requests.iter().all(|r| r.temperature == 0.7));
        assert!(requests.iter().any(|r| r.max_tokens == 4000));
        assert!(requests.iter().any(|r| r.max_tokens == 3000));
        assert!(requests[0].user_prompt.contains("Light bends"));
    }

    #[tokio::test]
    async fn test_reuses_stored_questions() {
        let storage = Arc::new(MemoryStorage::new());
        let provider = Arc::new(setter(
            objective_json(&["Q1?", "Q2?"]),
            subjective_json(&["Q3"], 5),
        ));
        let orchestrator = orchestrator_with(storage.clone(), provider.clone(), Arc::new(NoRetrieval));
        let request = QuestionRequest::new(key(), 2, 1);
        let cancel = CancellationToken::new();

        let first = orchestrator.generate_questions(&request, &cancel).await.unwrap();
        let second = orchestrator.generate_questions(&request, &cancel).await.unwrap();
        let third = orchestrator.generate_questions(&request, &cancel).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second, third);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_wrong_correct_answer_rejects_batch() {
        let storage = Arc::new(MemoryStorage::new());
        let bad = json!([{
            "question": "Which colour bends most?",
            "options": {"A": "Red", "B": "Violet"},
            "correct_answer": "E"
        }])
        .to_string();
        let provider = Arc::new(setter(bad, subjective_json(&["Explain dispersion."], 10)));
        let orchestrator = orchestrator_with(storage.clone(), provider, Arc::new(NoRetrieval));

        let questions = orchestrator
            .generate_questions(&QuestionRequest::new(key(), 1, 1), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].question, fallback_objective("Optics"));
        assert!(!questions
            .iter()
            .any(|q| q.question.prompt == "Which colour bends most?"));
        assert_eq!(questions[1].question.prompt, "Explain dispersion.");
    }

    #[tokio::test]
    async fn test_total_failure_yields_fallbacks() {
        let storage = Arc::new(MemoryStorage::new());
        let orchestrator = orchestrator_with(
            storage.clone(),
            Arc::new(ScriptedProvider::failing("primary")),
            Arc::new(StaticRetriever::failing()),
        );

        let questions = orchestrator
            .generate_questions(&QuestionRequest::new(key(), 3, 2), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].question, fallback_objective("Optics"));
        assert_eq!(questions[1].question, fallback_subjective("Physics", "Optics", 10));
    }

    #[tokio::test]
    async fn test_duplicates_dropped_and_batch_truncated() {
        let storage = Arc::new(MemoryStorage::new());
        let provider = Arc::new(setter(
            objective_json(&["What is a prism?", "what  is a PRISM?", "What is a lens?", "What is a mirror?"]),
            subjective_json(&["Explain optics."], 15),
        ));
        let orchestrator = orchestrator_with(storage, provider, Arc::new(NoRetrieval));

        let questions = orchestrator
            .generate_questions(&QuestionRequest::new(key(), 2, 1), &CancellationToken::new())
            .await
            .unwrap();

        let prompts: Vec<&str> = questions.iter().map(|q| q.question.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["What is a prism?", "What is a lens?", "Explain optics."]);
    }

    #[tokio::test]
    async fn test_batch_duplicating_stored_questions_falls_back() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .save_questions(
                &key(),
                vec![GeneratedQuestion {
                    prompt: "What is a prism?".into(),
                    body: QuestionBody::Subjective {
                        rubric: "r".into(),
                        marks: 5,
                    },
                    source: "Generated".into(),
                }],
            )
            .await
            .unwrap();

        let provider = Arc::new(setter(
            objective_json(&["What is a prism?"]),
            subjective_json(&["Explain optics."], 5),
        ));
        let orchestrator = orchestrator_with(storage, provider, Arc::new(NoRetrieval));

        let questions = orchestrator
            .generate_questions(&QuestionRequest::new(key(), 1, 1), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(questions[0].question, fallback_objective("Optics"));
    }

    #[tokio::test]
    async fn test_disallowed_marks_reject_subjective_batch() {
        let storage = Arc::new(MemoryStorage::new());
        let provider = Arc::new(setter(
            objective_json(&["What is a lens?"]),
            subjective_json(&["Explain optics."], 7),
        ));
        let orchestrator = orchestrator_with(storage, provider, Arc::new(NoRetrieval));

        let questions = orchestrator
            .generate_questions(&QuestionRequest::new(key(), 1, 1), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(questions[1].question, fallback_subjective("Physics", "Optics", 10));
    }

    #[tokio::test]
    async fn test_zero_count_batch_is_not_requested() {
        let storage = Arc::new(MemoryStorage::new());
        let provider = Arc::new(setter(objective_json(&["What is a lens?"]), String::new()));
        let orchestrator = orchestrator_with(storage, provider.clone(), Arc::new(NoRetrieval));

        let questions = orchestrator
            .generate_questions(&QuestionRequest::new(key(), 1, 0), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(questions.len(), 1);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_storage_failure_surfaces() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_read_only(true);
        let provider = Arc::new(setter(
            objective_json(&["What is a lens?"]),
            subjective_json(&["Explain optics."], 5),
        ));
        let orchestrator = orchestrator_with(storage, provider, Arc::new(NoRetrieval));

        let err = orchestrator
            .generate_questions(&QuestionRequest::new(key(), 1, 1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)));
    }

    #[tokio::test]
    async fn test_cancelled_request_saves_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        let provider = Arc::new(setter(
            objective_json(&["What is a lens?"]),
            subjective_json(&["Explain optics."], 5),
        ));
        let orchestrator = orchestrator_with(storage.clone(), provider.clone(), Arc::new(NoRetrieval));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orchestrator
            .generate_questions(&QuestionRequest::new(key(), 1, 1), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(storage.question_count(&key()), 0);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_zero_total_is_invalid() {
        let orchestrator = orchestrator_with(
            Arc::new(MemoryStorage::new()),
            Arc::new(ScriptedProvider::failing("primary")),
            Arc::new(NoRetrieval),
        );
        let err = orchestrator
            .generate_questions(&QuestionRequest::new(key(), 0, 0), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InputInvalid(_)));
    }

    #[tokio::test]
    async fn test_assemble_assessment_selects_from_pool() {
        let storage = Arc::new(MemoryStorage::new());
        let provider = Arc::new(setter(
            objective_json(&["Q1?", "Q2?", "Q3?", "Q4?"]),
            subjective_json(&["Q5", "Q6"], 10),
        ));
        let orchestrator = orchestrator_with(storage.clone(), provider, Arc::new(NoRetrieval));
        let request = QuestionRequest::new(key(), 4, 2);
        let cancel = CancellationToken::new();

        let first = orchestrator
            .assemble_assessment(&request, 3, &FirstN, &cancel)
            .await
            .unwrap();
        assert_eq!(first.item_ids.len(), 3);
        let pool = storage.find_questions(&key()).await.unwrap();
        assert_eq!(first.item_ids[0], pool[0].id);

        let random = orchestrator
            .assemble_assessment(&request, 10, &UniformRandom::seeded(7), &cancel)
            .await
            .unwrap();
        assert_eq!(random.item_ids.len(), 6);
        let unique: HashSet<_> = random.item_ids.iter().collect();
        assert_eq!(unique.len(), 6);

        assert_eq!(storage.load_assessment(&random.id).await.unwrap(), random);
    }

    #[tokio::test]
    async fn test_provider_errors_do_not_surface() {
        let storage = Arc::new(MemoryStorage::new());
        let provider = Arc::new(ScriptedProvider::new("primary", |_| {
            Err(ProviderError::ParseError("garbage".into()))
        }));
        let orchestrator = orchestrator_with(storage, provider, Arc::new(NoRetrieval));

        assert!(orchestrator
            .generate_questions(&QuestionRequest::new(key(), 1, 1), &CancellationToken::new())
            .await
            .is_ok());
    }
}
