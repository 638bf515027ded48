//! Grading orchestrator.
//!
//! Each item moves `pending → objective | subjective → scored | failed`.
//! Objective items are graded inline. Subjective items fan out as
//! independent tasks bounded by `max_concurrency`, and every failure is
//! absorbed into that item's status. Only a missing assessment, a missing
//! item or an empty submission fails the whole run.
//!
//! ## Cancellation
//!
//! The token reaches every extraction, retrieval and provider call.
//! Items unfinished when it fires come back `cancelled`; finished items
//! are kept and the record is marked partial.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use gradeflow_core::payload::excerpt;
use gradeflow_core::{
    grade_objective, practice_recommendations, validate_evaluation, Aggregator, Assessment,
    EvaluationRecord, ExpectedAnswer, GradableItem, ItemKind, ItemResult, ItemStatus,
    SubmittedAnswer,
};

use crate::collaborators::{Storage, TextExtractor};
use crate::config::GradingSettings;
use crate::context::{ContextError, RetrievalContextBuilder};
use crate::gateway::{GatewayError, GenerationGateway};
use crate::prompts;
use crate::providers::CompletionRequest;
use crate::recommend::ReferenceLookup;
use crate::PipelineError;

/// Grades submitted assessments into evaluation records.
pub struct GradingOrchestrator {
    storage: Arc<dyn Storage>,
    gateway: Arc<GenerationGateway>,
    context: Arc<RetrievalContextBuilder>,
    extractor: Arc<dyn TextExtractor>,
    references: ReferenceLookup,
    aggregator: Aggregator,
    settings: GradingSettings,
}

/// One subjective item waiting for grading.
struct SubjectiveJob<'a> {
    index: usize,
    item: &'a GradableItem,
    answer: &'a SubmittedAnswer,
}

impl GradingOrchestrator {
    pub fn new(
        storage: Arc<dyn Storage>,
        gateway: Arc<GenerationGateway>,
        context: Arc<RetrievalContextBuilder>,
        extractor: Arc<dyn TextExtractor>,
        references: ReferenceLookup,
        aggregator: Aggregator,
        settings: GradingSettings,
    ) -> Self {
        Self {
            storage,
            gateway,
            context,
            extractor,
            references,
            aggregator,
            settings,
        }
    }

    /// Grade every item of an assessment and persist the record.
    pub async fn evaluate(
        &self,
        assessment_id: &str,
        cancel: &CancellationToken,
    ) -> Result<EvaluationRecord, PipelineError> {
        let started = Instant::now();
        let evaluation_id = uuid::Uuid::new_v4().to_string();

        let assessment = self.storage.load_assessment(assessment_id).await?;
        let answers = self.storage.load_answers(assessment_id).await?;
        if answers.is_empty() {
            return Err(PipelineError::NoResponses(assessment_id.to_string()));
        }
        if assessment.item_ids.is_empty() {
            return Err(PipelineError::InputInvalid(format!(
                "assessment '{}' has no items",
                assessment_id
            )));
        }

        let mut items = Vec::with_capacity(assessment.item_ids.len());
        for item_id in &assessment.item_ids {
            items.push(self.storage.load_item(item_id).await?);
        }

        let by_item = index_answers(&answers, &items);
        if by_item.is_empty() {
            return Err(PipelineError::NoResponses(assessment_id.to_string()));
        }

        let mut slots: Vec<Option<ItemResult>> = vec![None; items.len()];
        let mut jobs = Vec::new();

        for (index, item) in items.iter().enumerate() {
            match (item.kind, by_item.get(item.id.as_str())) {
                (_, None) => {
                    slots[index] = Some(ItemResult::unscored(item, "no answer submitted"));
                }
                (ItemKind::Objective, Some(answer)) => {
                    slots[index] = Some(grade_objective(item, answer));
                }
                (ItemKind::Subjective, Some(answer)) => jobs.push(SubjectiveJob {
                    index,
                    item,
                    answer: *answer,
                }),
            }
        }

        let assessment = &assessment;
        let graded: Vec<(usize, ItemResult)> = stream::iter(jobs)
            .map(|job| async move {
                let result = self.grade_subjective(assessment, job.item, job.answer, cancel).await;
                (job.index, result)
            })
            .buffer_unordered(self.settings.max_concurrency.max(1))
            .collect()
            .await;

        for (index, result) in graded {
            slots[index] = Some(result);
        }

        let results: Vec<ItemResult> = slots
            .into_iter()
            .zip(&items)
            .map(|(slot, item)| slot.unwrap_or_else(|| ItemResult::cancelled(item)))
            .collect();

        self.persist_results(&evaluation_id, &results).await;

        let aggregate = self.aggregator.aggregate(&results);

        let mut recommendations = self
            .references
            .recommend(&aggregate.concept_gaps, &assessment.key, cancel)
            .await;
        recommendations.extend(practice_recommendations(&results));
        let recommendations = self.aggregator.rank_recommendations(recommendations);

        let record = EvaluationRecord {
            id: evaluation_id,
            assessment_id: assessment_id.to_string(),
            overall_percentage: aggregate.overall_percentage,
            low_confidence: aggregate.low_confidence,
            partial: aggregate.partial || cancel.is_cancelled(),
            feedback_summary: aggregate.feedback_summary,
            strengths: aggregate.strengths,
            weaknesses: aggregate.weaknesses,
            concept_gaps: aggregate.concept_gaps,
            recommendations,
            skill_breakdown: aggregate.skill_breakdown,
            providers_used: providers_used(&results),
            item_results: results,
            latency_ms: started.elapsed().as_millis() as u64,
            evaluated_at: chrono::Utc::now(),
        };

        if let Err(e) = self.storage.save_evaluation(&record).await {
            tracing::error!(
                assessment_id = %assessment_id,
                error = %e,
                "Failed to persist evaluation record"
            );
        }

        tracing::info!(
            assessment_id = %assessment_id,
            overall = record.overall_percentage,
            items = record.item_results.len(),
            low_confidence = record.low_confidence,
            partial = record.partial,
            latency_ms = record.latency_ms,
            "Evaluation complete"
        );

        Ok(record)
    }

    /// Grade one subjective answer. Never fails; problems land in the status.
    async fn grade_subjective(
        &self,
        assessment: &Assessment,
        item: &GradableItem,
        answer: &SubmittedAnswer,
        cancel: &CancellationToken,
    ) -> ItemResult {
        if cancel.is_cancelled() {
            return ItemResult::cancelled(item);
        }

        let rubric = match &item.expected {
            Some(ExpectedAnswer::Rubric { rubric }) if !rubric.trim().is_empty() => rubric.as_str(),
            Some(ExpectedAnswer::Choice { .. }) => {
                return ItemResult::unscored(item, "subjective item carries a choice label, not a rubric");
            }
            _ => self.settings.default_rubric.as_str(),
        };

        let text = match self.resolve_text(answer, cancel).await {
            Resolved::Text(text) => text,
            Resolved::Missing => {
                return ItemResult::unscored(item, "no answer text and no readable image");
            }
            Resolved::Cancelled => return ItemResult::cancelled(item),
        };

        let context = match self
            .context
            .build(
                &prompts::evaluation_query(&item.prompt),
                Some(&assessment.key.subject),
                Some(&assessment.key.topic),
                self.settings.context_depth,
                cancel,
            )
            .await
        {
            Ok(context) => context,
            Err(ContextError::Cancelled) => return ItemResult::cancelled(item),
            Err(e) => {
                tracing::warn!(item_id = %item.id, error = %e, "Context retrieval failed");
                return ItemResult::provider_failed(item, e.to_string()).with_graded_text(text);
            }
        };

        let request = CompletionRequest::new(
            prompts::EXAMINER_SYSTEM_PROMPT,
            prompts::evaluation_prompt(&item.prompt, rubric, &text, &context, item.max_score),
        )
        .temperature(self.settings.temperature)
        .max_tokens(self.settings.max_output_tokens)
        .json_object();

        let generation = match self.gateway.generate(&request, cancel).await {
            Ok(generation) => generation,
            Err(GatewayError::Cancelled) => return ItemResult::cancelled(item),
            Err(e) => {
                tracing::warn!(item_id = %item.id, error = %e, "Grading generation failed");
                return ItemResult::provider_failed(item, e.to_string()).with_graded_text(text);
            }
        };

        let payload = match validate_evaluation(&generation.text, item.max_score) {
            Ok(payload) => payload,
            Err(violation) => {
                tracing::warn!(
                    item_id = %item.id,
                    provider = %generation.provider,
                    error = %violation,
                    excerpt = %excerpt(&generation.text),
                    "Rejected evaluation payload"
                );
                return ItemResult::provider_failed(
                    item,
                    format!("invalid response from '{}': {}", generation.provider, violation),
                )
                .with_graded_text(text);
            }
        };

        let mut result = ItemResult::with_status(item, ItemStatus::Ok).with_score(payload.score);
        result.graded_text = Some(text);
        result.strengths = payload.strengths;
        result.weaknesses = payload.weaknesses;
        result.concept_gaps = payload.concept_gaps;
        result.feedback = payload.feedback;
        result.skill_scores = payload.skill_scores;
        result.provider = Some(generation.provider);
        result
    }

    async fn resolve_text(&self, answer: &SubmittedAnswer, cancel: &CancellationToken) -> Resolved {
        if let Some(text) = answer.answer_text() {
            return Resolved::Text(text.to_string());
        }
        let Some(image) = answer.image_bytes() else {
            return Resolved::Missing;
        };

        let extraction = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Resolved::Cancelled,
            extraction = self.extractor.extract(image) => extraction,
        };

        let text = extraction.text.trim();
        if extraction.success && !text.is_empty() {
            tracing::debug!(
                item_id = %answer.item_id,
                confidence = extraction.confidence,
                "Extracted answer text from image"
            );
            Resolved::Text(text.to_string())
        } else {
            Resolved::Missing
        }
    }

    async fn persist_results(&self, evaluation_id: &str, results: &[ItemResult]) {
        let saves = results.iter().map(|result| async move {
            if let Err(e) = self.storage.save_result(evaluation_id, result).await {
                tracing::error!(
                    evaluation_id = %evaluation_id,
                    item_id = %result.item_id,
                    error = %e,
                    "Failed to persist item result"
                );
            }
        });
        futures::future::join_all(saves).await;
    }
}

enum Resolved {
    Text(String),
    Missing,
    Cancelled,
}

/// First answer per item, restricted to the assessment's items.
fn index_answers<'a>(
    answers: &'a [SubmittedAnswer],
    items: &[GradableItem],
) -> HashMap<&'a str, &'a SubmittedAnswer> {
    let mut by_item = HashMap::new();
    for answer in answers {
        if !items.iter().any(|item| item.id == answer.item_id) {
            tracing::warn!(item_id = %answer.item_id, "Ignoring answer for unknown item");
            continue;
        }
        by_item.entry(answer.item_id.as_str()).or_insert(answer);
    }
    by_item
}

/// Providers that produced a grade, first use first.
fn providers_used(results: &[ItemResult]) -> Vec<String> {
    let mut providers: Vec<String> = Vec::new();
    for provider in results.iter().filter_map(|r| r.provider.as_ref()) {
        if !providers.contains(provider) {
            providers.push(provider.clone());
        }
    }
    providers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{NoRetrieval, NoTextExtraction, StorageError};
    use crate::config::{ContextSettings, RecommendationSettings};
    use crate::memory::MemoryStorage;
    use crate::providers::ProviderError;
    use crate::test_support::{evaluation_reply, ScriptedProvider, StaticExtractor, StaticRetriever};
    use crate::collaborators::Retriever;
    use gradeflow_core::{Difficulty, QuestionKey, RecommendationKind, SkillDimension, SkillScore};
    use std::time::Duration;

    struct Harness {
        storage: Arc<MemoryStorage>,
        retriever: Arc<dyn Retriever>,
        extractor: Arc<dyn TextExtractor>,
        providers: Vec<Arc<ScriptedProvider>>,
        settings: GradingSettings,
    }

    impl Harness {
        fn new(providers: Vec<ScriptedProvider>) -> Self {
            Self {
                storage: Arc::new(MemoryStorage::new()),
                retriever: Arc::new(NoRetrieval),
                extractor: Arc::new(NoTextExtraction),
                providers: providers.into_iter().map(Arc::new).collect(),
                settings: GradingSettings::default(),
            }
        }

        fn orchestrator(&self) -> GradingOrchestrator {
            let mut gateway = GenerationGateway::new();
            for provider in &self.providers {
                gateway.push(provider.clone(), Duration::from_secs(5));
            }
            GradingOrchestrator::new(
                self.storage.clone(),
                Arc::new(gateway),
                Arc::new(RetrievalContextBuilder::new(
                    self.retriever.clone(),
                    &ContextSettings::default(),
                )),
                self.extractor.clone(),
                ReferenceLookup::new(self.retriever.clone(), &RecommendationSettings::default()),
                Aggregator::new(),
                self.settings.clone(),
            )
        }

        fn seed(&self, items: Vec<GradableItem>, answers: Vec<SubmittedAnswer>) {
            let assessment = Assessment {
                id: "a-1".into(),
                key: QuestionKey::new("Physics", "Optics", Difficulty::Medium),
                item_ids: items.iter().map(|i| i.id.clone()).collect(),
                created_at: chrono::Utc::now(),
            };
            for item in items {
                self.storage.insert_item(item);
            }
            self.storage.insert_assessment(assessment);
            self.storage.insert_answers("a-1", answers);
        }
    }

    /// Replies per question, keyed by a marker in the prompt.
    fn by_question(replies: Vec<(&'static str, Result<String, ProviderError>)>) -> ScriptedProvider {
        ScriptedProvider::new("primary", move |request| {
            replies
                .iter()
                .find(|(marker, _)| request.user_prompt.contains(marker))
                .map(|(_, reply)| reply.clone())
                .unwrap_or_else(|| Err(ProviderError::ParseError("unscripted".into())))
        })
    }

    #[tokio::test]
    async fn test_mixed_assessment_scenario() {
        let harness = Harness::new(vec![ScriptedProvider::always(
            "primary",
            &evaluation_reply(7, "Refraction", "medium"),
        )]);
        harness.seed(
            vec![
                GradableItem::objective("o1", "Pick one", "A", 1),
                GradableItem::objective("o2", "Pick another", "C", 1),
                GradableItem::subjective("s1", "Explain refraction", "Snell's law", 10),
            ],
            vec![
                SubmittedAnswer::text("o1", "A"),
                SubmittedAnswer::text("o2", "B"),
                SubmittedAnswer::text("s1", "Light bends at boundaries"),
            ],
        );

        let record = harness
            .orchestrator()
            .evaluate("a-1", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.overall_percentage, 66.67);
        assert!(!record.low_confidence);
        assert!(!record.partial);
        assert_eq!(record.item_results.len(), 3);
        assert_eq!(record.item_results[2].score, 7.0);
        assert_eq!(record.providers_used, vec!["primary".to_string()]);
        assert_eq!(record.concept_gaps.len(), 1);
        assert_eq!(
            record.skill_breakdown.get(SkillDimension::Structure),
            SkillScore::Computed { value: 80 }
        );

        assert_eq!(harness.storage.evaluations().len(), 1);
        assert_eq!(harness.storage.result_count(), 3);
        assert_eq!(harness.storage.result(&record.id, "s1").unwrap().score, 7.0);
        assert_eq!(harness.providers[0].requests()[0].temperature, 0.3);
        assert!(harness.providers[0].requests()[0].json_object);
    }

    #[tokio::test]
    async fn test_regrade_keeps_earlier_results() {
        let replies = std::sync::atomic::AtomicUsize::new(0);
        let harness = Harness::new(vec![ScriptedProvider::new("primary", move |_| {
            if replies.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Ok(evaluation_reply(7, "Refraction", "medium"))
            } else {
                Err(ProviderError::ApiError {
                    status: 503,
                    message: "unavailable".into(),
                })
            }
        })]);
        harness.seed(
            vec![GradableItem::subjective("s1", "Explain refraction", "Snell's law", 10)],
            vec![SubmittedAnswer::text("s1", "Light bends at boundaries")],
        );

        let orchestrator = harness.orchestrator();
        let first = orchestrator.evaluate("a-1", &CancellationToken::new()).await.unwrap();
        let second = orchestrator.evaluate("a-1", &CancellationToken::new()).await.unwrap();
        assert_ne!(first.id, second.id);

        let earlier = harness.storage.result(&first.id, "s1").unwrap();
        assert_eq!(earlier.status, ItemStatus::Ok);
        assert_eq!(earlier.score, 7.0);

        let later = harness.storage.result(&second.id, "s1").unwrap();
        assert_eq!(later.status, ItemStatus::ProviderFailed);
        assert_eq!(harness.storage.result_count(), 2);
        assert_eq!(harness.storage.evaluations().len(), 2);
    }

    #[tokio::test]
    async fn test_one_provider_failure_is_isolated() {
        let harness = Harness::new(vec![by_question(vec![
            ("Question one", Ok(evaluation_reply(8, "Lenses", "low"))),
            (
                "Question two",
                Err(ProviderError::ApiError {
                    status: 500,
                    message: "boom".into(),
                }),
            ),
            ("Question three", Ok(evaluation_reply(4, "Mirrors", "high"))),
        ])]);
        harness.seed(
            vec![
                GradableItem::subjective("s1", "Question one", "r", 10),
                GradableItem::subjective("s2", "Question two", "r", 10),
                GradableItem::subjective("s3", "Question three", "r", 10),
            ],
            vec![
                SubmittedAnswer::text("s1", "answer"),
                SubmittedAnswer::text("s2", "answer"),
                SubmittedAnswer::text("s3", "answer"),
            ],
        );

        let record = harness
            .orchestrator()
            .evaluate("a-1", &CancellationToken::new())
            .await
            .unwrap();

        let statuses: Vec<ItemStatus> = record.item_results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![ItemStatus::Ok, ItemStatus::ProviderFailed, ItemStatus::Ok]
        );
        assert_eq!(record.item_results[1].score, 0.0);
        // (8 + 4) / (10 + 10)
        assert_eq!(record.overall_percentage, 60.0);
    }

    #[tokio::test]
    async fn test_all_providers_fail_single_item() {
        let harness = Harness::new(vec![
            ScriptedProvider::failing("primary"),
            ScriptedProvider::failing("secondary"),
        ]);
        harness.seed(
            vec![GradableItem::subjective("s1", "Explain", "r", 10)],
            vec![SubmittedAnswer::text("s1", "answer")],
        );

        let record = harness
            .orchestrator()
            .evaluate("a-1", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.overall_percentage, 0.0);
        assert!(record.low_confidence);
        assert_eq!(record.item_results[0].status, ItemStatus::ProviderFailed);
        assert!(record.providers_used.is_empty());
        assert_eq!(harness.providers[1].calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_payload_is_provider_failure() {
        let harness = Harness::new(vec![ScriptedProvider::always(
            "primary",
            r#"{"score": 42, "strengths": [], "weaknesses": [], "concept_gaps": []}"#,
        )]);
        harness.seed(
            vec![GradableItem::subjective("s1", "Explain", "r", 10)],
            vec![SubmittedAnswer::text("s1", "answer")],
        );

        let record = harness
            .orchestrator()
            .evaluate("a-1", &CancellationToken::new())
            .await
            .unwrap();

        let result = &record.item_results[0];
        assert_eq!(result.status, ItemStatus::ProviderFailed);
        assert_eq!(result.graded_text.as_deref(), Some("answer"));
        assert!(result.failure.as_deref().unwrap_or_default().contains("primary"));
    }

    #[tokio::test]
    async fn test_blank_subjective_answer_skips_provider() {
        let harness = Harness::new(vec![ScriptedProvider::always(
            "primary",
            &evaluation_reply(5, "x", "low"),
        )]);
        harness.seed(
            vec![
                GradableItem::objective("o1", "Pick", "A", 1),
                GradableItem::subjective("s1", "Explain", "r", 10),
            ],
            vec![SubmittedAnswer::text("o1", "A"), SubmittedAnswer::text("s1", "   ")],
        );

        let record = harness
            .orchestrator()
            .evaluate("a-1", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.item_results[1].status, ItemStatus::Unscored);
        assert_eq!(harness.providers[0].calls(), 0);
        assert_eq!(record.overall_percentage, 100.0);
    }

    #[tokio::test]
    async fn test_image_answer_is_extracted() {
        let mut harness = Harness::new(vec![ScriptedProvider::always(
            "primary",
            &evaluation_reply(6, "x", "low"),
        )]);
        harness.extractor = Arc::new(StaticExtractor::reading("Handwritten answer"));
        harness.seed(
            vec![GradableItem::subjective("s1", "Explain", "r", 10)],
            vec![SubmittedAnswer::image("s1", vec![0x89, 0x50])],
        );

        let record = harness
            .orchestrator()
            .evaluate("a-1", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.item_results[0].status, ItemStatus::Ok);
        assert_eq!(
            record.item_results[0].graded_text.as_deref(),
            Some("Handwritten answer")
        );
        assert!(harness.providers[0].requests()[0]
            .user_prompt
            .contains("Handwritten answer"));
    }

    #[tokio::test]
    async fn test_failed_extraction_is_unscored() {
        let harness = Harness::new(vec![ScriptedProvider::always(
            "primary",
            &evaluation_reply(6, "x", "low"),
        )]);
        harness.seed(
            vec![GradableItem::subjective("s1", "Explain", "r", 10)],
            vec![SubmittedAnswer::image("s1", vec![1, 2, 3])],
        );

        let record = harness
            .orchestrator()
            .evaluate("a-1", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.item_results[0].status, ItemStatus::Unscored);
        assert!(record.low_confidence);
        assert_eq!(harness.providers[0].calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_rubric_uses_default() {
        let harness = Harness::new(vec![ScriptedProvider::always(
            "primary",
            &evaluation_reply(6, "x", "low"),
        )]);
        let mut item = GradableItem::subjective("s1", "Explain", "", 10);
        item.expected = None;
        harness.seed(vec![item], vec![SubmittedAnswer::text("s1", "answer")]);

        harness
            .orchestrator()
            .evaluate("a-1", &CancellationToken::new())
            .await
            .unwrap();

        assert!(harness.providers[0].requests()[0]
            .user_prompt
            .contains("Standard evaluation criteria"));
    }

    #[tokio::test]
    async fn test_retrieval_error_fails_item() {
        let mut harness = Harness::new(vec![ScriptedProvider::always(
            "primary",
            &evaluation_reply(6, "x", "low"),
        )]);
        harness.retriever = Arc::new(StaticRetriever::failing());
        harness.seed(
            vec![GradableItem::subjective("s1", "Explain", "r", 10)],
            vec![SubmittedAnswer::text("s1", "answer")],
        );

        let record = harness
            .orchestrator()
            .evaluate("a-1", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.item_results[0].status, ItemStatus::ProviderFailed);
        assert_eq!(harness.providers[0].calls(), 0);
    }

    #[tokio::test]
    async fn test_recommendations_from_gaps_and_weak_items() {
        let mut harness = Harness::new(vec![ScriptedProvider::always(
            "primary",
            &evaluation_reply(2, "Refraction", "high"),
        )]);
        harness.retriever = Arc::new(StaticRetriever::passages(
            "",
            &[("Chapter 10: Light", "Refraction of light")],
        ));
        harness.seed(
            vec![
                GradableItem::objective("o1", "Pick", "A", 1),
                GradableItem::subjective("s1", "Explain", "r", 10),
            ],
            vec![SubmittedAnswer::text("o1", "B"), SubmittedAnswer::text("s1", "answer")],
        );

        let record = harness
            .orchestrator()
            .evaluate("a-1", &CancellationToken::new())
            .await
            .unwrap();

        let kinds: Vec<RecommendationKind> =
            record.recommendations.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RecommendationKind::Reference,
                RecommendationKind::Practice,
                RecommendationKind::Practice
            ]
        );
        assert_eq!(record.recommendations[0].title, "Chapter 10: Light");
        assert_eq!(
            record.recommendations[1].locator.question.as_deref(),
            Some("s1")
        );
    }

    #[tokio::test]
    async fn test_unknown_assessment_is_not_found() {
        let harness = Harness::new(vec![]);
        let err = harness
            .orchestrator()
            .evaluate("missing", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_missing_item_is_not_found() {
        let harness = Harness::new(vec![]);
        harness.storage.insert_assessment(Assessment {
            id: "a-1".into(),
            key: QuestionKey::new("Physics", "Optics", Difficulty::Easy),
            item_ids: vec!["ghost".into()],
            created_at: chrono::Utc::now(),
        });
        harness
            .storage
            .insert_answers("a-1", vec![SubmittedAnswer::text("ghost", "A")]);

        let err = harness
            .orchestrator()
            .evaluate("a-1", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { kind: "item", .. }));
    }

    #[tokio::test]
    async fn test_no_answers_is_an_error() {
        let harness = Harness::new(vec![]);
        harness.seed(vec![GradableItem::objective("o1", "Pick", "A", 1)], vec![]);

        let err = harness
            .orchestrator()
            .evaluate("a-1", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoResponses(_)));
    }

    #[tokio::test]
    async fn test_cancelled_run_keeps_finished_items() {
        let harness = Harness::new(vec![ScriptedProvider::always(
            "primary",
            &evaluation_reply(6, "x", "low"),
        )]);
        harness.seed(
            vec![
                GradableItem::objective("o1", "Pick", "A", 1),
                GradableItem::subjective("s1", "Explain", "r", 10),
            ],
            vec![SubmittedAnswer::text("o1", "A"), SubmittedAnswer::text("s1", "answer")],
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let record = harness.orchestrator().evaluate("a-1", &cancel).await.unwrap();

        assert!(record.partial);
        assert_eq!(record.item_results[0].status, ItemStatus::Ok);
        assert_eq!(record.item_results[1].status, ItemStatus::Cancelled);
        assert_eq!(record.overall_percentage, 100.0);
        assert_eq!(harness.providers[0].calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_mid_flight() {
        let harness = Harness::new(vec![ScriptedProvider::always(
            "primary",
            &evaluation_reply(6, "x", "low"),
        )
        .with_delay(Duration::from_secs(3))]);
        harness.seed(
            vec![GradableItem::subjective("s1", "Explain", "r", 10)],
            vec![SubmittedAnswer::text("s1", "answer")],
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let record = harness.orchestrator().evaluate("a-1", &cancel).await.unwrap();
        assert!(record.partial);
        assert_eq!(record.item_results[0].status, ItemStatus::Cancelled);
        assert!(record.low_confidence);
    }

    #[tokio::test]
    async fn test_save_failure_still_returns_record() {
        let harness = Harness::new(vec![]);
        harness.seed(
            vec![GradableItem::objective("o1", "Pick", "A", 1)],
            vec![SubmittedAnswer::text("o1", "A")],
        );
        harness.storage.set_read_only(true);

        let record = harness
            .orchestrator()
            .evaluate("a-1", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(record.overall_percentage, 100.0);
        assert!(harness.storage.evaluations().is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_respected() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        struct Gauge {
            in_flight: Arc<AtomicUsize>,
            peak: Arc<AtomicUsize>,
        }

        #[async_trait::async_trait]
        impl crate::providers::LlmProvider for Gauge {
            async fn complete(
                &self,
                _request: &CompletionRequest,
            ) -> Result<crate::providers::Completion, ProviderError> {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(crate::providers::Completion::text(evaluation_reply(5, "x", "low")))
            }

            async fn health_check(&self) -> bool {
                true
            }

            fn name(&self) -> &str {
                "gauge"
            }
        }

        let storage = Arc::new(MemoryStorage::new());
        let items: Vec<GradableItem> = (0..6)
            .map(|i| GradableItem::subjective(format!("s{}", i), "Explain", "r", 10))
            .collect();
        let answers = items
            .iter()
            .map(|i| SubmittedAnswer::text(i.id.clone(), "answer"))
            .collect();
        storage.insert_assessment(Assessment {
            id: "a-1".into(),
            key: QuestionKey::new("Physics", "Optics", Difficulty::Easy),
            item_ids: items.iter().map(|i| i.id.clone()).collect(),
            created_at: chrono::Utc::now(),
        });
        for item in items {
            storage.insert_item(item);
        }
        storage.insert_answers("a-1", answers);

        let gateway = GenerationGateway::new().with_provider(
            Arc::new(Gauge {
                in_flight: in_flight.clone(),
                peak: peak.clone(),
            }),
            Duration::from_secs(5),
        );
        let settings = GradingSettings {
            max_concurrency: 2,
            ..GradingSettings::default()
        };
        let orchestrator = GradingOrchestrator::new(
            storage,
            Arc::new(gateway),
            Arc::new(RetrievalContextBuilder::new(
                Arc::new(NoRetrieval),
                &ContextSettings::default(),
            )),
            Arc::new(NoTextExtraction),
            ReferenceLookup::new(Arc::new(NoRetrieval), &RecommendationSettings::default()),
            Aggregator::new(),
            settings,
        );

        let record = orchestrator
            .evaluate("a-1", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(record.item_results.len(), 6);
        assert!(record.item_results.iter().all(ItemResult::is_ok));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_storage_errors_map_to_pipeline_errors() {
        let err: PipelineError = StorageError::not_found("assessment", "a-9").into();
        assert!(matches!(err, PipelineError::NotFound { kind: "assessment", .. }));
        let err: PipelineError = StorageError::Backend("down".into()).into();
        assert!(matches!(err, PipelineError::Storage(_)));
    }
}
