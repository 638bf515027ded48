//! Wiring of the grading and generation orchestrators.
//!
//! Components are built once from a [`RuntimeConfig`] and collaborator
//! handles; nothing here is global. Retrieval and text extraction default
//! to the null collaborators when not supplied.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use gradeflow_core::{Aggregator, Assessment, EvaluationRecord, SelectionStrategy, StoredQuestion};

use crate::collaborators::{NoRetrieval, NoTextExtraction, Retriever, Storage, TextExtractor};
use crate::config::{ConfigError, RuntimeConfig};
use crate::context::RetrievalContextBuilder;
use crate::gateway::{GatewayStats, GenerationGateway};
use crate::generation::{QuestionGenerationOrchestrator, QuestionRequest};
use crate::grading::GradingOrchestrator;
use crate::providers::{LlmProvider, ProviderRegistry};
use crate::recommend::ReferenceLookup;
use crate::PipelineError;

/// The assembled pipeline.
pub struct Pipeline {
    grading: GradingOrchestrator,
    generation: QuestionGenerationOrchestrator,
    gateway: Arc<GenerationGateway>,
    config: RuntimeConfig,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Grade a submitted assessment.
    pub async fn evaluate(
        &self,
        assessment_id: &str,
        cancel: &CancellationToken,
    ) -> Result<EvaluationRecord, PipelineError> {
        self.grading.evaluate(assessment_id, cancel).await
    }

    pub async fn generate_questions(
        &self,
        request: &QuestionRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoredQuestion>, PipelineError> {
        self.generation.generate_questions(request, cancel).await
    }

    /// Assemble an assessment of the configured size.
    pub async fn assemble_assessment(
        &self,
        request: &QuestionRequest,
        strategy: &dyn SelectionStrategy,
        cancel: &CancellationToken,
    ) -> Result<Assessment, PipelineError> {
        self.generation
            .assemble_assessment(request, self.config.generation.assessment_size, strategy, cancel)
            .await
    }

    pub fn grading(&self) -> &GradingOrchestrator {
        &self.grading
    }

    pub fn generation(&self) -> &QuestionGenerationOrchestrator {
        &self.generation
    }

    pub fn gateway_stats(&self) -> GatewayStats {
        self.gateway.stats()
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.gateway.provider_names()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    config: RuntimeConfig,
    registry: ProviderRegistry,
    extra_providers: Vec<(Arc<dyn LlmProvider>, Duration)>,
    storage: Option<Arc<dyn Storage>>,
    retriever: Option<Arc<dyn Retriever>>,
    extractor: Option<Arc<dyn TextExtractor>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            registry: ProviderRegistry::with_defaults(),
            extra_providers: Vec::new(),
            storage: None,
            retriever: None,
            extractor: None,
        }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Registry used to build the configured provider chain.
    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Append a provider after the configured chain.
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        self.extra_providers.push((provider, timeout));
        self
    }

    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        self.config.validate()?;

        let storage = self
            .storage
            .ok_or_else(|| ConfigError::Invalid("no storage configured".to_string()))?;

        let mut gateway = GenerationGateway::from_config(&self.config.providers, &self.registry)?;
        for (provider, timeout) in self.extra_providers {
            gateway.push(provider, timeout);
        }
        if gateway.is_empty() {
            tracing::warn!("No generation providers configured; subjective grading will fail");
        }
        let gateway = Arc::new(gateway);

        let retriever = self.retriever.unwrap_or_else(|| Arc::new(NoRetrieval));
        let extractor = self.extractor.unwrap_or_else(|| Arc::new(NoTextExtraction));
        let context = Arc::new(RetrievalContextBuilder::new(retriever.clone(), &self.config.context));

        let grading = GradingOrchestrator::new(
            storage.clone(),
            gateway.clone(),
            context.clone(),
            extractor,
            ReferenceLookup::new(retriever, &self.config.recommendations),
            Aggregator::new().with_max_recommendations(self.config.recommendations.max_items),
            self.config.grading.clone(),
        );
        let generation = QuestionGenerationOrchestrator::new(
            storage,
            gateway.clone(),
            context,
            self.config.generation.clone(),
        );

        Ok(Pipeline {
            grading,
            generation,
            gateway,
            config: self.config,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
