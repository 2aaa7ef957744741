//! Map-reduce summarization over extracted documents.
//!
//! Each source runs its own pipeline: `PENDING -> EXTRACTED -> CHUNKED -> SUMMARIZING ->
//! REDUCING -> DONE`, or fails at the stage it reached. A single chunk is summarized with one
//! direct call; several chunks are summarized concurrently and their ordered summaries pass
//! through exactly one reduction call. Backend calls share an engine-wide semaphore whose permits
//! are held for one attempt at a time, never across backoff sleeps.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join_all, try_join_all};
use tokio::sync::Semaphore;

use crate::{
    config::Config,
    extraction::{ExtractedDocument, SourceKind},
    metrics::SummaryMetrics,
    summarization::{SummarizationClient, SummarizationClientError, SummarizationRequest},
};

use super::{
    chunking::Chunker,
    prompts::{combine_instruction, combined_input, reduce_instruction, summary_instruction},
    retry::{CallState, RetryDecision, RetryPolicy},
    tokens::{TokenEstimator, determine_chunk_budget},
    types::{SkippedSource, SourceFailure, SourceStage, SummaryRequest, SummaryScope},
};

const DEFAULT_MAX_IN_FLIGHT: usize = 4;
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(500);

/// Deployment settings the engine needs, decoupled from the global [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Per-chunk token budget override; derived from the model when `None`.
    pub chunk_tokens: Option<usize>,
    /// Backend calls allowed in flight at once.
    pub max_in_flight: usize,
    /// Timeout for each backend attempt.
    pub call_timeout: Duration,
    /// Retry policy for transient failures.
    pub retry: RetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            chunk_tokens: None,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            retry: RetryPolicy::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BASE),
        }
    }
}

impl EngineSettings {
    /// Derive settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_tokens: config.summary_chunk_tokens,
            max_in_flight: config.summary_max_in_flight.max(1),
            call_timeout: Duration::from_secs(config.summary_call_timeout_secs),
            retry: RetryPolicy::new(
                config.summary_max_attempts,
                Duration::from_millis(config.summary_retry_base_ms),
            ),
        }
    }
}

/// Per-request measurements shared by the engine and the composer.
#[derive(Debug, Clone)]
pub struct RequestPlan {
    /// The request being served.
    pub request: SummaryRequest,
    /// Estimator for the request's model, used for budgets and statistics alike.
    pub estimator: TokenEstimator,
    /// Token budget per chunk.
    pub chunk_budget: usize,
}

/// A source that reached `DONE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    /// Identifier of the source within the request.
    pub source_id: String,
    /// Body or attachment.
    pub source_kind: SourceKind,
    /// Declared filename, if any.
    pub filename: Option<String>,
    /// Normalized text that was summarized.
    pub original_text: String,
    /// Final summary.
    pub summary: String,
    /// Chunks the text was split into.
    pub chunk_count: usize,
}

/// Terminal state of one source pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    /// The source produced a summary.
    Done(SourceSummary),
    /// The source failed; the record explains where and why.
    Failed(SkippedSource),
}

impl SourceOutcome {
    /// The summary, if the source succeeded.
    pub fn summary(&self) -> Option<&SourceSummary> {
        match self {
            SourceOutcome::Done(summary) => Some(summary),
            SourceOutcome::Failed(_) => None,
        }
    }
}

/// Everything the engine produced for one request, before composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeOutcome {
    /// Body pipeline outcome, when the body was requested.
    pub body: Option<SourceOutcome>,
    /// Attachment pipeline outcomes in attachment order.
    pub attachments: Vec<SourceOutcome>,
    /// Combined summary, when scope `all` produced one.
    pub combined_summary: Option<String>,
    /// Why the combined call failed, when it did.
    pub combined_failure: Option<String>,
}

/// Backend call that exhausted its retry policy or failed permanently.
#[derive(Debug, Clone)]
pub struct CallFailure {
    /// Failure classification.
    pub failure: SourceFailure,
    /// Final backend error.
    pub error: SummarizationClientError,
    /// Attempts made.
    pub attempts: u32,
}

/// Runs the per-source pipelines against one summarization backend.
pub struct SummaryEngine {
    client: Arc<dyn SummarizationClient>,
    settings: EngineSettings,
    permits: Arc<Semaphore>,
    metrics: Arc<SummaryMetrics>,
}

impl SummaryEngine {
    /// Build an engine around `client`.
    pub fn new(
        client: Arc<dyn SummarizationClient>,
        settings: EngineSettings,
        metrics: Arc<SummaryMetrics>,
    ) -> Self {
        Self {
            client,
            permits: Arc::new(Semaphore::new(settings.max_in_flight.max(1))),
            settings,
            metrics,
        }
    }

    /// Settings the engine was built with.
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Resolve the estimator and chunk budget for `request`.
    pub fn plan(&self, request: SummaryRequest) -> RequestPlan {
        let estimator = TokenEstimator::for_model(&request.model);
        let chunk_budget = determine_chunk_budget(self.settings.chunk_tokens, &request.model);
        tracing::debug!(
            model = %request.model,
            family = ?estimator.family(),
            chunk_budget,
            chunk_override = ?self.settings.chunk_tokens,
            "Derived chunk budget"
        );
        RequestPlan {
            request,
            estimator,
            chunk_budget,
        }
    }

    /// Summarize the requested sources and, for scope `all`, combine them.
    ///
    /// The combined call starts only after every source pipeline has finished, and only when
    /// both the body and at least one attachment succeeded.
    pub async fn summarize_scope(
        &self,
        plan: &RequestPlan,
        body: Option<&ExtractedDocument>,
        attachments: &[ExtractedDocument],
    ) -> ScopeOutcome {
        let body_pipeline = async {
            match body {
                Some(document) => Some(self.summarize_document(plan, document).await),
                None => None,
            }
        };
        let attachment_pipelines = join_all(
            attachments
                .iter()
                .map(|document| self.summarize_document(plan, document)),
        );
        let (body, attachments) = tokio::join!(body_pipeline, attachment_pipelines);

        let mut outcome = ScopeOutcome {
            body,
            attachments,
            combined_summary: None,
            combined_failure: None,
        };

        if plan.request.scope == SummaryScope::All {
            let body_summary = outcome.body.as_ref().and_then(SourceOutcome::summary);
            let attachment_summaries: Vec<&SourceSummary> = outcome
                .attachments
                .iter()
                .filter_map(SourceOutcome::summary)
                .collect();
            if let Some(body_summary) = body_summary.filter(|_| !attachment_summaries.is_empty()) {
                match self
                    .combine(plan, body_summary, &attachment_summaries)
                    .await
                {
                    Ok(summary) => outcome.combined_summary = Some(summary),
                    Err(failure) => {
                        tracing::warn!(
                            error = %failure.error,
                            attempts = failure.attempts,
                            "Combined summary failed; returning per-source summaries"
                        );
                        outcome.combined_failure = Some(failure.error.to_string());
                    }
                }
            }
        }

        outcome
    }

    /// Run one source through chunking, chunk summaries and reduction.
    pub async fn summarize_document(
        &self,
        plan: &RequestPlan,
        document: &ExtractedDocument,
    ) -> SourceOutcome {
        let skipped = |stage: SourceStage, failure: SourceFailure, reason: String| {
            tracing::warn!(
                source_id = %document.source_id(),
                stage = ?stage,
                failure = %failure,
                reason = %reason,
                "Source skipped"
            );
            SourceOutcome::Failed(SkippedSource {
                source_id: document.source_id().to_string(),
                source_kind: document.source_kind(),
                filename: document.filename().map(str::to_string),
                failed_stage: stage,
                failure,
                reason,
            })
        };

        if let Some(failure) = SourceFailure::from_extraction(document.extraction_status()) {
            let reason = document.detail().unwrap_or("extraction failed").to_string();
            return skipped(SourceStage::Pending, failure, reason);
        }

        let chunker = Chunker::new(plan.estimator.clone());
        let chunks = match chunker.chunk(
            document.source_id(),
            document.normalized_text(),
            plan.chunk_budget,
        ) {
            Ok(chunks) if chunks.is_empty() => {
                return skipped(
                    SourceStage::Extracted,
                    SourceFailure::EmptyDocument,
                    "document produced no chunks".to_string(),
                );
            }
            Ok(chunks) => chunks,
            Err(error) => {
                return skipped(
                    SourceStage::Extracted,
                    SourceFailure::CorruptedDocument,
                    error.to_string(),
                );
            }
        };
        self.metrics.record_chunks(chunks.len() as u64);
        tracing::debug!(
            source_id = %document.source_id(),
            chunks = chunks.len(),
            budget = plan.chunk_budget,
            "Document chunked"
        );

        let model = plan.request.model.as_str();
        let instruction = summary_instruction(plan.request.summary_type);

        if let [chunk] = chunks.as_slice() {
            return match self.call(model, instruction, &chunk.text).await {
                Ok(summary) => SourceOutcome::Done(self.done(document, summary, 1)),
                Err(failure) => skipped(
                    SourceStage::Summarizing,
                    failure.failure,
                    failure.error.to_string(),
                ),
            };
        }

        let chunk_calls = chunks.iter().map(|chunk| async move {
            let summary = self.call(model, instruction, &chunk.text).await?;
            tracing::trace!(
                source_id = %chunk.document_ref,
                sequence_index = chunk.sequence_index,
                "Chunk summarized"
            );
            Ok::<_, CallFailure>((chunk.sequence_index, summary))
        });
        let mut partials = match try_join_all(chunk_calls).await {
            Ok(partials) => partials,
            Err(failure) => {
                return skipped(
                    SourceStage::Summarizing,
                    failure.failure,
                    failure.error.to_string(),
                );
            }
        };
        partials.sort_by_key(|(index, _)| *index);
        let joined = partials
            .into_iter()
            .map(|(_, summary)| summary)
            .collect::<Vec<_>>()
            .join("\n\n");

        let reduce = reduce_instruction(plan.request.summary_type);
        match self.call(model, &reduce, &joined).await {
            Ok(summary) => SourceOutcome::Done(self.done(document, summary, chunks.len())),
            Err(failure) => skipped(
                SourceStage::Reducing,
                failure.failure,
                failure.error.to_string(),
            ),
        }
    }

    fn done(
        &self,
        document: &ExtractedDocument,
        summary: String,
        chunk_count: usize,
    ) -> SourceSummary {
        tracing::info!(
            source_id = %document.source_id(),
            chunks = chunk_count,
            "Source summarized"
        );
        SourceSummary {
            source_id: document.source_id().to_string(),
            source_kind: document.source_kind(),
            filename: document.filename().map(str::to_string),
            original_text: document.normalized_text().to_string(),
            summary,
            chunk_count,
        }
    }

    async fn combine(
        &self,
        plan: &RequestPlan,
        body: &SourceSummary,
        attachments: &[&SourceSummary],
    ) -> Result<String, CallFailure> {
        let labelled: Vec<(&str, &str)> = attachments
            .iter()
            .map(|summary| {
                (
                    summary.filename.as_deref().unwrap_or(summary.source_id.as_str()),
                    summary.summary.as_str(),
                )
            })
            .collect();
        let text = combined_input(&body.summary, &labelled);
        let instruction = combine_instruction(plan.request.summary_type);
        self.call(&plan.request.model, &instruction, &text).await
    }

    /// One logical backend call with timeout and retries.
    pub async fn call(
        &self,
        model: &str,
        instruction: &str,
        text: &str,
    ) -> Result<String, CallFailure> {
        let request = SummarizationRequest {
            model: model.to_string(),
            instruction: instruction.to_string(),
            text: text.to_string(),
        };
        let mut state = CallState::new();

        loop {
            let result = {
                let Ok(_permit) = self.permits.acquire().await else {
                    return Err(CallFailure {
                        failure: SourceFailure::BackendTransient,
                        error: SummarizationClientError::ProviderUnavailable(
                            "engine is shutting down".into(),
                        ),
                        attempts: state.attempt(),
                    });
                };
                self.metrics.record_backend_call();
                match tokio::time::timeout(
                    self.settings.call_timeout,
                    self.client.generate_summary(request.clone()),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(SummarizationClientError::Timeout(self.settings.call_timeout)),
                }
            };

            let error = match result {
                Ok(summary) => return Ok(summary),
                Err(error) => error,
            };
            match state.on_failure(error, &self.settings.retry) {
                RetryDecision::Retry {
                    next_attempt,
                    delay,
                } => {
                    self.metrics.record_retry();
                    tracing::warn!(
                        next_attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = ?state.last_error(),
                        "Transient backend failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp { failure, error } => {
                    return Err(CallFailure {
                        failure,
                        error,
                        attempts: state.attempt(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{Dispatcher, SourceInput};
    use crate::processing::types::SummaryType;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails with the scripted errors first, then echoes a fixed summary.
    struct ScriptedClient {
        failures: Mutex<Vec<SummarizationClientError>>,
        delay: Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(failures: Vec<SummarizationClientError>, delay: Duration) -> Self {
            Self {
                failures: Mutex::new(failures),
                delay,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SummarizationClient for ScriptedClient {
        async fn generate_summary(
            &self,
            _request: SummarizationRequest,
        ) -> Result<String, SummarizationClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let next = self.failures.lock().expect("lock").pop();
            match next {
                Some(error) => Err(error),
                None => Ok("short summary".to_string()),
            }
        }
    }

    fn settings(max_in_flight: usize, timeout_ms: u64, attempts: u32) -> EngineSettings {
        EngineSettings {
            chunk_tokens: Some(10),
            max_in_flight,
            call_timeout: Duration::from_millis(timeout_ms),
            retry: RetryPolicy::new(attempts, Duration::from_millis(5)),
        }
    }

    fn engine(client: Arc<ScriptedClient>, settings: EngineSettings) -> SummaryEngine {
        SummaryEngine::new(client, settings, Arc::new(SummaryMetrics::new()))
    }

    fn body(text: &str) -> ExtractedDocument {
        Dispatcher::new(1 << 20).dispatch(&SourceInput::body(text))
    }

    fn request() -> SummaryRequest {
        SummaryRequest::new(SummaryScope::Body, SummaryType::Brief, "stub-model")
    }

    #[tokio::test]
    async fn transient_failure_then_success_is_retried() {
        let client = Arc::new(ScriptedClient::new(
            vec![SummarizationClientError::Status {
                status: 503,
                body: "busy".into(),
            }],
            Duration::ZERO,
        ));
        let engine = engine(client.clone(), settings(2, 1_000, 3));
        let plan = engine.plan(request());
        let outcome = engine.summarize_document(&plan, &body("one two three")).await;
        assert!(matches!(outcome, SourceOutcome::Done(_)));
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn timeouts_count_as_transient() {
        let client = Arc::new(ScriptedClient::new(Vec::new(), Duration::from_millis(500)));
        let engine = engine(client.clone(), settings(2, 20, 2));
        let plan = engine.plan(request());
        let outcome = engine.summarize_document(&plan, &body("one two three")).await;
        let SourceOutcome::Failed(skipped) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(skipped.failure, SourceFailure::BackendTransient);
        assert_eq!(skipped.failed_stage, SourceStage::Summarizing);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let client = Arc::new(ScriptedClient::new(
            vec![SummarizationClientError::ContentFiltered("policy".into())],
            Duration::ZERO,
        ));
        let engine = engine(client.clone(), settings(2, 1_000, 3));
        let plan = engine.plan(request());
        let outcome = engine.summarize_document(&plan, &body("one two three")).await;
        let SourceOutcome::Failed(skipped) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(skipped.failure, SourceFailure::BackendPermanent);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn chunk_calls_respect_in_flight_limit() {
        let client = Arc::new(ScriptedClient::new(Vec::new(), Duration::from_millis(20)));
        let engine = engine(client.clone(), settings(2, 1_000, 1));
        let plan = engine.plan(request());
        let text = (0..8)
            .map(|p| format!("paragraph {p} has exactly six words"))
            .collect::<Vec<_>>()
            .join("\n\n");
        let outcome = engine.summarize_document(&plan, &body(&text)).await;
        let SourceOutcome::Done(summary) = outcome else {
            panic!("expected success");
        };
        assert_eq!(summary.chunk_count, 8);
        // Eight chunk calls plus one reduction.
        assert_eq!(client.calls.load(Ordering::SeqCst), 9);
        assert!(client.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn failed_extraction_is_skipped_before_any_call() {
        let client = Arc::new(ScriptedClient::new(Vec::new(), Duration::ZERO));
        let engine = engine(client.clone(), settings(2, 1_000, 1));
        let plan = engine.plan(request());
        let outcome = engine.summarize_document(&plan, &body("   ")).await;
        let SourceOutcome::Failed(skipped) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(skipped.failure, SourceFailure::EmptyDocument);
        assert_eq!(skipped.failed_stage, SourceStage::Pending);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn chunking_failure_is_skipped_at_extracted_stage() {
        let client = Arc::new(ScriptedClient::new(Vec::new(), Duration::ZERO));
        let engine = engine(client.clone(), settings(2, 1_000, 1));
        let mut plan = engine.plan(request());
        plan.chunk_budget = 0;
        let outcome = engine.summarize_document(&plan, &body("Some text.")).await;
        let SourceOutcome::Failed(skipped) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(skipped.failed_stage, SourceStage::Extracted);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }
}
