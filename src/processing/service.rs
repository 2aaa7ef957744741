//! Summary service coordinating the mailbox, extraction, and the summarization engine.

use crate::{
    config::Config,
    extraction::{Dispatcher, ExtractedDocument, SourceInput, SourceKind},
    mailbox::{DirectoryMailbox, MailboxMessage, MailboxSource},
    metrics::{MetricsSnapshot, SummaryMetrics},
    processing::{
        compose::{compose, compose_attachment},
        engine::{EngineSettings, SummaryEngine},
        types::{
            AttachmentReport, PipelineError, SummaryRequest, SummaryResult, SummaryScope,
            SummaryType,
        },
    },
    summarization::{SummarizationClient, get_summarization_client},
};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Coordinates the full pipeline: fetch, extraction, chunked summarization, and composition.
///
/// The service owns long-lived handles to the backend client, the mailbox, and the metrics
/// registry so that the HTTP surface and the CLI reuse the same components. Construct it once
/// near process start and share it through an `Arc`.
pub struct SummaryService {
    engine: SummaryEngine,
    dispatcher: Dispatcher,
    mailbox: Arc<dyn MailboxSource>,
    metrics: Arc<SummaryMetrics>,
    default_model: String,
}

/// Abstraction over the pipeline used by external surfaces (HTTP, CLI).
#[async_trait]
pub trait SummaryApi: Send + Sync {
    /// Fetch a message from the mailbox and summarize it.
    async fn summarize_email(
        &self,
        email_id: &str,
        request: SummaryRequest,
    ) -> Result<SummaryResult, PipelineError>;

    /// Summarize a message supplied by the caller.
    async fn summarize_message(
        &self,
        message: MailboxMessage,
        request: SummaryRequest,
    ) -> Result<SummaryResult, PipelineError>;

    /// Summarize one attachment on its own.
    async fn summarize_attachment(
        &self,
        source: SourceInput,
        summary_type: SummaryType,
        model: String,
    ) -> Result<AttachmentReport, PipelineError>;

    /// Extract one source without summarizing it.
    async fn extract(&self, source: SourceInput) -> ExtractedDocument;

    /// Model used when a request does not name one.
    fn default_model(&self) -> &str;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

impl SummaryService {
    /// Build the service from configuration: configured backend, directory mailbox.
    pub fn from_config(config: &Config) -> Self {
        tracing::info!(provider = ?config.summary_provider, "Initializing summarization client");
        let client = get_summarization_client(config);
        let mailbox = Arc::new(DirectoryMailbox::new(&config.mailbox_root));
        Self::new(
            client,
            mailbox,
            EngineSettings::from_config(config),
            Dispatcher::new(config.max_attachment_bytes),
            config.summary_model.clone(),
        )
    }

    /// Build the service from explicit parts.
    pub fn new(
        client: Arc<dyn SummarizationClient>,
        mailbox: Arc<dyn MailboxSource>,
        settings: EngineSettings,
        dispatcher: Dispatcher,
        default_model: String,
    ) -> Self {
        let metrics = Arc::new(SummaryMetrics::new());
        Self {
            engine: SummaryEngine::new(client, settings, metrics.clone()),
            dispatcher,
            mailbox,
            metrics,
            default_model,
        }
    }

    fn with_default_model(&self, mut request: SummaryRequest) -> SummaryRequest {
        if request.model.trim().is_empty() {
            request.model = self.default_model.clone();
        }
        request
    }

    /// Fetch a message and summarize it.
    pub async fn summarize_email(
        &self,
        email_id: &str,
        request: SummaryRequest,
    ) -> Result<SummaryResult, PipelineError> {
        let message = self.mailbox.fetch_message(email_id).await?;
        self.summarize_message(message, request).await
    }

    /// Like [`SummaryService::summarize_email`], but gives up when `cancel` completes first.
    ///
    /// In-flight backend calls are dropped without retry and no partial result is returned.
    pub async fn summarize_email_until<C>(
        &self,
        email_id: &str,
        request: SummaryRequest,
        cancel: C,
    ) -> Result<SummaryResult, PipelineError>
    where
        C: Future<Output = ()> + Send,
    {
        tokio::select! {
            biased;
            _ = cancel => {
                tracing::info!(email_id, "Summary request cancelled");
                Err(PipelineError::Cancelled)
            }
            result = self.summarize_email(email_id, request) => result,
        }
    }

    /// Summarize a message: extract the requested sources, run the engine, compose the result.
    pub async fn summarize_message(
        &self,
        message: MailboxMessage,
        request: SummaryRequest,
    ) -> Result<SummaryResult, PipelineError> {
        let request = self.with_default_model(request);
        let span = tracing::info_span!(
            "summary_request",
            request_id = %Uuid::new_v4(),
            email_id = %message.email_id,
            scope = %request.scope,
            summary_type = %request.summary_type,
            model = %request.model,
        );

        async move {
            let plan = self.engine.plan(request);
            let scope = plan.request.scope;

            let mut sources = Vec::new();
            if scope.includes_body() {
                sources.push(message.body_source());
            }
            if scope.includes_attachments() {
                sources.extend(message.attachment_sources());
            }
            tracing::info!(sources = sources.len(), "Extracting sources");

            let mut documents = self.dispatcher.dispatch_all(sources).await;
            let body = if scope.includes_body() && !documents.is_empty() {
                Some(documents.remove(0).with_preamble(&message.preamble()))
            } else {
                None
            };

            let outcome = self
                .engine
                .summarize_scope(&plan, body.as_ref(), &documents)
                .await;
            match compose(outcome, &plan.estimator) {
                Ok(result) => {
                    let summarized = usize::from(result.body_summary.is_some())
                        + result.attachment_summaries.len();
                    self.metrics
                        .record_request(summarized as u64, result.skipped.len() as u64);
                    tracing::info!(
                        summarized,
                        skipped = result.skipped.len(),
                        original_tokens = result.total_original_tokens,
                        summary_tokens = result.total_summary_tokens,
                        compression_ratio = result.compression_ratio,
                        combined = result.combined_summary.is_some(),
                        "Summary request completed"
                    );
                    Ok(result)
                }
                Err(error) => {
                    if let PipelineError::RequestHasNoEligibleSource { skipped } = &error {
                        self.metrics.record_failed_request(skipped.len() as u64);
                    }
                    tracing::warn!(error = %error, "Summary request failed");
                    Err(error)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Summarize one attachment outside of any message.
    pub async fn summarize_attachment(
        &self,
        mut source: SourceInput,
        summary_type: SummaryType,
        model: String,
    ) -> Result<AttachmentReport, PipelineError> {
        source.kind = SourceKind::Attachment;
        let request = self.with_default_model(SummaryRequest::new(
            SummaryScope::Attachments,
            summary_type,
            model,
        ));
        let span = tracing::info_span!(
            "attachment_request",
            request_id = %Uuid::new_v4(),
            filename = ?source.filename,
            summary_type = %request.summary_type,
            model = %request.model,
        );

        async move {
            let plan = self.engine.plan(request);
            let document = self.extract(source).await;
            let outcome = self.engine.summarize_document(&plan, &document).await;
            let report = compose_attachment(outcome, &plan.estimator);
            match &report {
                Ok(report) => {
                    self.metrics.record_request(1, 0);
                    tracing::info!(
                        original_tokens = report.original_tokens,
                        summary_tokens = report.summary_tokens,
                        compression_ratio = report.compression_ratio,
                        "Attachment summarized"
                    );
                }
                Err(error) => {
                    self.metrics.record_failed_request(1);
                    tracing::warn!(error = %error, "Attachment summary failed");
                }
            }
            report
        }
        .instrument(span)
        .await
    }

    /// Extract one source on the blocking pool.
    pub async fn extract(&self, source: SourceInput) -> ExtractedDocument {
        let mut documents = self.dispatcher.dispatch_all(vec![source]).await;
        documents.remove(0)
    }

    /// Return the current metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[async_trait]
impl SummaryApi for SummaryService {
    async fn summarize_email(
        &self,
        email_id: &str,
        request: SummaryRequest,
    ) -> Result<SummaryResult, PipelineError> {
        SummaryService::summarize_email(self, email_id, request).await
    }

    async fn summarize_message(
        &self,
        message: MailboxMessage,
        request: SummaryRequest,
    ) -> Result<SummaryResult, PipelineError> {
        SummaryService::summarize_message(self, message, request).await
    }

    async fn summarize_attachment(
        &self,
        source: SourceInput,
        summary_type: SummaryType,
        model: String,
    ) -> Result<AttachmentReport, PipelineError> {
        SummaryService::summarize_attachment(self, source, summary_type, model).await
    }

    async fn extract(&self, source: SourceInput) -> ExtractedDocument {
        SummaryService::extract(self, source).await
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        SummaryService::metrics_snapshot(self)
    }
}
