//! HTTP surface for Inbox Digest.
//!
//! This module exposes a compact Axum router:
//!
//! - `POST /emails/:email_id/summary` – Summarize a message from the configured mailbox.
//!   Accepts `scope` (`body` | `attachments` | `all`), `summary_type`
//!   (`brief` | `detailed` | `bullet` | `korean`) and an optional `model`.
//! - `POST /summarize` – Summarize a message supplied inline, attachments as base64.
//! - `POST /attachments/summary` – Summarize a single base64 attachment.
//! - `POST /extract` – Extract one base64 document and preview its normalized text.
//! - `GET /metrics` – Observe request, source and backend counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.
//!
//! Requests where no source could be summarized answer `422` with the skipped sources, unknown
//! email ids `404`, malformed input `400`.

use crate::extraction::{DocumentFormat, ExtractedDocument, ExtractionStatus, SourceInput};
use crate::mailbox::{MailboxAttachment, MailboxError, MailboxMessage};
use crate::processing::{
    AttachmentReport, PipelineError, SummaryApi, SummaryRequest, SummaryResult, SummaryScope,
    SummaryType,
};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

const PREVIEW_CHARS: usize = 2_000;

/// Build the HTTP router exposing the summarization API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: SummaryApi + 'static,
{
    Router::new()
        .route("/emails/:email_id/summary", post(summarize_email::<S>))
        .route("/summarize", post(summarize_inline::<S>))
        .route("/attachments/summary", post(summarize_attachment::<S>))
        .route("/extract", post(extract_document::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .with_state(service)
}

/// Request options shared by the summary endpoints.
#[derive(Debug, Default, Deserialize)]
struct SummaryOptions {
    /// `body`, `attachments` or `all` (default).
    #[serde(default)]
    scope: Option<String>,
    /// `brief`, `detailed` (default), `bullet` or `korean`.
    #[serde(default)]
    summary_type: Option<String>,
    /// Backend model; defaults to `SUMMARY_MODEL`.
    #[serde(default)]
    model: Option<String>,
}

impl SummaryOptions {
    fn into_request(self, default_model: &str) -> Result<SummaryRequest, AppError> {
        let scope = match self.scope {
            Some(scope) => scope.parse::<SummaryScope>().map_err(AppError::BadRequest)?,
            None => SummaryScope::default(),
        };
        Ok(SummaryRequest::new(
            scope,
            parse_summary_type(self.summary_type)?,
            resolve_model(self.model, default_model),
        ))
    }
}

fn parse_summary_type(value: Option<String>) -> Result<SummaryType, AppError> {
    match value {
        Some(value) => value.parse::<SummaryType>().map_err(AppError::BadRequest),
        None => Ok(SummaryType::default()),
    }
}

fn resolve_model(model: Option<String>, default_model: &str) -> String {
    model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| default_model.to_string())
}

/// A base64-encoded document in a request body.
#[derive(Debug, Deserialize)]
struct EncodedDocument {
    filename: String,
    #[serde(default)]
    content_type: Option<String>,
    content_base64: String,
}

impl EncodedDocument {
    fn decode(self) -> Result<MailboxAttachment, AppError> {
        let raw_bytes = BASE64
            .decode(self.content_base64.trim())
            .map_err(|error| {
                AppError::BadRequest(format!(
                    "'{}' is not valid base64: {error}",
                    self.filename
                ))
            })?;
        Ok(MailboxAttachment {
            filename: self.filename,
            content_type: self.content_type,
            raw_bytes,
        })
    }
}

/// Summarize a message stored in the mailbox.
async fn summarize_email<S>(
    State(service): State<Arc<S>>,
    Path(email_id): Path<String>,
    options: Option<Json<SummaryOptions>>,
) -> Result<Json<SummaryResult>, AppError>
where
    S: SummaryApi,
{
    let options = options.map(|Json(options)| options).unwrap_or_default();
    let request = options.into_request(service.default_model())?;
    let result = service.summarize_email(&email_id, request).await?;
    tracing::info!(
        email_id,
        attachments = result.attachment_summaries.len(),
        skipped = result.skipped.len(),
        compression_ratio = result.compression_ratio,
        "Email summary request completed"
    );
    Ok(Json(result))
}

/// Request body for `POST /summarize`.
#[derive(Debug, Deserialize)]
struct InlineMessageRequest {
    #[serde(default)]
    email_id: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    sender: Option<String>,
    #[serde(default)]
    body_text: String,
    #[serde(default)]
    body_content_type: Option<String>,
    #[serde(default)]
    attachments: Vec<EncodedDocument>,
    #[serde(flatten)]
    options: SummaryOptions,
}

/// Summarize a message supplied in the request body.
async fn summarize_inline<S>(
    State(service): State<Arc<S>>,
    Json(payload): Json<InlineMessageRequest>,
) -> Result<Json<SummaryResult>, AppError>
where
    S: SummaryApi,
{
    let InlineMessageRequest {
        email_id,
        subject,
        sender,
        body_text,
        body_content_type,
        attachments,
        options,
    } = payload;
    let request = options.into_request(service.default_model())?;
    let attachments = attachments
        .into_iter()
        .map(EncodedDocument::decode)
        .collect::<Result<Vec<_>, _>>()?;
    let message = MailboxMessage {
        email_id: email_id.unwrap_or_else(|| "inline".to_string()),
        subject,
        sender,
        body_text,
        body_content_type,
        attachments,
    };
    let result = service.summarize_message(message, request).await?;
    Ok(Json(result))
}

/// Request body for `POST /attachments/summary`.
#[derive(Debug, Deserialize)]
struct AttachmentSummaryRequest {
    #[serde(flatten)]
    document: EncodedDocument,
    #[serde(default)]
    summary_type: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

/// Summarize one attachment outside of any message.
async fn summarize_attachment<S>(
    State(service): State<Arc<S>>,
    Json(payload): Json<AttachmentSummaryRequest>,
) -> Result<Json<AttachmentReport>, AppError>
where
    S: SummaryApi,
{
    let summary_type = parse_summary_type(payload.summary_type)?;
    let model = resolve_model(payload.model, service.default_model());
    let attachment = payload.document.decode()?;
    let source = SourceInput::attachment(
        0,
        attachment.filename,
        attachment.content_type,
        attachment.raw_bytes,
    );
    let report = service
        .summarize_attachment(source, summary_type, model)
        .await?;
    Ok(Json(report))
}

/// Response body for `POST /extract`.
#[derive(Debug, Serialize)]
struct ExtractPreview {
    filename: Option<String>,
    status: ExtractionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<DocumentFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_or_sheet_count: Option<usize>,
    raw_byte_length: usize,
    text_chars: usize,
    truncated: bool,
    preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    fingerprint: String,
}

impl From<ExtractedDocument> for ExtractPreview {
    fn from(document: ExtractedDocument) -> Self {
        let text = document.normalized_text();
        let text_chars = text.chars().count();
        Self {
            filename: document.filename().map(str::to_string),
            status: document.extraction_status(),
            format: document.format(),
            page_or_sheet_count: document.page_or_sheet_count(),
            raw_byte_length: document.raw_byte_length(),
            text_chars,
            truncated: text_chars > PREVIEW_CHARS,
            preview: text.chars().take(PREVIEW_CHARS).collect(),
            detail: document.detail().map(str::to_string),
            fingerprint: document.fingerprint().to_string(),
        }
    }
}

/// Extract one document without summarizing it.
async fn extract_document<S>(
    State(service): State<Arc<S>>,
    Json(payload): Json<EncodedDocument>,
) -> Result<Json<ExtractPreview>, AppError>
where
    S: SummaryApi,
{
    let attachment = payload.decode()?;
    let source = SourceInput::attachment(
        0,
        attachment.filename,
        attachment.content_type,
        attachment.raw_bytes,
    );
    let document = service.extract(source).await;
    tracing::debug!(
        status = ?document.extraction_status(),
        chars = document.normalized_text().len(),
        "Extraction preview served"
    );
    Ok(Json(ExtractPreview::from(document)))
}

/// Return the summarization counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> impl IntoResponse
where
    S: SummaryApi,
{
    Json(service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "summarize_email",
                method: "POST",
                path: "/emails/:email_id/summary",
                description: "Summarize the body and attachments of a mailbox message. Returns per-source summaries, an optional combined summary, token totals and skipped sources.",
                request_example: Some(json!({
                    "scope": "all",
                    "summary_type": "detailed",
                    "model": "gpt-4o-mini"
                })),
            },
            CommandDescriptor {
                name: "summarize_message",
                method: "POST",
                path: "/summarize",
                description: "Summarize a message supplied inline; attachments are base64 encoded.",
                request_example: Some(json!({
                    "subject": "Q3 review",
                    "sender": "ana@example.com",
                    "body_text": "Please see the attached report.",
                    "attachments": [{
                        "filename": "report.pdf",
                        "content_type": "application/pdf",
                        "content_base64": "JVBERi0xLjQK..."
                    }],
                    "scope": "all",
                    "summary_type": "bullet"
                })),
            },
            CommandDescriptor {
                name: "summarize_attachment",
                method: "POST",
                path: "/attachments/summary",
                description: "Summarize one base64 attachment and report its compression ratio.",
                request_example: Some(json!({
                    "filename": "minutes.docx",
                    "content_base64": "UEsDBBQ...",
                    "summary_type": "brief"
                })),
            },
            CommandDescriptor {
                name: "extract",
                method: "POST",
                path: "/extract",
                description: "Extract and normalize one base64 document without summarizing it.",
                request_example: Some(json!({
                    "filename": "budget.xlsx",
                    "content_base64": "UEsDBBQ..."
                })),
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return request, source, chunk and backend call counters.",
                request_example: None,
            },
        ],
    })
}

enum AppError {
    Pipeline(PipelineError),
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let error = match self {
            AppError::BadRequest(message) => {
                return (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
                    .into_response();
            }
            AppError::Pipeline(error) => error,
        };
        let message = error.to_string();
        match error {
            PipelineError::RequestHasNoEligibleSource { skipped } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": message, "skipped": skipped })),
            )
                .into_response(),
            PipelineError::Mailbox(MailboxError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            PipelineError::Mailbox(MailboxError::InvalidId(_)) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            other => {
                tracing::error!(error = %other, "Summary request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": message })),
                )
                    .into_response()
            }
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(inner: PipelineError) -> Self {
        Self::Pipeline(inner)
    }
}
