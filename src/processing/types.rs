//! Core data types and error definitions for the summarization pipeline.

use crate::{
    extraction::{ExtractionStatus, SourceKind},
    mailbox::MailboxError,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while turning normalized text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// The caller configured an impossible token budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
}

/// One ordered, non-overlapping slice of a document's normalized text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    /// `source_id` of the document the chunk came from.
    pub document_ref: String,
    /// Position of the chunk within its document, contiguous from 0.
    pub sequence_index: usize,
    /// Chunk text.
    pub text: String,
    /// Token estimate for `text` under the request's model family.
    pub approx_token_count: usize,
}

/// Which sources of a message a request summarizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryScope {
    /// The message body only.
    Body,
    /// Each attachment independently.
    Attachments,
    /// Body and attachments, plus one combined summary.
    #[default]
    All,
}

impl SummaryScope {
    /// Whether the body is summarized.
    pub fn includes_body(self) -> bool {
        matches!(self, SummaryScope::Body | SummaryScope::All)
    }

    /// Whether attachments are summarized.
    pub fn includes_attachments(self) -> bool {
        matches!(self, SummaryScope::Attachments | SummaryScope::All)
    }
}

impl FromStr for SummaryScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "body" => Ok(Self::Body),
            "attachments" => Ok(Self::Attachments),
            "all" => Ok(Self::All),
            other => Err(format!(
                "unknown scope '{other}' (expected body, attachments or all)"
            )),
        }
    }
}

impl fmt::Display for SummaryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SummaryScope::Body => "body",
            SummaryScope::Attachments => "attachments",
            SummaryScope::All => "all",
        })
    }
}

/// Instruction profile applied to every backend call of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryType {
    /// Three to five sentences.
    Brief,
    /// Main content and key points.
    #[default]
    Detailed,
    /// Bullet list.
    Bullet,
    /// Natural Korean prose.
    Korean,
}

impl FromStr for SummaryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "brief" => Ok(Self::Brief),
            "detailed" => Ok(Self::Detailed),
            "bullet" => Ok(Self::Bullet),
            "korean" => Ok(Self::Korean),
            other => Err(format!(
                "unknown summary type '{other}' (expected brief, detailed, bullet or korean)"
            )),
        }
    }
}

impl fmt::Display for SummaryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SummaryType::Brief => "brief",
            SummaryType::Detailed => "detailed",
            SummaryType::Bullet => "bullet",
            SummaryType::Korean => "korean",
        })
    }
}

/// Request-scoped parameters. The process-wide [`crate::config::Config`] only supplies defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRequest {
    /// Sources to summarize.
    pub scope: SummaryScope,
    /// Instruction profile.
    pub summary_type: SummaryType,
    /// Backend model identifier; also selects the token estimator family.
    pub model: String,
}

impl SummaryRequest {
    /// Build a request.
    pub fn new(scope: SummaryScope, summary_type: SummaryType, model: impl Into<String>) -> Self {
        Self {
            scope,
            summary_type,
            model: model.into(),
        }
    }
}

/// Summary of one attachment inside a [`SummaryResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentSummary {
    /// Declared attachment filename.
    pub filename: String,
    /// Generated summary.
    pub summary: String,
    /// Tokens in the extracted attachment text.
    pub original_tokens: usize,
    /// Tokens in the summary.
    pub summary_tokens: usize,
}

/// Result of summarizing a single attachment outside of an email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentReport {
    /// Declared attachment filename.
    pub filename: String,
    /// Generated summary.
    pub summary: String,
    /// Tokens in the extracted text.
    pub original_tokens: usize,
    /// Tokens in the summary.
    pub summary_tokens: usize,
    /// `round(100 * (1 - summary/original), 2)`, or 0 when nothing was extracted.
    pub compression_ratio: f64,
}

/// Stage a source was in when it failed.
///
/// Chunking failures are reported as [`SourceStage::Extracted`]; completed sources become
/// [`SourceOutcome::Done`](super::engine::SourceOutcome::Done) instead of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStage {
    /// Waiting for extraction.
    Pending,
    /// Text extracted.
    Extracted,
    /// Chunk calls in flight.
    Summarizing,
    /// Reduction call in flight.
    Reducing,
}

/// Why a source was excluded from the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFailure {
    /// No extractor exists for the source's format.
    #[error("unsupported format")]
    UnsupportedFormat,
    /// The document could not be parsed.
    #[error("corrupted document")]
    CorruptedDocument,
    /// The document is encrypted or password protected.
    #[error("encrypted document")]
    EncryptedDocument,
    /// The document holds no visible text.
    #[error("empty document")]
    EmptyDocument,
    /// The input exceeded the size limit.
    #[error("oversized input")]
    OversizedInput,
    /// The backend kept failing transiently until retries ran out.
    #[error("summarization backend unavailable")]
    BackendTransient,
    /// The backend rejected the request.
    #[error("summarization backend rejected the request")]
    BackendPermanent,
}

impl SourceFailure {
    /// Map a non-`ok` extraction status to its failure kind.
    pub fn from_extraction(status: ExtractionStatus) -> Option<Self> {
        match status {
            ExtractionStatus::Ok => None,
            ExtractionStatus::UnsupportedFormat => Some(Self::UnsupportedFormat),
            ExtractionStatus::Corrupted => Some(Self::CorruptedDocument),
            ExtractionStatus::Encrypted => Some(Self::EncryptedDocument),
            ExtractionStatus::Empty => Some(Self::EmptyDocument),
            ExtractionStatus::Oversized => Some(Self::OversizedInput),
        }
    }
}

/// A requested source that produced no summary, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedSource {
    /// Identifier of the source within the request.
    pub source_id: String,
    /// Body or attachment.
    pub source_kind: SourceKind,
    /// Declared filename, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Last stage the source reached before failing.
    pub failed_stage: SourceStage,
    /// Failure classification.
    pub failure: SourceFailure,
    /// Human-readable detail.
    pub reason: String,
}

/// Caller-facing outcome of summarizing one email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResult {
    /// Body summary, when the body was requested and summarized.
    pub body_summary: Option<String>,
    /// One entry per successfully summarized attachment, in attachment order.
    pub attachment_summaries: Vec<AttachmentSummary>,
    /// Present only for scope `all` with a body summary and at least one attachment summary.
    pub combined_summary: Option<String>,
    /// Tokens across every summarized source.
    pub total_original_tokens: usize,
    /// Tokens across every produced per-source summary.
    pub total_summary_tokens: usize,
    /// `round(100 * (1 - total_summary/total_original), 2)`, or 0 when nothing was measured.
    pub compression_ratio: f64,
    /// Tokens in the body text (0 without a body summary).
    pub body_original_tokens: usize,
    /// Tokens in the body summary (0 without a body summary).
    pub body_summary_tokens: usize,
    /// Requested sources that produced no summary.
    pub skipped: Vec<SkippedSource>,
    /// Why the combined call failed, when it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined_failure: Option<String>,
}

/// Request-level failures of the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Every requested source failed; nothing could be summarized.
    #[error("no requested source could be summarized ({} skipped)", skipped.len())]
    RequestHasNoEligibleSource {
        /// Every requested source and why it was skipped.
        skipped: Vec<SkippedSource>,
    },
    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,
    /// The mailbox could not supply the message.
    #[error("mailbox error: {0}")]
    Mailbox(#[from] MailboxError),
}
