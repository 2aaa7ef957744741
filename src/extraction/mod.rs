//! Text extraction for mail bodies and attachments.
//!
//! The [`Dispatcher`] resolves a [`DocumentFormat`] for each [`SourceInput`] (extension first,
//! then declared content type, then content sniffing), enforces the input size limit, and runs
//! the matching extractor. Every outcome, success or failure, is an [`ExtractedDocument`]; the
//! dispatcher never returns an error to its caller.
//!
//! Extraction is CPU-bound, so [`Dispatcher::dispatch_all`] runs each source on the blocking
//! pool and joins the results in input order.

mod detect;
mod normalize;
mod ooxml;
mod pdf;
mod presentation;
mod spreadsheet;
mod text;
mod word;

pub use detect::{DocumentFormat, FormatResolution, resolve_format};
pub use normalize::normalize_text;
pub(crate) use text::decode as decode_text;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Whether a source is the message body or one of its attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// The message body text.
    Body,
    /// A binary attachment.
    Attachment,
}

/// Outcome of extracting one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    /// Text was extracted and is non-empty.
    Ok,
    /// No extractor exists for the resolved format.
    UnsupportedFormat,
    /// The document could not be parsed.
    Corrupted,
    /// The document is encrypted or password protected.
    Encrypted,
    /// The document parsed but holds no visible text.
    Empty,
    /// The input exceeded the dispatcher's size limit and was not parsed.
    Oversized,
}

/// Raw input handed to the dispatcher.
#[derive(Debug, Clone)]
pub struct SourceInput {
    /// Identifier unique within one request (`body`, `attachment-0`, ...).
    pub source_id: String,
    /// Body or attachment.
    pub kind: SourceKind,
    /// Declared filename; its extension is the primary format signal.
    pub filename: Option<String>,
    /// Declared MIME type, used when the extension is missing or ambiguous.
    pub content_type: Option<String>,
    /// Raw bytes of the source.
    pub bytes: Vec<u8>,
}

impl SourceInput {
    /// Wrap message body text.
    pub fn body(text: impl Into<String>) -> Self {
        Self {
            source_id: "body".to_string(),
            kind: SourceKind::Body,
            filename: None,
            content_type: None,
            bytes: text.into().into_bytes(),
        }
    }

    /// Wrap the attachment at `index` in the message's attachment order.
    pub fn attachment(
        index: usize,
        filename: impl Into<String>,
        content_type: Option<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            source_id: format!("attachment-{index}"),
            kind: SourceKind::Attachment,
            filename: Some(filename.into()),
            content_type,
            bytes,
        }
    }
}

/// Normalized text for one source, or the reason there is none.
///
/// Documents are built only through [`ExtractedDocument::ok`] and the failure constructors, so a
/// failed document never carries partially extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedDocument {
    source_id: String,
    source_kind: SourceKind,
    filename: Option<String>,
    raw_byte_length: usize,
    normalized_text: String,
    extraction_status: ExtractionStatus,
    page_or_sheet_count: Option<usize>,
    format: Option<DocumentFormat>,
    detail: Option<String>,
    fingerprint: String,
}

impl ExtractedDocument {
    /// Build a document from successfully extracted text.
    ///
    /// The text is normalized first; if nothing visible remains the status becomes
    /// [`ExtractionStatus::Empty`].
    pub fn ok(
        source: &SourceInput,
        format: DocumentFormat,
        raw_text: &str,
        page_or_sheet_count: Option<usize>,
    ) -> Self {
        let normalized_text = normalize_text(raw_text);
        if normalized_text.is_empty() {
            return Self::failed(
                source,
                Some(format),
                ExtractionStatus::Empty,
                "document contains no visible text",
            );
        }
        Self {
            source_id: source.source_id.clone(),
            source_kind: source.kind,
            filename: source.filename.clone(),
            raw_byte_length: source.bytes.len(),
            normalized_text,
            extraction_status: ExtractionStatus::Ok,
            page_or_sheet_count,
            format: Some(format),
            detail: None,
            fingerprint: fingerprint(&source.bytes),
        }
    }

    /// Build a failed document with empty text.
    pub fn failed(
        source: &SourceInput,
        format: Option<DocumentFormat>,
        status: ExtractionStatus,
        detail: impl Into<String>,
    ) -> Self {
        Self::failed_parts(
            &source.source_id,
            source.kind,
            source.filename.clone(),
            source.bytes.len(),
            fingerprint(&source.bytes),
            format,
            status,
            detail.into(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn failed_parts(
        source_id: &str,
        source_kind: SourceKind,
        filename: Option<String>,
        raw_byte_length: usize,
        fingerprint: String,
        format: Option<DocumentFormat>,
        status: ExtractionStatus,
        detail: String,
    ) -> Self {
        debug_assert_ne!(status, ExtractionStatus::Ok);
        Self {
            source_id: source_id.to_string(),
            source_kind,
            filename,
            raw_byte_length,
            normalized_text: String::new(),
            extraction_status: status,
            page_or_sheet_count: None,
            format,
            detail: Some(detail),
            fingerprint,
        }
    }

    /// Identifier of the source within its request.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Body or attachment.
    pub fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    /// Declared filename, if any.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Size of the raw input in bytes.
    pub fn raw_byte_length(&self) -> usize {
        self.raw_byte_length
    }

    /// Normalized text; empty unless the status is [`ExtractionStatus::Ok`].
    pub fn normalized_text(&self) -> &str {
        &self.normalized_text
    }

    /// Extraction outcome.
    pub fn extraction_status(&self) -> ExtractionStatus {
        self.extraction_status
    }

    /// Pages (PDF), sheets (spreadsheet) or slides (presentation) seen during extraction.
    pub fn page_or_sheet_count(&self) -> Option<usize> {
        self.page_or_sheet_count
    }

    /// Format the dispatcher resolved, if any.
    pub fn format(&self) -> Option<DocumentFormat> {
        self.format
    }

    /// Human-readable failure detail.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Short SHA-256 prefix of the raw bytes.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Whether the document carries usable text.
    pub fn is_ok(&self) -> bool {
        self.extraction_status == ExtractionStatus::Ok
    }

    /// Prepend header lines to the text of a successfully extracted document.
    ///
    /// Returns a new document; failed documents are returned unchanged.
    pub fn with_preamble(self, preamble: &str) -> Self {
        if !self.is_ok() || preamble.trim().is_empty() {
            return self;
        }
        Self {
            normalized_text: normalize_text(&format!("{preamble}\n\n{}", self.normalized_text)),
            ..self
        }
    }
}

/// Successful extractor output before normalization.
#[derive(Debug)]
pub(crate) struct ExtractedText {
    pub(crate) text: String,
    pub(crate) units: Option<usize>,
}

impl ExtractedText {
    pub(crate) fn new(text: String, units: Option<usize>) -> Self {
        Self { text, units }
    }
}

/// Extractor failure, mapped to an [`ExtractionStatus`] by the dispatcher.
#[derive(Debug)]
pub(crate) enum ExtractFailure {
    Corrupted(String),
    Encrypted(String),
}

pub(crate) type ExtractResult = Result<ExtractedText, ExtractFailure>;

impl DocumentFormat {
    fn extract(self, bytes: &[u8]) -> ExtractResult {
        match self {
            DocumentFormat::Pdf => pdf::extract(bytes),
            DocumentFormat::Word => word::extract(bytes),
            DocumentFormat::Spreadsheet => spreadsheet::extract(bytes),
            DocumentFormat::Presentation => presentation::extract(bytes),
            DocumentFormat::PlainText => text::extract_plain(bytes),
            DocumentFormat::Html => text::extract_html(bytes),
            DocumentFormat::Xml => text::extract_xml(bytes),
        }
    }
}

/// Selects an extractor per source and applies uniform failure handling.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    max_input_bytes: usize,
}

impl Dispatcher {
    /// Create a dispatcher that rejects inputs larger than `max_input_bytes`.
    pub fn new(max_input_bytes: usize) -> Self {
        Self { max_input_bytes }
    }

    /// Largest accepted input in bytes.
    pub fn max_input_bytes(&self) -> usize {
        self.max_input_bytes
    }

    /// Extract one source.
    pub fn dispatch(&self, source: &SourceInput) -> ExtractedDocument {
        if source.bytes.len() > self.max_input_bytes {
            tracing::warn!(
                source_id = %source.source_id,
                size = source.bytes.len(),
                limit = self.max_input_bytes,
                "Source exceeds size limit; skipping extraction"
            );
            return ExtractedDocument::failed(
                source,
                None,
                ExtractionStatus::Oversized,
                format!(
                    "input is {} bytes; the limit is {} bytes",
                    source.bytes.len(),
                    self.max_input_bytes
                ),
            );
        }

        let format = match resolve_format(
            source.filename.as_deref(),
            source.content_type.as_deref(),
            &source.bytes,
        ) {
            FormatResolution::Supported(format) => format,
            FormatResolution::Unsupported(reason) => {
                tracing::info!(source_id = %source.source_id, reason = %reason, "Unsupported source format");
                return ExtractedDocument::failed(
                    source,
                    None,
                    ExtractionStatus::UnsupportedFormat,
                    reason,
                );
            }
            FormatResolution::ProtectedPackage(format) => {
                return ExtractedDocument::failed(
                    source,
                    Some(format),
                    ExtractionStatus::Encrypted,
                    "office document is password protected",
                );
            }
        };

        let document = match format.extract(&source.bytes) {
            Ok(ExtractedText { text, units }) => ExtractedDocument::ok(source, format, &text, units),
            Err(ExtractFailure::Corrupted(detail)) => ExtractedDocument::failed(
                source,
                Some(format),
                ExtractionStatus::Corrupted,
                detail,
            ),
            Err(ExtractFailure::Encrypted(detail)) => ExtractedDocument::failed(
                source,
                Some(format),
                ExtractionStatus::Encrypted,
                detail,
            ),
        };

        tracing::debug!(
            source_id = %document.source_id(),
            format = ?format,
            status = ?document.extraction_status(),
            bytes = document.raw_byte_length(),
            chars = document.normalized_text().len(),
            fingerprint = %document.fingerprint(),
            "Extraction finished"
        );
        document
    }

    /// Extract every source concurrently on the blocking pool, preserving input order.
    pub async fn dispatch_all(&self, sources: Vec<SourceInput>) -> Vec<ExtractedDocument> {
        let dispatcher = *self;
        let tasks = sources.into_iter().map(|source| {
            let source_id = source.source_id.clone();
            let kind = source.kind;
            let filename = source.filename.clone();
            let raw_len = source.bytes.len();
            let digest = fingerprint(&source.bytes);
            async move {
                match tokio::task::spawn_blocking(move || dispatcher.dispatch(&source)).await {
                    Ok(document) => document,
                    Err(error) => {
                        tracing::error!(source_id = %source_id, error = %error, "Extraction task aborted");
                        ExtractedDocument::failed_parts(
                            &source_id,
                            kind,
                            filename,
                            raw_len,
                            digest,
                            None,
                            ExtractionStatus::Corrupted,
                            format!("extraction aborted: {error}"),
                        )
                    }
                }
            }
        });
        join_all(tasks).await
    }
}

fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..8])
}
