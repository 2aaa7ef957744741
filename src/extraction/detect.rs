//! Format resolution from filename extension, declared content type, and byte signatures.

use serde::Serialize;
use std::io::Cursor;
use std::path::Path;

const OLE_SIGNATURE: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const ZIP_SIGNATURE: &[u8] = b"PK\x03\x04";
const SNIFF_WINDOW: usize = 1024;
/// Leading bytes (BOMs, stray line breaks) tolerated before a `%PDF-` header.
const PDF_HEADER_SLACK: usize = 8;

/// Extensions that say nothing about the content and defer to other signals.
const AMBIGUOUS_EXTENSIONS: &[&str] = &["bin", "dat", "tmp", "att", "data", "octet-stream"];
/// Binary Office formats predating OOXML.
const LEGACY_OFFICE_EXTENSIONS: &[&str] = &["doc", "xls", "ppt"];

const MIME_PDF: &str = "application/pdf";
const MIME_DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

/// Document families with a dedicated extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    /// Portable Document Format.
    Pdf,
    /// WordprocessingML (`.docx`).
    Word,
    /// SpreadsheetML (`.xlsx`).
    Spreadsheet,
    /// PresentationML (`.pptx`).
    Presentation,
    /// Plain text in any supported encoding.
    PlainText,
    /// HTML markup.
    Html,
    /// Generic XML markup.
    Xml,
}

impl DocumentFormat {
    fn is_ooxml(self) -> bool {
        matches!(
            self,
            DocumentFormat::Word | DocumentFormat::Spreadsheet | DocumentFormat::Presentation
        )
    }
}

/// Result of resolving the format of a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatResolution {
    /// An extractor exists for this format.
    Supported(DocumentFormat),
    /// No extractor applies; the string explains why.
    Unsupported(String),
    /// An OOXML package wrapped in an encrypted OLE container.
    ProtectedPackage(DocumentFormat),
}

/// Resolve the format of a source.
///
/// The filename extension wins when it is known. Missing or ambiguous extensions fall back to
/// the declared content type and then to content sniffing. This is a pure function of its
/// inputs.
pub fn resolve_format(
    filename: Option<&str>,
    content_type: Option<&str>,
    bytes: &[u8],
) -> FormatResolution {
    let extension = filename.and_then(extension_of);

    if let Some(ext) = extension.as_deref().filter(|ext| !AMBIGUOUS_EXTENSIONS.contains(ext)) {
        if let Some(format) = format_for_extension(ext) {
            return guard_protected(format, bytes);
        }
        if LEGACY_OFFICE_EXTENSIONS.contains(&ext) {
            return FormatResolution::Unsupported(format!(
                "legacy binary .{ext} documents are not supported"
            ));
        }
        return FormatResolution::Unsupported(format!(".{ext} files are not supported"));
    }

    if let Some(format) = content_type.and_then(format_for_content_type) {
        return guard_protected(format, bytes);
    }

    sniff(bytes)
}

fn guard_protected(format: DocumentFormat, bytes: &[u8]) -> FormatResolution {
    if format.is_ooxml() && bytes.starts_with(OLE_SIGNATURE) {
        FormatResolution::ProtectedPackage(format)
    } else {
        FormatResolution::Supported(format)
    }
}

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename.trim())
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

fn format_for_extension(ext: &str) -> Option<DocumentFormat> {
    match ext {
        "pdf" => Some(DocumentFormat::Pdf),
        "docx" | "docm" => Some(DocumentFormat::Word),
        "xlsx" | "xlsm" => Some(DocumentFormat::Spreadsheet),
        "pptx" | "pptm" => Some(DocumentFormat::Presentation),
        "txt" | "text" | "log" | "md" | "markdown" | "csv" | "tsv" | "json" | "yaml" | "yml"
        | "ini" => Some(DocumentFormat::PlainText),
        "html" | "htm" | "xhtml" => Some(DocumentFormat::Html),
        "xml" => Some(DocumentFormat::Xml),
        _ => None,
    }
}

fn format_for_content_type(content_type: &str) -> Option<DocumentFormat> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        MIME_PDF => Some(DocumentFormat::Pdf),
        MIME_DOCX => Some(DocumentFormat::Word),
        MIME_XLSX => Some(DocumentFormat::Spreadsheet),
        MIME_PPTX => Some(DocumentFormat::Presentation),
        "text/html" | "application/xhtml+xml" => Some(DocumentFormat::Html),
        "text/xml" | "application/xml" => Some(DocumentFormat::Xml),
        "application/json" => Some(DocumentFormat::PlainText),
        value if value.starts_with("text/") => Some(DocumentFormat::PlainText),
        _ => None,
    }
}

fn sniff(bytes: &[u8]) -> FormatResolution {
    let window = &bytes[..bytes.len().min(SNIFF_WINDOW)];

    let pdf_head = &bytes[..bytes.len().min(PDF_HEADER_SLACK + 5)];
    if pdf_head.windows(5).any(|candidate| candidate == b"%PDF-") {
        return FormatResolution::Supported(DocumentFormat::Pdf);
    }
    if bytes.starts_with(ZIP_SIGNATURE) {
        return sniff_zip(bytes);
    }
    if bytes.starts_with(OLE_SIGNATURE) {
        return FormatResolution::Unsupported(
            "legacy or password-protected Office container".to_string(),
        );
    }
    if !looks_like_text(window) {
        return FormatResolution::Unsupported("binary content of unknown type".to_string());
    }

    let head = String::from_utf8_lossy(window)
        .trim_start_matches('\u{feff}')
        .trim_start()
        .to_ascii_lowercase();
    if head.starts_with("<!doctype html") || head.starts_with("<html") {
        return FormatResolution::Supported(DocumentFormat::Html);
    }
    if head.starts_with("<?xml") {
        let format = if head.contains("<html") {
            DocumentFormat::Html
        } else {
            DocumentFormat::Xml
        };
        return FormatResolution::Supported(format);
    }
    if head.starts_with('<')
        && ["<body", "<div", "<p>", "<p ", "<br", "<table", "<span"]
            .iter()
            .any(|tag| head.contains(tag))
    {
        return FormatResolution::Supported(DocumentFormat::Html);
    }
    FormatResolution::Supported(DocumentFormat::PlainText)
}

fn sniff_zip(bytes: &[u8]) -> FormatResolution {
    let Ok(archive) = zip::ZipArchive::new(Cursor::new(bytes)) else {
        return FormatResolution::Unsupported("unreadable zip archive".to_string());
    };
    let mut format = None;
    for name in archive.file_names() {
        format = match name {
            "word/document.xml" => Some(DocumentFormat::Word),
            "xl/workbook.xml" => Some(DocumentFormat::Spreadsheet),
            "ppt/presentation.xml" => Some(DocumentFormat::Presentation),
            _ => continue,
        };
        break;
    }
    match format {
        Some(format) => FormatResolution::Supported(format),
        None => FormatResolution::Unsupported("zip archives are not supported".to_string()),
    }
}

/// Text has no NUL bytes and almost no C0 control characters besides whitespace.
fn looks_like_text(window: &[u8]) -> bool {
    if window.contains(&0) {
        return false;
    }
    let control = window
        .iter()
        .filter(|byte| **byte < 0x20 && !matches!(**byte, b'\n' | b'\r' | b'\t' | 0x0C | 0x1B))
        .count();
    control * 100 <= window.len()
}
