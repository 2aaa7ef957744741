//! PDF extraction backed by `pdf-extract`.
//!
//! Text is read page by page and each page is labelled so summaries can refer to it.

use std::panic::{AssertUnwindSafe, catch_unwind};

use super::{ExtractFailure, ExtractResult, ExtractedText};

const ENCRYPT_MARKER: &[u8] = b"/Encrypt";

pub(crate) fn extract(bytes: &[u8]) -> ExtractResult {
    if is_encrypted(bytes) {
        return Err(ExtractFailure::Encrypted(
            "PDF is encrypted or password protected".to_string(),
        ));
    }

    // The parser panics on some malformed inputs instead of returning an error.
    let parsed = catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }));
    let pages = match parsed {
        Ok(Ok(pages)) => pages,
        Ok(Err(error)) => {
            let message = error.to_string();
            if message.to_ascii_lowercase().contains("encrypt") {
                return Err(ExtractFailure::Encrypted(message));
            }
            return Err(ExtractFailure::Corrupted(format!("unreadable PDF: {message}")));
        }
        Err(_) => {
            return Err(ExtractFailure::Corrupted(
                "PDF parser aborted on malformed input".to_string(),
            ));
        }
    };

    let text = label_pages(&pages);
    Ok(ExtractedText::new(text, Some(pages.len())))
}

fn is_encrypted(bytes: &[u8]) -> bool {
    bytes
        .windows(ENCRYPT_MARKER.len())
        .any(|window| window == ENCRYPT_MARKER)
}

/// Prefix each non-empty page with a `--- Page N ---` marker.
///
/// Single-page documents are returned without a marker.
fn label_pages<S: AsRef<str>>(pages: &[S]) -> String {
    if pages.len() <= 1 {
        return pages
            .first()
            .map(|page| page.as_ref().trim().to_string())
            .unwrap_or_default();
    }
    pages
        .iter()
        .enumerate()
        .map(|(index, page)| (index, page.as_ref().trim()))
        .filter(|(_, page)| !page.is_empty())
        .map(|(index, page)| format!("--- Page {} ---\n{page}", index + 1))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_are_labelled_in_order() {
        let text = label_pages(&["first page\n", "second page"]);
        assert_eq!(text, "--- Page 1 ---\nfirst page\n\n--- Page 2 ---\nsecond page");
    }

    #[test]
    fn blank_pages_keep_their_numbering() {
        let text = label_pages(&["cover", " \n", "appendix"]);
        assert!(text.contains("--- Page 3 ---\nappendix"));
        assert!(!text.contains("--- Page 2 ---"));
    }

    #[test]
    fn single_page_has_no_marker() {
        assert_eq!(label_pages(&["only page\n"]), "only page");
        assert_eq!(label_pages::<&str>(&[]), "");
    }

    #[test]
    fn encrypt_dictionary_is_reported() {
        let bytes = b"%PDF-1.6\n1 0 obj << /Encrypt 5 0 R >> endobj\n";
        assert!(matches!(extract(bytes), Err(ExtractFailure::Encrypted(_))));
    }

    #[test]
    fn garbage_is_corrupted() {
        assert!(matches!(
            extract(b"%PDF-1.4 this is not a pdf"),
            Err(ExtractFailure::Corrupted(_))
        ));
    }
}
