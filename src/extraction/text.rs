//! Plain text, HTML and XML extraction.
//!
//! Bytes are decoded with the first encoding that fits: a byte-order mark, a charset declared in
//! the markup, strict UTF-8, EUC-KR, and finally Windows-1252, which accepts any byte sequence.

use std::borrow::Cow;
use std::sync::OnceLock;

use encoding_rs::{EUC_KR, Encoding, UTF_8, WINDOWS_1252};
use quick_xml::events::Event;
use regex::Regex;
use scraper::{ElementRef, Html, Node};

use super::ooxml::xml_failure;
use super::{ExtractResult, ExtractedText};

const CHARSET_WINDOW: usize = 2048;

/// Elements whose content is never visible.
const HIDDEN_ELEMENTS: &[&str] = &[
    "script", "style", "head", "noscript", "template", "title", "iframe", "object", "svg",
];

/// Elements rendered as their own paragraph.
const PARAGRAPH_ELEMENTS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "pre", "table", "ul", "ol", "dl",
    "hr", "section", "article", "header", "footer",
];

/// Elements that start a new line.
const LINE_ELEMENTS: &[&str] = &[
    "div", "li", "tr", "dt", "dd", "address", "figure", "figcaption", "form", "fieldset",
    "main", "nav", "aside", "caption",
];

pub(crate) fn extract_plain(bytes: &[u8]) -> ExtractResult {
    Ok(ExtractedText::new(decode(bytes, false).into_owned(), None))
}

pub(crate) fn extract_html(bytes: &[u8]) -> ExtractResult {
    let source = decode(bytes, true);
    let document = Html::parse_document(&source);
    let mut out = String::new();
    walk(document.root_element(), &mut out, false);
    Ok(ExtractedText::new(out, None))
}

pub(crate) fn extract_xml(bytes: &[u8]) -> ExtractResult {
    let source = decode(bytes, true);
    let mut reader = quick_xml::Reader::from_str(&source);
    let mut buf = Vec::new();
    let mut lines = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Text(te)) => {
                let text = te
                    .unescape()
                    .map(Cow::into_owned)
                    .unwrap_or_else(|_| String::from_utf8_lossy(&te).into_owned());
                push_line(&mut lines, &text);
            }
            Ok(Event::CData(data)) => {
                push_line(&mut lines, &String::from_utf8_lossy(&data.into_inner()));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_failure(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(ExtractedText::new(lines.join("\n"), None))
}

fn push_line(lines: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        lines.push(trimmed.to_string());
    }
}

/// Decode bytes to text. Markup may declare its own charset, which is honoured when
/// `markup` is set.
pub(crate) fn decode(bytes: &[u8], markup: bool) -> Cow<'_, str> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return text;
    }

    if markup {
        if let Some(encoding) = declared_charset(bytes).filter(|encoding| *encoding != UTF_8) {
            let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
            if !had_errors {
                return text;
            }
        }
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return Cow::Borrowed(text);
    }

    let (text, had_errors) = EUC_KR.decode_without_bom_handling(bytes);
    if !had_errors {
        return text;
    }

    let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
    text
}

fn declared_charset(bytes: &[u8]) -> Option<&'static Encoding> {
    static CHARSET: OnceLock<Regex> = OnceLock::new();
    let pattern = CHARSET.get_or_init(|| {
        Regex::new(r#"(?i)(?:charset|encoding)\s*=\s*["']?([A-Za-z0-9_.:\-]+)"#)
            .expect("static charset pattern must compile")
    });
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(CHARSET_WINDOW)]);
    let label = pattern.captures(&head)?.get(1)?.as_str().to_string();
    Encoding::for_label(label.as_bytes())
}

fn walk(element: ElementRef<'_>, out: &mut String, preformatted: bool) {
    let name = element.value().name();
    if HIDDEN_ELEMENTS.contains(&name) {
        return;
    }
    let paragraph = PARAGRAPH_ELEMENTS.contains(&name);
    let line = LINE_ELEMENTS.contains(&name);
    let preformatted = preformatted || name == "pre";

    if paragraph {
        break_paragraph(out);
    } else if line {
        break_line(out);
    }

    for child in element.children() {
        match child.value() {
            Node::Text(text) => push_text(out, text, preformatted),
            Node::Element(child_element) => match child_element.name() {
                "br" => out.push('\n'),
                "td" | "th" => {
                    if let Some(cell) = ElementRef::wrap(child) {
                        if !out.ends_with('\n') && !out.is_empty() {
                            out.push_str(" | ");
                        }
                        walk(cell, out, preformatted);
                    }
                }
                _ => {
                    if let Some(nested) = ElementRef::wrap(child) {
                        walk(nested, out, preformatted);
                    }
                }
            },
            _ => {}
        }
    }

    if paragraph {
        break_paragraph(out);
    } else if line {
        break_line(out);
    }
}

fn push_text(out: &mut String, text: &str, preformatted: bool) {
    if preformatted {
        out.push_str(text);
        return;
    }
    let at_line_start = out.is_empty() || out.ends_with('\n');
    let mut collapsed = String::with_capacity(text.len());
    let leading_space = text.starts_with(char::is_whitespace) && !at_line_start;
    for (index, word) in text.split_whitespace().enumerate() {
        if index > 0 || (leading_space && !out.ends_with(' ')) {
            collapsed.push(' ');
        }
        collapsed.push_str(word);
    }
    if collapsed.is_empty() {
        if !at_line_start && !text.is_empty() && !out.ends_with(' ') {
            out.push(' ');
        }
        return;
    }
    if text.ends_with(char::is_whitespace) {
        collapsed.push(' ');
    }
    out.push_str(&collapsed);
}

fn break_line(out: &mut String) {
    trim_trailing_spaces(out);
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

fn break_paragraph(out: &mut String) {
    break_line(out);
    if !out.is_empty() && !out.ends_with("\n\n") {
        out.push('\n');
    }
}

fn trim_trailing_spaces(out: &mut String) {
    let kept = out.trim_end_matches([' ', '\t']).len();
    out.truncate(kept);
}
