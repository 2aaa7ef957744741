//! WordprocessingML (`.docx`) extraction.
//!
//! Paragraphs are emitted in document order separated by blank lines. Tables are flattened
//! row-major: each row becomes one line with its cell texts joined by ` | `. Nested tables are
//! folded into the enclosing cell.

use quick_xml::events::Event;

use super::ooxml::{open_archive, read_entry, xml_failure};
use super::{ExtractResult, ExtractedText};

const CELL_DELIMITER: &str = " | ";

pub(crate) fn extract(bytes: &[u8]) -> ExtractResult {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    let blocks = collect_blocks(&xml)?;
    Ok(ExtractedText::new(blocks.join("\n\n"), None))
}

fn collect_blocks(xml: &[u8]) -> Result<Vec<String>, super::ExtractFailure> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut blocks = Vec::new();
    let mut paragraph = String::new();
    let mut cell = String::new();
    let mut row: Vec<String> = Vec::new();
    let mut table_depth = 0usize;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"tbl" => table_depth += 1,
                b"tr" if table_depth == 1 => row.clear(),
                b"tc" if table_depth == 1 => cell.clear(),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => paragraph.push('\t'),
                b"br" | b"cr" => paragraph.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(xml_failure)?;
                paragraph.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = paragraph.trim();
                    if !text.is_empty() {
                        if table_depth > 0 {
                            if !cell.is_empty() {
                                cell.push(' ');
                            }
                            cell.push_str(text);
                        } else {
                            blocks.push(text.to_string());
                        }
                    }
                    paragraph.clear();
                }
                b"tc" if table_depth == 1 => row.push(cell.trim().replace('\n', " ")),
                b"tr" if table_depth == 1 => {
                    if row.iter().any(|value| !value.is_empty()) {
                        blocks.push(row.join(CELL_DELIMITER));
                    }
                    row.clear();
                }
                b"tbl" => table_depth = table_depth.saturating_sub(1),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_failure(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(blocks)
}
