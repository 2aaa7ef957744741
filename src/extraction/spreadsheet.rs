//! SpreadsheetML (`.xlsx`) extraction.
//!
//! Each sheet becomes a `[Sheet: name]` header followed by its rows, one line per row with cells
//! joined by tabs. Sheets follow workbook order and sheets without values are left out; cells
//! skipped in the XML (sparse rows) become empty columns so values stay aligned.

use quick_xml::events::Event;

use super::ooxml::{
    Archive, attribute, numbered_parts, open_archive, part_path, read_entry, read_optional_entry,
    relationship_id, relationships, xml_failure,
};
use super::{ExtractFailure, ExtractResult, ExtractedText};

const MAX_SHEETS: usize = 100;
const MAX_CELLS: usize = 100_000;
/// Columns in a worksheet (`A` through `XFD`).
const MAX_COLUMNS: usize = 16_384;

struct SheetRef {
    name: String,
    path: String,
}

pub(crate) fn extract(bytes: &[u8]) -> ExtractResult {
    let mut archive = open_archive(bytes)?;
    let shared = match read_optional_entry(&mut archive, "xl/sharedStrings.xml")? {
        Some(xml) => shared_strings(&xml)?,
        None => Vec::new(),
    };
    let sheets = sheet_refs(&mut archive)?;

    let mut cells_seen = 0usize;
    let mut blocks = Vec::new();
    for sheet in sheets.iter().take(MAX_SHEETS) {
        let xml = read_entry(&mut archive, &sheet.path)?;
        let rows = sheet_rows(&xml, &shared, &mut cells_seen)?;
        if !rows.is_empty() {
            let mut block = format!("[Sheet: {}]", sheet.name);
            for row in rows {
                block.push('\n');
                block.push_str(&row);
            }
            blocks.push(block);
        }
        if cells_seen >= MAX_CELLS {
            tracing::warn!(limit = MAX_CELLS, "Spreadsheet cell limit reached; truncating");
            break;
        }
    }
    if sheets.len() > MAX_SHEETS {
        tracing::warn!(sheets = sheets.len(), limit = MAX_SHEETS, "Spreadsheet sheet limit reached");
    }

    Ok(ExtractedText::new(blocks.join("\n\n"), Some(sheets.len())))
}

/// Resolve sheet names and part paths from the workbook and its relationships.
///
/// Falls back to numbered `sheetN.xml` parts when the workbook cannot be mapped.
fn sheet_refs(archive: &mut Archive<'_>) -> Result<Vec<SheetRef>, ExtractFailure> {
    let workbook = read_entry(archive, "xl/workbook.xml")?;
    let rels = match read_optional_entry(archive, "xl/_rels/workbook.xml.rels")? {
        Some(xml) => relationships(&xml)?,
        None => Default::default(),
    };

    let mut reader = quick_xml::Reader::from_reader(workbook.as_slice());
    let mut buf = Vec::new();
    let mut refs = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                let name = attribute(&e, b"name").unwrap_or_default();
                let target = relationship_id(&e).and_then(|id| rels.get(&id).cloned());
                if let Some(target) = target {
                    refs.push(SheetRef {
                        name,
                        path: part_path("xl", &target),
                    });
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_failure(e)),
            _ => {}
        }
        buf.clear();
    }

    if refs.is_empty() {
        refs = numbered_parts(archive, "xl/worksheets/sheet", ".xml")
            .into_iter()
            .enumerate()
            .map(|(index, path)| SheetRef {
                name: format!("Sheet{}", index + 1),
                path,
            })
            .collect();
    }
    Ok(refs)
}

fn shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractFailure> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut in_phonetic = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"rPh" => in_phonetic = true,
                b"t" if !in_phonetic => in_text = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                current.push_str(&te.unescape().map_err(xml_failure)?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"rPh" => in_phonetic = false,
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_failure(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

#[derive(Default)]
struct CellState {
    column: Option<usize>,
    kind: Option<String>,
    value: String,
}

fn sheet_rows(
    xml: &[u8],
    shared: &[String],
    cells_seen: &mut usize,
) -> Result<Vec<String>, ExtractFailure> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell = CellState::default();
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    let column = match attribute(&e, b"r") {
                        Some(reference) => column_index(&reference)?,
                        None => None,
                    };
                    cell = CellState {
                        column,
                        kind: attribute(&e, b"t"),
                        value: String::new(),
                    };
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"row" => row.clear(),
            Ok(Event::Text(te)) if in_value => {
                cell.value.push_str(&te.unescape().map_err(xml_failure)?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    *cells_seen += 1;
                    let value = cell_text(&cell, shared);
                    // Padding counts toward the cell limit.
                    if let Some(column) = cell.column.filter(|column| *column > row.len()) {
                        *cells_seen += column - row.len();
                        row.resize(column, String::new());
                    }
                    row.push(value);
                    if *cells_seen >= MAX_CELLS {
                        push_row(&mut rows, &row);
                        return Ok(rows);
                    }
                }
                b"row" => push_row(&mut rows, &row),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_failure(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

fn push_row(rows: &mut Vec<String>, row: &[String]) {
    let last = row.iter().rposition(|value| !value.trim().is_empty());
    if let Some(last) = last {
        rows.push(row[..=last].join("\t"));
    }
}

fn cell_text(cell: &CellState, shared: &[String]) -> String {
    let raw = cell.value.trim();
    match cell.kind.as_deref() {
        Some("s") => raw
            .parse::<usize>()
            .ok()
            .and_then(|index| shared.get(index))
            .cloned()
            .unwrap_or_default(),
        Some("b") => match raw {
            "1" => "TRUE".to_string(),
            "0" => "FALSE".to_string(),
            other => other.to_string(),
        },
        Some("inlineStr") => cell.value.clone(),
        _ => raw.to_string(),
    }
}

/// Zero-based column index of an A1-style reference (`C7` -> 2).
///
/// References without column letters yield `None`; columns past `XFD` are corrupt input.
fn column_index(reference: &str) -> Result<Option<usize>, ExtractFailure> {
    let mut index = 0usize;
    let mut letters = 0usize;
    for letter in reference.bytes().take_while(u8::is_ascii_alphabetic) {
        letters += 1;
        let digit = usize::from(letter.to_ascii_uppercase() - b'A' + 1);
        index = index
            .checked_mul(26)
            .and_then(|value| value.checked_add(digit))
            .filter(|value| *value <= MAX_COLUMNS)
            .ok_or_else(|| {
                ExtractFailure::Corrupted(format!("cell reference {reference} is out of range"))
            })?;
    }
    if letters == 0 {
        return Ok(None);
    }
    Ok(Some(index - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_references_map_to_indices() {
        assert_eq!(column_index("A1").expect("A1"), Some(0));
        assert_eq!(column_index("c7").expect("c7"), Some(2));
        assert_eq!(column_index("AA10").expect("AA10"), Some(26));
        assert_eq!(column_index("XFD1").expect("XFD1"), Some(MAX_COLUMNS - 1));
        assert_eq!(column_index("12").expect("12"), None);
    }

    #[test]
    fn columns_past_the_sheet_edge_are_corrupt() {
        for reference in ["XFE1", "ZZZZZ1", "ZZZZZZZZZZZZZZZZ1"] {
            assert!(
                matches!(column_index(reference), Err(ExtractFailure::Corrupted(_))),
                "{reference} should be rejected"
            );
        }
        let xml = br#"<worksheet><sheetData><row r="1"><c r="ZZZZZ1"><v>1</v></c></row></sheetData></worksheet>"#;
        let mut seen = 0;
        assert!(matches!(
            sheet_rows(xml, &[], &mut seen),
            Err(ExtractFailure::Corrupted(_))
        ));
    }

    #[test]
    fn shared_strings_skip_phonetic_runs() {
        let xml = br#"<sst><si><t>Plain</t></si><si><r><t>Ri</t></r><r><t>ch</t></r><rPh><t>x</t></rPh></si></sst>"#;
        assert_eq!(shared_strings(xml).expect("strings"), vec!["Plain", "Rich"]);
    }

    #[test]
    fn rows_keep_sparse_columns_aligned() {
        let shared = vec!["Name".to_string(), "Alice".to_string()];
        let xml = br#"<worksheet><sheetData>
            <row r="1"><c r="A1" t="s"><v>0</v></c><c r="C1" t="str"><v>Total</v></c></row>
            <row r="2"><c r="A2" t="s"><v>1</v></c><c r="B2" t="b"><v>1</v></c><c r="C2"><v>42.5</v></c></row>
            <row r="3"><c r="A3" t="inlineStr"><is><t>Bob</t></is></c></row>
        </sheetData></worksheet>"#;
        let mut seen = 0;
        let rows = sheet_rows(xml, &shared, &mut seen).expect("rows");
        assert_eq!(rows, vec!["Name\t\tTotal", "Alice\tTRUE\t42.5", "Bob"]);
        assert_eq!(seen, 6);
    }
}
