//! Fixture builders shared by the integration tests.
#![allow(dead_code)]

use std::io::{Cursor, Write};

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const S_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const R_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const A_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const P_NS: &str = "http://schemas.openxmlformats.org/presentationml/2006/main";
const PKG_REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

/// ZIP package with the given entries, in order.
pub fn zip_package(entries: &[(&str, String)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
        for (name, contents) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .expect("start entry");
            zip.write_all(contents.as_bytes()).expect("write entry");
        }
        zip.finish().expect("finish zip");
    }
    buf
}

/// `.docx` with one paragraph per item.
pub fn docx(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{p}</w:t></w:r></w:p>"))
        .collect();
    zip_package(&[(
        "word/document.xml",
        format!(
            r#"<?xml version="1.0"?><w:document xmlns:w="{W_NS}"><w:body>{body}</w:body></w:document>"#
        ),
    )])
}

/// `.xlsx` with one sheet named `Budget` holding inline-string rows.
pub fn xlsx<R: AsRef<[&'static str]>>(rows: &[R]) -> Vec<u8> {
    let rows: Vec<Vec<&str>> = rows.iter().map(|row| row.as_ref().to_vec()).collect();
    xlsx_sheets(&[("Budget", rows)])
}

/// `.xlsx` with the given named sheets, in workbook order.
pub fn xlsx_sheets(sheets: &[(&str, Vec<Vec<&str>>)]) -> Vec<u8> {
    let mut workbook_sheets = String::new();
    let mut rels = String::new();
    let mut entries = Vec::new();
    for (index, (name, rows)) in sheets.iter().enumerate() {
        let number = index + 1;
        workbook_sheets.push_str(&format!(
            r#"<sheet name="{name}" sheetId="{number}" r:id="rId{number}"/>"#
        ));
        rels.push_str(&format!(
            r#"<Relationship Id="rId{number}" Target="worksheets/sheet{number}.xml"/>"#
        ));
        entries.push((
            format!("xl/worksheets/sheet{number}.xml"),
            format!(
                r#"<?xml version="1.0"?><worksheet xmlns="{S_NS}"><sheetData>{}</sheetData></worksheet>"#,
                sheet_rows(rows)
            ),
        ));
    }

    let mut package = vec![
        (
            "xl/workbook.xml".to_string(),
            format!(
                r#"<?xml version="1.0"?><workbook xmlns="{S_NS}" xmlns:r="{R_NS}"><sheets>{workbook_sheets}</sheets></workbook>"#
            ),
        ),
        (
            "xl/_rels/workbook.xml.rels".to_string(),
            format!(r#"<?xml version="1.0"?><Relationships xmlns="{PKG_REL_NS}">{rels}</Relationships>"#),
        ),
    ];
    package.extend(entries);
    let borrowed: Vec<(&str, String)> = package
        .iter()
        .map(|(name, xml)| (name.as_str(), xml.clone()))
        .collect();
    zip_package(&borrowed)
}

fn sheet_rows(rows: &[Vec<&str>]) -> String {
    rows.iter()
        .enumerate()
        .map(|(r, cells)| {
            let cells: String = cells
                .iter()
                .enumerate()
                .map(|(c, value)| {
                    let column = (b'A' + c as u8) as char;
                    format!(
                        r#"<c r="{column}{row}" t="inlineStr"><is><t>{value}</t></is></c>"#,
                        row = r + 1
                    )
                })
                .collect();
            format!(r#"<row r="{}">{cells}</row>"#, r + 1)
        })
        .collect()
}

/// `.pptx` with one text paragraph per slide, numbered in deck order.
pub fn pptx(slides: &[&str]) -> Vec<u8> {
    let order: Vec<usize> = (0..slides.len()).collect();
    pptx_deck(slides, &order)
}

/// `.pptx` whose `slideN.xml` parts hold `slides[N - 1]`, shown in the deck in `order`
/// (zero-based part indices). Empty strings produce slides without text.
pub fn pptx_deck(slides: &[&str], order: &[usize]) -> Vec<u8> {
    let mut package: Vec<(String, String)> = slides
        .iter()
        .enumerate()
        .map(|(index, text)| {
            let body = if text.is_empty() {
                String::new()
            } else {
                format!(
                    r#"<p:sp><p:txBody><a:p><a:r><a:t>{text}</a:t></a:r></a:p></p:txBody></p:sp>"#
                )
            };
            (
                format!("ppt/slides/slide{}.xml", index + 1),
                format!(
                    r#"<?xml version="1.0"?><p:sld xmlns:p="{P_NS}" xmlns:a="{A_NS}"><p:cSld><p:spTree>{body}</p:spTree></p:cSld></p:sld>"#
                ),
            )
        })
        .collect();

    let slide_ids: String = order
        .iter()
        .enumerate()
        .map(|(position, part)| {
            format!(
                r#"<p:sldId id="{}" r:id="rId{}"/>"#,
                256 + position,
                part + 1
            )
        })
        .collect();
    let rels: String = (0..slides.len())
        .map(|part| {
            format!(
                r#"<Relationship Id="rId{n}" Target="slides/slide{n}.xml"/>"#,
                n = part + 1
            )
        })
        .collect();
    package.push((
        "ppt/presentation.xml".to_string(),
        format!(
            r#"<?xml version="1.0"?><p:presentation xmlns:p="{P_NS}" xmlns:r="{R_NS}"><p:sldIdLst>{slide_ids}</p:sldIdLst></p:presentation>"#
        ),
    ));
    package.push((
        "ppt/_rels/presentation.xml.rels".to_string(),
        format!(r#"<?xml version="1.0"?><Relationships xmlns="{PKG_REL_NS}">{rels}</Relationships>"#),
    ));

    let borrowed: Vec<(&str, String)> = package
        .iter()
        .map(|(name, xml)| (name.as_str(), xml.clone()))
        .collect();
    zip_package(&borrowed)
}

/// Single-page PDF showing `text` in a standard font.
pub fn pdf(text: &str) -> Vec<u8> {
    pdf_pages(&[text])
}

/// PDF with one page per entry, each showing its text in a standard font.
pub fn pdf_pages(texts: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });
    let mut kids: Vec<Object> = Vec::new();
    for text in texts {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode content"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }
    let pages = dictionary! {
        "Type" => "Pages",
        "Count" => kids.len() as i64,
        "Kids" => kids,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).expect("save pdf");
    buf
}

/// `count` space-separated words.
pub fn words(count: usize) -> String {
    vec!["word"; count].join(" ")
}
