//! PresentationML (`.pptx`) extraction: one `[Slide N]` block per slide with text, in deck order.

use quick_xml::events::Event;

use super::ooxml::{
    Archive, numbered_parts, open_archive, part_path, read_entry, read_optional_entry,
    relationship_id, relationships, xml_failure,
};
use super::{ExtractFailure, ExtractResult, ExtractedText};

pub(crate) fn extract(bytes: &[u8]) -> ExtractResult {
    let mut archive = open_archive(bytes)?;
    let slides = slide_parts(&mut archive)?;
    if slides.is_empty() {
        return Err(ExtractFailure::Corrupted(
            "presentation has no slide parts".to_string(),
        ));
    }

    let mut blocks = Vec::with_capacity(slides.len());
    for (index, name) in slides.iter().enumerate() {
        let xml = read_entry(&mut archive, name)?;
        let paragraphs = slide_paragraphs(&xml)?;
        if paragraphs.is_empty() {
            continue;
        }
        let mut block = format!("[Slide {}]", index + 1);
        for paragraph in paragraphs {
            block.push('\n');
            block.push_str(&paragraph);
        }
        blocks.push(block);
    }

    Ok(ExtractedText::new(blocks.join("\n\n"), Some(slides.len())))
}

/// Slide part paths in the order of the deck's `sldIdLst`.
///
/// Falls back to numbered `slideN.xml` parts when the presentation part cannot be mapped.
fn slide_parts(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractFailure> {
    let mut parts = Vec::new();
    if let Some(presentation) = read_optional_entry(archive, "ppt/presentation.xml")? {
        let rels = match read_optional_entry(archive, "ppt/_rels/presentation.xml.rels")? {
            Some(xml) => relationships(&xml)?,
            None => Default::default(),
        };
        let mut reader = quick_xml::Reader::from_reader(presentation.as_slice());
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) | Ok(Event::Empty(e))
                    if e.local_name().as_ref() == b"sldId" =>
                {
                    if let Some(target) = relationship_id(&e).and_then(|id| rels.get(&id)) {
                        let path = part_path("ppt", target);
                        if archive.index_for_name(&path).is_some() {
                            parts.push(path);
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(xml_failure(e)),
                _ => {}
            }
            buf.clear();
        }
    }

    if parts.is_empty() {
        parts = numbered_parts(archive, "ppt/slides/slide", ".xml");
    }
    Ok(parts)
}

fn slide_paragraphs(xml: &[u8]) -> Result<Vec<String>, ExtractFailure> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"br" => current.push('\n'),
            Ok(Event::Text(te)) if in_text => {
                current.push_str(&te.unescape().map_err(xml_failure)?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = current.trim();
                    if !text.is_empty() {
                        paragraphs.push(text.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_failure(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs)
}
