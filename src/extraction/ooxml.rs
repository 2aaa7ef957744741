//! Shared ZIP and XML helpers for the OOXML extractors.

use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use zip::ZipArchive;
use zip::result::ZipError;

use super::ExtractFailure;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
pub(crate) const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

pub(crate) type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

pub(crate) fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractFailure> {
    ZipArchive::new(Cursor::new(bytes)).map_err(zip_failure)
}

/// Read an entry, failing when it is missing or larger than [`MAX_XML_ENTRY_BYTES`].
pub(crate) fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractFailure> {
    read_optional_entry(archive, name)?
        .ok_or_else(|| ExtractFailure::Corrupted(format!("{name} not found in package")))
}

/// Read an entry that a valid package may legitimately omit.
pub(crate) fn read_optional_entry(
    archive: &mut Archive<'_>,
    name: &str,
) -> Result<Option<Vec<u8>>, ExtractFailure> {
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(error) => return Err(zip_failure(error)),
    };
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractFailure::Corrupted(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractFailure::Corrupted(format!(
            "ZIP entry {name} exceeds size limit ({MAX_XML_ENTRY_BYTES} bytes)"
        )));
    }
    Ok(Some(out))
}

/// List `{prefix}{n}{suffix}` parts sorted by their numeric index.
pub(crate) fn numbered_parts(archive: &Archive<'_>, prefix: &str, suffix: &str) -> Vec<String> {
    let mut names: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let index = name
                .strip_prefix(prefix)?
                .strip_suffix(suffix)?
                .parse::<u32>()
                .ok()?;
            Some((index, name.to_string()))
        })
        .collect();
    names.sort_by_key(|(index, _)| *index);
    names.into_iter().map(|(_, name)| name).collect()
}

/// Look up an attribute by local name, ignoring any namespace prefix.
pub(crate) fn attribute(element: &BytesStart<'_>, local_name: &[u8]) -> Option<String> {
    element
        .attributes()
        .filter_map(Result::ok)
        .find(|attr| attr.key.local_name().as_ref() == local_name)
        .and_then(|attr| attr.unescape_value().ok().map(|value| value.into_owned()))
}

/// The namespaced `r:id` attribute, distinct from a bare `id`.
pub(crate) fn relationship_id(element: &BytesStart<'_>) -> Option<String> {
    element
        .attributes()
        .filter_map(Result::ok)
        .find(|attr| attr.key.prefix().is_some() && attr.key.local_name().as_ref() == b"id")
        .and_then(|attr| attr.unescape_value().ok().map(|value| value.into_owned()))
}

/// Resolve a relationship target against the directory of the part that owns it.
pub(crate) fn part_path(base_dir: &str, target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("{base_dir}/{target}"),
    }
}

/// Parse a relationships part into an `Id -> Target` map.
pub(crate) fn relationships(xml: &[u8]) -> Result<HashMap<String, String>, ExtractFailure> {
    let mut map = HashMap::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (attribute(&e, b"Id"), attribute(&e, b"Target"))
                {
                    map.insert(id, target);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_failure(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(map)
}

pub(crate) fn xml_failure(error: quick_xml::Error) -> ExtractFailure {
    ExtractFailure::Corrupted(format!("malformed XML: {error}"))
}

fn zip_failure(error: ZipError) -> ExtractFailure {
    let message = error.to_string();
    if message.to_ascii_lowercase().contains("password") {
        ExtractFailure::Encrypted(message)
    } else {
        ExtractFailure::Corrupted(format!("unreadable package: {message}"))
    }
}
