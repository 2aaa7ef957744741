/// Normalize extracted text into the canonical form every extractor returns.
///
/// - CRLF and bare CR become LF.
/// - Control characters other than tab are removed.
/// - Trailing whitespace is trimmed per line.
/// - Runs of blank lines collapse to a single blank line.
/// - Leading and trailing whitespace of the whole text is removed.
pub fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(unified.len());
    let mut pending_blank = false;

    for line in unified.split('\n') {
        let cleaned: String = line
            .chars()
            .filter(|c| *c == '\t' || !c.is_control())
            .collect();
        let cleaned = cleaned.trim_end();
        if cleaned.trim().is_empty() {
            pending_blank = !out.is_empty();
            continue;
        }
        if out.is_empty() {
            out.push_str(cleaned.trim_start());
        } else {
            out.push('\n');
            if pending_blank {
                out.push('\n');
            }
            out.push_str(cleaned);
        }
        pending_blank = false;
    }

    out
}
