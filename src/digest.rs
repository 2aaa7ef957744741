//! Plain-text digest suitable as a reply body.

use std::fmt::Write as _;

use crate::mailbox::MailboxMessage;
use crate::processing::SummaryResult;

/// Header lines of the message a digest answers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestHeader {
    /// Subject of the original message.
    pub subject: Option<String>,
    /// Sender of the original message.
    pub sender: Option<String>,
}

impl From<&MailboxMessage> for DigestHeader {
    fn from(message: &MailboxMessage) -> Self {
        Self {
            subject: message.subject.clone(),
            sender: message.sender.clone(),
        }
    }
}

/// Render a summary result as a plain-text reply body.
///
/// Sections appear only when they have content: the body summary, numbered attachment
/// summaries, the overall summary, skipped sources, then one line of token statistics.
pub fn render_digest(header: &DigestHeader, result: &SummaryResult) -> String {
    let mut out = String::new();

    if let Some(subject) = non_blank(header.subject.as_deref()) {
        let _ = writeln!(out, "Re: {subject}");
    }
    if let Some(sender) = non_blank(header.sender.as_deref()) {
        let _ = writeln!(out, "To: {sender}");
    }
    if !out.is_empty() {
        out.push('\n');
    }

    if let Some(body) = &result.body_summary {
        section(&mut out, "Email summary");
        let _ = writeln!(out, "{}\n", body.trim());
    }

    if !result.attachment_summaries.is_empty() {
        section(&mut out, "Attachment summaries");
        for (position, attachment) in result.attachment_summaries.iter().enumerate() {
            let _ = writeln!(
                out,
                "[{}] {} ({} -> {} tokens)\n{}\n",
                position + 1,
                attachment.filename,
                attachment.original_tokens,
                attachment.summary_tokens,
                attachment.summary.trim()
            );
        }
    }

    if let Some(combined) = &result.combined_summary {
        section(&mut out, "Overall summary");
        let _ = writeln!(out, "{}\n", combined.trim());
    }

    if !result.skipped.is_empty() {
        section(&mut out, "Skipped");
        for skipped in &result.skipped {
            let name = skipped.filename.as_deref().unwrap_or(&skipped.source_id);
            let _ = writeln!(out, "- {name}: {} ({})", skipped.failure, skipped.reason);
        }
        out.push('\n');
    }

    let _ = write!(
        out,
        "Tokens: {} -> {} ({:.2}% reduction)",
        result.total_original_tokens, result.total_summary_tokens, result.compression_ratio
    );
    out
}

fn section(out: &mut String, title: &str) {
    let _ = writeln!(out, "== {title} ==");
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
