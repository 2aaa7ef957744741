//! Instruction profiles for summary, reduction and combination calls.

use super::types::SummaryType;

/// Instruction for summarizing one chunk or a whole single-chunk document.
pub fn summary_instruction(summary_type: SummaryType) -> &'static str {
    match summary_type {
        SummaryType::Brief => "Summarize the following text briefly in 3-5 sentences:",
        SummaryType::Detailed => {
            "Summarize the following text in detail, including the main content and key points:"
        }
        SummaryType::Bullet => "Summarize the following text as bullet points:",
        SummaryType::Korean => {
            "다음 텍스트를 한국어로 요약해주세요. 주요 내용을 놓치지 않고 자연스럽게 요약하세요:"
        }
    }
}

/// Instruction for merging ordered chunk summaries of one document into one summary.
pub fn reduce_instruction(summary_type: SummaryType) -> String {
    format!(
        "The text below consists of summaries of consecutive parts of one document, in order. \
         Merge them into a single summary of the whole document without repeating points. {}",
        summary_instruction(summary_type)
    )
}

/// Instruction for the combined summary of an email body and its attachments.
pub fn combine_instruction(summary_type: SummaryType) -> String {
    format!(
        "The text below contains the summary of an email body followed by summaries of its \
         attachments. Write one overall summary of the email that connects the message with the \
         attached documents. {}",
        summary_instruction(summary_type)
    )
}

/// Input text for the combined call.
pub fn combined_input(body_summary: &str, attachments: &[(&str, &str)]) -> String {
    let mut text = format!("[Email body]\n{body_summary}");
    for (filename, summary) in attachments {
        text.push_str(&format!("\n\n[Attachment: {filename}]\n{summary}"));
    }
    text
}
