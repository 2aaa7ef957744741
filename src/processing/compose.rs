//! Final result assembly and compression statistics.

use super::engine::{ScopeOutcome, SourceOutcome, SourceSummary};
use super::tokens::TokenEstimator;
use super::types::{AttachmentReport, AttachmentSummary, PipelineError, SummaryResult};
use crate::extraction::SourceKind;

/// `round(100 * (1 - summary/original), 2)`, or `0` when `original` is zero.
pub fn compression_ratio(summary_tokens: usize, original_tokens: usize) -> f64 {
    if original_tokens == 0 {
        return 0.0;
    }
    let ratio = 100.0 * (1.0 - summary_tokens as f64 / original_tokens as f64);
    (ratio * 100.0).round() / 100.0
}

struct Measured<'a> {
    source: &'a SourceSummary,
    original_tokens: usize,
    summary_tokens: usize,
}

fn measure<'a>(source: &'a SourceSummary, estimator: &TokenEstimator) -> Measured<'a> {
    Measured {
        source,
        original_tokens: estimator.estimate(&source.original_text),
        summary_tokens: estimator.estimate(&source.summary),
    }
}

/// Assemble the caller-facing result from the engine's per-source outcomes.
///
/// Original and summary texts are re-measured with `estimator` so the reported counts use the
/// same tokenizer as chunking. Fails with [`PipelineError::RequestHasNoEligibleSource`] when no
/// source produced a summary.
pub fn compose(
    outcome: ScopeOutcome,
    estimator: &TokenEstimator,
) -> Result<SummaryResult, PipelineError> {
    let ScopeOutcome {
        body,
        attachments,
        combined_summary,
        combined_failure,
    } = outcome;

    let mut skipped = Vec::new();
    let mut body_measured = None;
    if let Some(body) = &body {
        match body {
            SourceOutcome::Done(summary) => body_measured = Some(measure(summary, estimator)),
            SourceOutcome::Failed(record) => skipped.push(record.clone()),
        }
    }

    let mut attachment_measured = Vec::new();
    for attachment in &attachments {
        match attachment {
            SourceOutcome::Done(summary) => attachment_measured.push(measure(summary, estimator)),
            SourceOutcome::Failed(record) => skipped.push(record.clone()),
        }
    }

    if body_measured.is_none() && attachment_measured.is_empty() {
        return Err(PipelineError::RequestHasNoEligibleSource { skipped });
    }

    let total_original_tokens = body_measured.iter().map(|m| m.original_tokens).sum::<usize>()
        + attachment_measured.iter().map(|m| m.original_tokens).sum::<usize>();
    let total_summary_tokens = body_measured.iter().map(|m| m.summary_tokens).sum::<usize>()
        + attachment_measured.iter().map(|m| m.summary_tokens).sum::<usize>();

    let attachment_summaries = attachment_measured
        .iter()
        .map(|m| AttachmentSummary {
            filename: display_name(m.source),
            summary: m.source.summary.clone(),
            original_tokens: m.original_tokens,
            summary_tokens: m.summary_tokens,
        })
        .collect::<Vec<_>>();

    // A combined summary needs both a body and an attachment summary.
    let combined_summary =
        combined_summary.filter(|_| body_measured.is_some() && !attachment_summaries.is_empty());

    Ok(SummaryResult {
        body_summary: body_measured.as_ref().map(|m| m.source.summary.clone()),
        body_original_tokens: body_measured.as_ref().map_or(0, |m| m.original_tokens),
        body_summary_tokens: body_measured.as_ref().map_or(0, |m| m.summary_tokens),
        attachment_summaries,
        combined_summary,
        total_original_tokens,
        total_summary_tokens,
        compression_ratio: compression_ratio(total_summary_tokens, total_original_tokens),
        skipped,
        combined_failure,
    })
}

/// Build the single-attachment report.
pub fn compose_attachment(
    outcome: SourceOutcome,
    estimator: &TokenEstimator,
) -> Result<AttachmentReport, PipelineError> {
    match outcome {
        SourceOutcome::Done(summary) => {
            let measured = measure(&summary, estimator);
            Ok(AttachmentReport {
                filename: display_name(&summary),
                summary: summary.summary.clone(),
                original_tokens: measured.original_tokens,
                summary_tokens: measured.summary_tokens,
                compression_ratio: compression_ratio(
                    measured.summary_tokens,
                    measured.original_tokens,
                ),
            })
        }
        SourceOutcome::Failed(record) => Err(PipelineError::RequestHasNoEligibleSource {
            skipped: vec![record],
        }),
    }
}

fn display_name(source: &SourceSummary) -> String {
    match (&source.filename, source.source_kind) {
        (Some(filename), _) => filename.clone(),
        (None, SourceKind::Body) => "body".to_string(),
        (None, SourceKind::Attachment) => source.source_id.clone(),
    }
}
