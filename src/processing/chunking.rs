//! Token-budgeted chunking that preserves read order.
//!
//! Text is packed greedily from the largest natural unit that fits:
//!
//! - Paragraphs (blank-line separated) are packed while the packed slice stays within budget.
//! - A paragraph over budget is split into sentences, which are packed the same way.
//! - A sentence still over budget is hard-split by `semchunk-rs`, which breaks on whitespace
//!   first and on characters only as a last resort.
//!
//! Chunks are slices of the input, so they never overlap and their concatenation reproduces the
//! input up to boundary whitespace.

use semchunk_rs::Chunker as SemanticSplitter;

use super::tokens::TokenEstimator;
use super::types::{ChunkingError, TextChunk};

const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '。', '！', '？'];

/// Byte range `[start, end)` into the chunked text.
type Span = (usize, usize);

/// Splits normalized text into ordered chunks that fit a token budget.
#[derive(Debug, Clone)]
pub struct Chunker {
    estimator: TokenEstimator,
}

impl Chunker {
    /// Build a chunker measuring with `estimator`.
    pub fn new(estimator: TokenEstimator) -> Self {
        Self { estimator }
    }

    /// Estimator used for budgets and reported counts.
    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    /// Chunk `text` so that each chunk estimates at most `max_tokens` tokens.
    ///
    /// Returns an empty vector when the input is empty or whitespace only.
    pub fn chunk(
        &self,
        document_ref: &str,
        text: &str,
        max_tokens: usize,
    ) -> Result<Vec<TextChunk>, ChunkingError> {
        if max_tokens == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut packer = Packer {
            text,
            budget: max_tokens,
            estimator: &self.estimator,
            current: None,
            pieces: Vec::new(),
        };
        for paragraph in paragraph_spans(text) {
            packer.push_paragraph(paragraph);
        }
        packer.flush();

        Ok(packer
            .pieces
            .into_iter()
            .enumerate()
            .map(|(sequence_index, text)| TextChunk {
                document_ref: document_ref.to_string(),
                sequence_index,
                approx_token_count: self.estimator.estimate(&text),
                text,
            })
            .collect())
    }
}

struct Packer<'a> {
    text: &'a str,
    budget: usize,
    estimator: &'a TokenEstimator,
    current: Option<Span>,
    pieces: Vec<String>,
}

impl Packer<'_> {
    fn fits(&self, (start, end): Span) -> bool {
        self.estimator.estimate(&self.text[start..end]) <= self.budget
    }

    fn push_paragraph(&mut self, paragraph: Span) {
        if self.fits(paragraph) {
            self.pack(paragraph);
            return;
        }
        for sentence in sentence_spans(self.text, paragraph) {
            if self.fits(sentence) {
                self.pack(sentence);
            } else {
                self.flush();
                self.hard_split(sentence);
            }
        }
    }

    fn pack(&mut self, span: Span) {
        let current = self.current;
        match current {
            None => self.current = Some(span),
            Some((start, _)) if self.fits((start, span.1)) => self.current = Some((start, span.1)),
            Some(_) => {
                self.flush();
                self.current = Some(span);
            }
        }
    }

    fn flush(&mut self) {
        if let Some((start, end)) = self.current.take() {
            self.pieces.push(self.text[start..end].to_string());
        }
    }

    fn hard_split(&mut self, (start, end): Span) {
        let counter = self.estimator.counter();
        let splitter = SemanticSplitter::new(
            self.budget,
            Box::new(move |segment: &str| counter.as_ref()(segment)),
        );
        let pieces = splitter.chunk(&self.text[start..end]);
        tracing::trace!(
            bytes = end - start,
            pieces = pieces.len(),
            "Hard-split sentence over budget"
        );
        self.pieces.extend(
            pieces
                .into_iter()
                .filter(|piece| !piece.trim().is_empty()),
        );
    }
}

/// Spans of blank-line separated paragraphs, trimmed of surrounding whitespace.
fn paragraph_spans(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    let mut end = 0;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        if line.trim().is_empty() {
            if let Some(paragraph_start) = start.take() {
                spans.push((paragraph_start, end));
            }
            continue;
        }
        if start.is_none() {
            start = Some(line_start + (line.len() - line.trim_start().len()));
        }
        end = line_start + line.trim_end().len();
    }
    if let Some(paragraph_start) = start {
        spans.push((paragraph_start, end));
    }
    spans
}

/// Sentence spans inside `paragraph`. A sentence ends at a terminator followed by whitespace.
fn sentence_spans(text: &str, (offset, paragraph_end): Span) -> Vec<Span> {
    let slice = &text[offset..paragraph_end];
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = slice.char_indices().peekable();

    while let Some((index, ch)) = chars.next() {
        if !SENTENCE_TERMINATORS.contains(&ch) {
            continue;
        }
        if !chars.peek().is_some_and(|(_, next)| next.is_whitespace()) {
            continue;
        }
        spans.push((offset + start, offset + index + ch.len_utf8()));
        start = slice.len();
        while let Some(&(next_index, next)) = chars.peek() {
            if !next.is_whitespace() {
                start = next_index;
                break;
            }
            chars.next();
        }
    }
    if start < slice.len() {
        spans.push((offset + start, paragraph_end));
    }
    spans
}
