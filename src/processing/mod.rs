//! Summarization pipeline: token budgets, chunking, map-reduce calls, and result composition.

pub mod chunking;
pub mod compose;
pub mod engine;
pub mod prompts;
pub mod retry;
mod service;
pub mod tokens;
pub mod types;

pub use service::{SummaryApi, SummaryService};
pub use types::{
    AttachmentReport, AttachmentSummary, ChunkingError, PipelineError, SkippedSource,
    SourceFailure, SourceStage, SummaryRequest, SummaryResult, SummaryScope, SummaryType,
    TextChunk,
};
