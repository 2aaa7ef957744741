use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing summarization activity.
#[derive(Default)]
pub struct SummaryMetrics {
    requests_completed: AtomicU64,
    requests_failed: AtomicU64,
    sources_summarized: AtomicU64,
    sources_skipped: AtomicU64,
    chunks_processed: AtomicU64,
    backend_calls: AtomicU64,
    backend_retries: AtomicU64,
}

impl SummaryMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished request and how its sources fared.
    pub fn record_request(&self, summarized: u64, skipped: u64) {
        self.requests_completed.fetch_add(1, Ordering::Relaxed);
        self.sources_summarized
            .fetch_add(summarized, Ordering::Relaxed);
        self.sources_skipped.fetch_add(skipped, Ordering::Relaxed);
    }

    /// Record a request that ended without any summarized source.
    pub fn record_failed_request(&self, skipped: u64) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
        self.sources_skipped.fetch_add(skipped, Ordering::Relaxed);
    }

    /// Record the chunk count produced for one document.
    pub fn record_chunks(&self, chunk_count: u64) {
        self.chunks_processed
            .fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record one backend attempt.
    pub fn record_backend_call(&self) {
        self.backend_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retry scheduled after a transient backend failure.
    pub fn record_retry(&self) {
        self.backend_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_completed: self.requests_completed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            sources_summarized: self.sources_summarized.load(Ordering::Relaxed),
            sources_skipped: self.sources_skipped.load(Ordering::Relaxed),
            chunks_processed: self.chunks_processed.load(Ordering::Relaxed),
            backend_calls: self.backend_calls.load(Ordering::Relaxed),
            backend_retries: self.backend_retries.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of summarization counters used for reporting.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Requests that produced a summary result.
    pub requests_completed: u64,
    /// Requests rejected because no source could be summarized.
    pub requests_failed: u64,
    /// Sources (body or attachments) that produced a summary.
    pub sources_summarized: u64,
    /// Sources excluded because extraction or summarization failed.
    pub sources_skipped: u64,
    /// Chunks produced across all summarized documents.
    pub chunks_processed: u64,
    /// Backend attempts issued, retries included.
    pub backend_calls: u64,
    /// Retries scheduled after transient failures.
    pub backend_retries: u64,
}
