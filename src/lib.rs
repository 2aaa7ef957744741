#![deny(missing_docs)]

//! Core library for Inbox Digest: email body and attachment summarization.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Plain-text digest rendering.
pub mod digest;
/// Format detection and text extraction.
pub mod extraction;
/// Structured logging and tracing setup.
pub mod logging;
/// Message sources.
pub mod mailbox;
/// Summarization metrics helpers.
pub mod metrics;
/// Token budgets, chunking and the map-reduce summarization pipeline.
pub mod processing;
/// Summarization backend abstraction and adapters.
pub mod summarization;
