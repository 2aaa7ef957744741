//! Whole-pipeline scenarios against deterministic in-process backends.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use inbox_digest::{
    extraction::{Dispatcher, SourceInput},
    mailbox::{MailboxAttachment, MailboxError, MailboxMessage, MailboxSource},
    processing::{
        PipelineError, SourceFailure, SourceStage, SummaryRequest, SummaryScope, SummaryService,
        SummaryType,
        engine::EngineSettings,
        prompts::{reduce_instruction, summary_instruction},
        retry::RetryPolicy,
    },
    summarization::{SummarizationClient, SummarizationClientError, SummarizationRequest},
};

type Reply = dyn Fn(&SummarizationRequest, usize) -> Result<String, SummarizationClientError>
    + Send
    + Sync;

/// Records every request and answers through `reply(request, call_number)`.
struct StubClient {
    reply: Box<Reply>,
    delay: Duration,
    requests: Mutex<Vec<SummarizationRequest>>,
}

impl StubClient {
    fn new(
        reply: impl Fn(&SummarizationRequest, usize) -> Result<String, SummarizationClientError>
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            reply: Box::new(reply),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Summary with a quarter of the input's words.
    fn quarter() -> Arc<Self> {
        Self::new(|request, _| {
            let words = request.text.split_whitespace().count();
            Ok(common::words((words / 4).max(1)))
        })
    }

    fn fixed(words: usize) -> Arc<Self> {
        Self::new(move |_, _| Ok(common::words(words)))
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: Box::new(|_, _| Ok("late".to_string())),
            delay,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<SummarizationRequest> {
        self.requests.lock().expect("lock").clone()
    }
}

#[async_trait]
impl SummarizationClient for StubClient {
    async fn generate_summary(
        &self,
        request: SummarizationRequest,
    ) -> Result<String, SummarizationClientError> {
        let call = {
            let mut requests = self.requests.lock().expect("lock");
            requests.push(request.clone());
            requests.len()
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.reply)(&request, call)
    }
}

#[derive(Default)]
struct MemoryMailbox {
    messages: HashMap<String, MailboxMessage>,
}

impl MemoryMailbox {
    fn with(message: MailboxMessage) -> Arc<Self> {
        let mut messages = HashMap::new();
        messages.insert(message.email_id.clone(), message);
        Arc::new(Self { messages })
    }
}

#[async_trait]
impl MailboxSource for MemoryMailbox {
    async fn fetch_message(&self, email_id: &str) -> Result<MailboxMessage, MailboxError> {
        self.messages
            .get(email_id)
            .cloned()
            .ok_or_else(|| MailboxError::NotFound(email_id.to_string()))
    }
}

fn settings(chunk_tokens: Option<usize>) -> EngineSettings {
    EngineSettings {
        chunk_tokens,
        max_in_flight: 4,
        call_timeout: Duration::from_secs(5),
        retry: RetryPolicy::new(3, Duration::from_millis(1)),
    }
}

fn service(client: Arc<StubClient>, mailbox: Arc<MemoryMailbox>) -> SummaryService {
    service_with(client, mailbox, settings(None))
}

fn service_with(
    client: Arc<StubClient>,
    mailbox: Arc<MemoryMailbox>,
    settings: EngineSettings,
) -> SummaryService {
    SummaryService::new(
        client,
        mailbox,
        settings,
        Dispatcher::new(1 << 20),
        "stub-model".to_string(),
    )
}

fn attachment(filename: &str, bytes: Vec<u8>) -> MailboxAttachment {
    MailboxAttachment {
        filename: filename.to_string(),
        content_type: None,
        raw_bytes: bytes,
    }
}

fn message(body: String, attachments: Vec<MailboxAttachment>) -> MailboxMessage {
    MailboxMessage {
        email_id: "msg-1".to_string(),
        body_text: body,
        attachments,
        ..Default::default()
    }
}

fn request(scope: SummaryScope) -> SummaryRequest {
    SummaryRequest::new(scope, SummaryType::Detailed, "stub-model")
}

#[tokio::test]
async fn compression_ratio_spans_body_and_attachments() {
    let client = StubClient::quarter();
    let mailbox = MemoryMailbox::with(message(
        common::words(600),
        vec![attachment("notes.txt", common::words(400).into_bytes())],
    ));
    let service = service(client.clone(), mailbox);

    let result = service
        .summarize_email("msg-1", request(SummaryScope::All))
        .await
        .expect("summary");

    assert_eq!(result.total_original_tokens, 1000);
    assert_eq!(result.total_summary_tokens, 250);
    assert_eq!(result.compression_ratio, 75.0);
    assert_eq!(result.body_original_tokens, 600);
    assert_eq!(result.body_summary_tokens, 150);
    assert_eq!(result.attachment_summaries.len(), 1);
    assert_eq!(result.attachment_summaries[0].filename, "notes.txt");
    assert!(result.combined_summary.is_some());
    // Body, attachment, then the combined call.
    assert_eq!(client.requests().len(), 3);
}

#[tokio::test]
async fn body_scope_ignores_attachments() {
    let client = StubClient::fixed(10);
    let mailbox = MemoryMailbox::with(message(
        common::words(50),
        vec![attachment("notes.txt", b"never read".to_vec())],
    ));
    let service = service(client.clone(), mailbox);

    let result = service
        .summarize_email("msg-1", request(SummaryScope::Body))
        .await
        .expect("summary");

    assert_eq!(result.compression_ratio, 80.0);
    assert_eq!(result.total_original_tokens, 50);
    assert_eq!(result.total_summary_tokens, 10);
    assert!(result.attachment_summaries.is_empty());
    assert!(result.combined_summary.is_none());
    assert!(result.skipped.is_empty());
    assert_eq!(client.requests().len(), 1);
}

#[tokio::test]
async fn unsupported_attachment_is_skipped_next_to_a_pdf() {
    let client = StubClient::fixed(3);
    let mailbox = MemoryMailbox::with(message(
        "See attached.".to_string(),
        vec![
            attachment("setup.exe", b"MZ\x90\x00\x03binary".to_vec()),
            attachment("report.pdf", common::pdf("Quarterly revenue grew")),
        ],
    ));
    let service = service(client.clone(), mailbox);

    let result = service
        .summarize_email("msg-1", request(SummaryScope::Attachments))
        .await
        .expect("summary");

    assert!(result.body_summary.is_none());
    assert_eq!(result.attachment_summaries.len(), 1);
    assert_eq!(result.attachment_summaries[0].filename, "report.pdf");
    assert_eq!(result.skipped.len(), 1);
    let skipped = &result.skipped[0];
    assert_eq!(skipped.filename.as_deref(), Some("setup.exe"));
    assert_eq!(skipped.failure, SourceFailure::UnsupportedFormat);
    assert_eq!(skipped.failed_stage, SourceStage::Pending);
    assert_eq!(client.requests().len(), 1);
    assert!(client.requests()[0].text.contains("Quarterly revenue grew"));
}

#[tokio::test]
async fn permanent_attachment_failure_drops_the_combined_summary() {
    let client = StubClient::new(|request, _| {
        if request.text.contains("CONFIDENTIAL") {
            Err(SummarizationClientError::ContentFiltered(
                "blocked by policy".into(),
            ))
        } else {
            Ok(common::words(5))
        }
    });
    let mailbox = MemoryMailbox::with(message(
        common::words(40),
        vec![attachment(
            "secret.txt",
            format!("CONFIDENTIAL {}", common::words(30)).into_bytes(),
        )],
    ));
    let service = service(client.clone(), mailbox);

    let result = service
        .summarize_email("msg-1", request(SummaryScope::All))
        .await
        .expect("summary");

    assert!(result.body_summary.is_some());
    assert!(result.attachment_summaries.is_empty());
    assert!(result.combined_summary.is_none());
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.skipped[0].failure, SourceFailure::BackendPermanent);
    assert_eq!(result.skipped[0].failed_stage, SourceStage::Summarizing);
    // Permanent failures are not retried and no combined call is made.
    assert_eq!(client.requests().len(), 2);
}

#[tokio::test]
async fn long_body_is_chunked_and_reduced_once() {
    let client = StubClient::fixed(20);
    let body = (0..50)
        .map(|_| common::words(100))
        .collect::<Vec<_>>()
        .join("\n\n");
    let mailbox = MemoryMailbox::with(message(body, Vec::new()));
    let service = service_with(client.clone(), mailbox, settings(Some(2000)));

    let result = service
        .summarize_email("msg-1", request(SummaryScope::Body))
        .await
        .expect("summary");

    let requests = client.requests();
    let reduce = reduce_instruction(SummaryType::Detailed);
    let chunk_calls = requests
        .iter()
        .filter(|r| r.instruction == summary_instruction(SummaryType::Detailed))
        .count();
    let reduce_calls = requests.iter().filter(|r| r.instruction == reduce).count();
    assert_eq!(chunk_calls, 3);
    assert_eq!(reduce_calls, 1);
    assert_eq!(result.total_original_tokens, 5000);
    assert_eq!(result.body_summary_tokens, 20);

    // The reduction sees the chunk summaries in order, nothing else.
    let reduction = requests
        .iter()
        .find(|r| r.instruction == reduce)
        .expect("reduction request");
    assert_eq!(reduction.text.split("\n\n").count(), 3);
}

#[tokio::test]
async fn identical_requests_produce_identical_results() {
    let client = StubClient::quarter();
    let mailbox = MemoryMailbox::with(message(
        common::words(120),
        vec![
            attachment("deck.pptx", common::pptx(&["Kickoff", "Timeline and owners"])),
            attachment(
                "budget.xlsx",
                common::xlsx(&[["Item", "Amount"], ["Travel", "1200"]]),
            ),
        ],
    ));
    let service = service(client, mailbox);

    let first = service
        .summarize_email("msg-1", request(SummaryScope::All))
        .await
        .expect("first");
    let second = service
        .summarize_email("msg-1", request(SummaryScope::All))
        .await
        .expect("second");
    assert_eq!(first, second);
}

#[tokio::test]
async fn subject_and_sender_prefix_the_body() {
    let client = StubClient::fixed(2);
    let mut email = message("Lunch moved to noon.".to_string(), Vec::new());
    email.subject = Some("Lunch".to_string());
    email.sender = Some("kim@example.com".to_string());
    let service = service(client.clone(), MemoryMailbox::with(email));

    service
        .summarize_email("msg-1", request(SummaryScope::Body))
        .await
        .expect("summary");

    assert_eq!(
        client.requests()[0].text,
        "Subject: Lunch\nFrom: kim@example.com\n\nLunch moved to noon."
    );
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let client = StubClient::new(|_, call| {
        if call < 3 {
            Err(SummarizationClientError::Status {
                status: 429,
                body: "slow down".into(),
            })
        } else {
            Ok("recovered".to_string())
        }
    });
    let mailbox = MemoryMailbox::with(message("Short body.".to_string(), Vec::new()));
    let service = service(client.clone(), mailbox);

    let result = service
        .summarize_email("msg-1", request(SummaryScope::Body))
        .await
        .expect("summary");

    assert_eq!(result.body_summary.as_deref(), Some("recovered"));
    assert_eq!(client.requests().len(), 3);
    let metrics = service.metrics_snapshot();
    assert_eq!(metrics.backend_calls, 3);
    assert_eq!(metrics.backend_retries, 2);
    assert_eq!(metrics.requests_completed, 1);
}

#[tokio::test]
async fn request_without_any_summary_is_rejected() {
    let client = StubClient::fixed(3);
    let mailbox = MemoryMailbox::with(message(
        "   ".to_string(),
        vec![attachment("setup.exe", b"MZ".to_vec())],
    ));
    let service = service(client.clone(), mailbox);

    let error = service
        .summarize_email("msg-1", request(SummaryScope::All))
        .await
        .expect_err("no eligible source");

    let PipelineError::RequestHasNoEligibleSource { skipped } = error else {
        panic!("unexpected error: {error}");
    };
    assert_eq!(skipped.len(), 2);
    assert_eq!(skipped[0].failure, SourceFailure::EmptyDocument);
    assert_eq!(skipped[1].failure, SourceFailure::UnsupportedFormat);
    assert!(client.requests().is_empty());
    assert_eq!(service.metrics_snapshot().requests_failed, 1);
}

#[tokio::test]
async fn unknown_email_is_a_mailbox_error() {
    let service = service(StubClient::fixed(1), Arc::new(MemoryMailbox::default()));
    let error = service
        .summarize_email("missing", request(SummaryScope::All))
        .await
        .expect_err("missing message");
    assert!(matches!(
        error,
        PipelineError::Mailbox(MailboxError::NotFound(_))
    ));
}

#[tokio::test]
async fn cancellation_abandons_in_flight_calls() {
    let client = StubClient::slow(Duration::from_secs(30));
    let mailbox = MemoryMailbox::with(message("Body text.".to_string(), Vec::new()));
    let service = service(client.clone(), mailbox);

    let error = service
        .summarize_email_until(
            "msg-1",
            request(SummaryScope::Body),
            tokio::time::sleep(Duration::from_millis(50)),
        )
        .await
        .expect_err("cancelled");

    assert!(matches!(error, PipelineError::Cancelled));
    assert!(client.requests().len() <= 1);
}

#[tokio::test]
async fn single_attachment_report() {
    let client = StubClient::fixed(10);
    let service = service(client, Arc::new(MemoryMailbox::default()));

    let report = service
        .summarize_attachment(
            SourceInput::attachment(0, "minutes.docx", None, {
                let paragraph = common::words(20);
                common::docx(&[&paragraph, &paragraph])
            }),
            SummaryType::Brief,
            String::new(),
        )
        .await
        .expect("report");

    assert_eq!(report.filename, "minutes.docx");
    assert_eq!(report.original_tokens, 40);
    assert_eq!(report.summary_tokens, 10);
    assert_eq!(report.compression_ratio, 75.0);
}
