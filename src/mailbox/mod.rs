//! Mailbox collaborators that supply messages to the pipeline.
//!
//! [`MailboxSource`] is the seam: the pipeline only needs a message's body, optional headers and
//! raw attachments. [`DirectoryMailbox`] serves messages from a folder per email:
//!
//! ```text
//! <root>/<email_id>/body.txt | body.html
//! <root>/<email_id>/metadata.json      {"subject": "...", "sender": "...", ...}  (optional)
//! <root>/<email_id>/<attachment files>
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::extraction::{SourceInput, decode_text};

const BODY_TEXT: &str = "body.txt";
const BODY_HTML: &str = "body.html";
const METADATA: &str = "metadata.json";
/// Older folders name the metadata file `meta.json`.
const METADATA_ALIAS: &str = "meta.json";

/// Errors raised while loading a message.
#[derive(Debug, Error)]
pub enum MailboxError {
    /// No message exists under the id.
    #[error("message '{0}' not found")]
    NotFound(String),
    /// The id cannot name a message (empty, path separators, `..`).
    #[error("invalid message id '{0}'")]
    InvalidId(String),
    /// Filesystem access failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// `metadata.json` is not valid JSON.
    #[error("invalid metadata in {path}: {source}")]
    InvalidMetadata {
        /// Path of the metadata file.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// One raw attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxAttachment {
    /// Declared filename.
    pub filename: String,
    /// Declared MIME type, if known.
    pub content_type: Option<String>,
    /// Attachment bytes.
    pub raw_bytes: Vec<u8>,
}

/// A message as handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MailboxMessage {
    /// Mailbox identifier.
    pub email_id: String,
    /// Subject header.
    pub subject: Option<String>,
    /// Sender header.
    pub sender: Option<String>,
    /// Decoded body text (plain text or HTML markup).
    pub body_text: String,
    /// MIME type of the body when it is not plain text.
    pub body_content_type: Option<String>,
    /// Attachments in mailbox order.
    pub attachments: Vec<MailboxAttachment>,
}

impl MailboxMessage {
    /// `Subject:` / `From:` lines prefixed to the body before summarization.
    pub fn preamble(&self) -> String {
        let mut lines = Vec::new();
        if let Some(subject) = self.subject.as_deref().filter(|s| !s.trim().is_empty()) {
            lines.push(format!("Subject: {}", subject.trim()));
        }
        if let Some(sender) = self.sender.as_deref().filter(|s| !s.trim().is_empty()) {
            lines.push(format!("From: {}", sender.trim()));
        }
        lines.join("\n")
    }

    /// Body as a dispatcher input.
    pub fn body_source(&self) -> SourceInput {
        let mut source = SourceInput::body(self.body_text.clone());
        source.content_type = self.body_content_type.clone();
        source
    }

    /// Attachments as dispatcher inputs, indexed in mailbox order.
    pub fn attachment_sources(&self) -> Vec<SourceInput> {
        self.attachments
            .iter()
            .enumerate()
            .map(|(index, attachment)| {
                SourceInput::attachment(
                    index,
                    attachment.filename.clone(),
                    attachment.content_type.clone(),
                    attachment.raw_bytes.clone(),
                )
            })
            .collect()
    }
}

/// Supplies messages by id.
#[async_trait]
pub trait MailboxSource: Send + Sync {
    /// Load one message with its body and attachments.
    async fn fetch_message(&self, email_id: &str) -> Result<MailboxMessage, MailboxError>;
}

/// Messages stored one folder per email under a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryMailbox {
    root: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MessageMeta {
    subject: Option<String>,
    sender: Option<String>,
}

impl DirectoryMailbox {
    /// Serve messages from `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List message ids (folder names) in name order.
    pub fn list_messages(&self) -> Result<Vec<String>, MailboxError> {
        let mut ids = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|error| walk_error(&self.root, error))?;
            if entry.file_type().is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(ids)
    }

    /// Load a message synchronously.
    pub fn load(&self, email_id: &str) -> Result<MailboxMessage, MailboxError> {
        validate_id(email_id)?;
        let dir = self.root.join(email_id);
        if !dir.is_dir() {
            return Err(MailboxError::NotFound(email_id.to_string()));
        }

        let meta = read_metadata(&dir)?;

        let (body_text, body_content_type) = match read_optional(&dir.join(BODY_TEXT))? {
            Some(bytes) => (decode_text(&bytes, false).into_owned(), None),
            None => match read_optional(&dir.join(BODY_HTML))? {
                Some(bytes) => (
                    decode_text(&bytes, true).into_owned(),
                    Some("text/html".to_string()),
                ),
                None => (String::new(), None),
            },
        };

        let mut attachments = Vec::new();
        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|error| walk_error(&dir, error))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let filename = entry.file_name().to_string_lossy().into_owned();
            if matches!(filename.as_str(), BODY_TEXT | BODY_HTML | METADATA | METADATA_ALIAS) {
                continue;
            }
            let raw_bytes = std::fs::read(entry.path()).map_err(|source| MailboxError::Io {
                path: entry.path().to_path_buf(),
                source,
            })?;
            attachments.push(MailboxAttachment {
                filename,
                content_type: None,
                raw_bytes,
            });
        }

        tracing::debug!(
            email_id,
            attachments = attachments.len(),
            body_chars = body_text.len(),
            "Loaded message from directory"
        );

        Ok(MailboxMessage {
            email_id: email_id.to_string(),
            subject: meta.subject,
            sender: meta.sender,
            body_text,
            body_content_type,
            attachments,
        })
    }
}

#[async_trait]
impl MailboxSource for DirectoryMailbox {
    async fn fetch_message(&self, email_id: &str) -> Result<MailboxMessage, MailboxError> {
        let mailbox = self.clone();
        let id = email_id.to_string();
        tokio::task::spawn_blocking(move || mailbox.load(&id))
            .await
            .map_err(|error| MailboxError::Io {
                path: self.root.join(email_id),
                source: std::io::Error::other(error.to_string()),
            })?
    }
}

fn validate_id(email_id: &str) -> Result<(), MailboxError> {
    let trimmed = email_id.trim();
    if trimmed.is_empty()
        || trimmed != email_id
        || email_id.contains(['/', '\\'])
        || email_id.contains("..")
        || email_id.starts_with('.')
    {
        return Err(MailboxError::InvalidId(email_id.to_string()));
    }
    Ok(())
}

fn read_metadata(dir: &Path) -> Result<MessageMeta, MailboxError> {
    for name in [METADATA, METADATA_ALIAS] {
        let path = dir.join(name);
        if let Some(bytes) = read_optional(&path)? {
            return serde_json::from_slice::<MessageMeta>(&bytes)
                .map_err(|source| MailboxError::InvalidMetadata { path, source });
        }
    }
    Ok(MessageMeta::default())
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, MailboxError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(MailboxError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn walk_error(path: &Path, error: walkdir::Error) -> MailboxError {
    MailboxError::Io {
        path: error.path().unwrap_or(path).to_path_buf(),
        source: error.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, contents: &[u8]) {
        std::fs::write(dir.join(name), contents).expect("write fixture");
    }

    fn fixture() -> TempDir {
        let root = TempDir::new().expect("tempdir");
        let message = root.path().join("msg-001");
        std::fs::create_dir(&message).expect("mkdir");
        write(&message, "body.txt", b"Please review the attached files.");
        write(
            &message,
            "metadata.json",
            br#"{"id": "msg-001", "subject": "Q3 review", "sender": "ana@example.com", "attachment_count": 2}"#,
        );
        write(&message, "b-notes.txt", b"second");
        write(&message, "a-budget.csv", b"first");
        std::fs::create_dir(message.join("nested")).expect("mkdir");
        write(&message.join("nested"), "ignored.txt", b"deep");
        root
    }

    #[tokio::test]
    async fn loads_body_meta_and_sorted_attachments() {
        let root = fixture();
        let mailbox = DirectoryMailbox::new(root.path());
        let message = mailbox.fetch_message("msg-001").await.expect("message");

        assert_eq!(message.subject.as_deref(), Some("Q3 review"));
        assert_eq!(message.sender.as_deref(), Some("ana@example.com"));
        assert_eq!(message.body_text, "Please review the attached files.");
        let names: Vec<&str> = message
            .attachments
            .iter()
            .map(|a| a.filename.as_str())
            .collect();
        assert_eq!(names, vec!["a-budget.csv", "b-notes.txt"]);
        assert_eq!(message.preamble(), "Subject: Q3 review\nFrom: ana@example.com");
    }

    #[test]
    fn legacy_meta_file_is_read_and_not_an_attachment() {
        let root = TempDir::new().expect("tempdir");
        let message = root.path().join("email_42");
        std::fs::create_dir(&message).expect("mkdir");
        write(&message, "body.txt", b"See report.");
        write(&message, "meta.json", br#"{"subject": "Legacy", "sender": null}"#);
        write(&message, "report.txt", b"numbers");

        let loaded = DirectoryMailbox::new(root.path())
            .load("email_42")
            .expect("message");
        assert_eq!(loaded.subject.as_deref(), Some("Legacy"));
        assert_eq!(loaded.sender, None);
        assert_eq!(loaded.attachments.len(), 1);
        assert_eq!(loaded.attachments[0].filename, "report.txt");
    }

    #[tokio::test]
    async fn html_body_is_tagged() {
        let root = TempDir::new().expect("tempdir");
        let message = root.path().join("html");
        std::fs::create_dir(&message).expect("mkdir");
        write(&message, "body.html", b"<p>Hello</p>");

        let loaded = DirectoryMailbox::new(root.path())
            .fetch_message("html")
            .await
            .expect("message");
        assert_eq!(loaded.body_content_type.as_deref(), Some("text/html"));
        assert!(loaded.attachments.is_empty());
        assert_eq!(loaded.preamble(), "");
    }

    #[tokio::test]
    async fn unknown_and_unsafe_ids_are_rejected() {
        let root = fixture();
        let mailbox = DirectoryMailbox::new(root.path());
        assert!(matches!(
            mailbox.fetch_message("missing").await,
            Err(MailboxError::NotFound(_))
        ));
        for id in ["../etc", "a/b", "", ".hidden"] {
            assert!(matches!(
                mailbox.fetch_message(id).await,
                Err(MailboxError::InvalidId(_))
            ));
        }
    }

    #[test]
    fn lists_message_folders() {
        let root = fixture();
        let mailbox = DirectoryMailbox::new(root.path());
        assert_eq!(mailbox.list_messages().expect("list"), vec!["msg-001"]);
    }

    #[test]
    fn attachment_sources_are_indexed() {
        let message = MailboxMessage {
            attachments: vec![
                MailboxAttachment {
                    filename: "a.pdf".into(),
                    content_type: Some("application/pdf".into()),
                    raw_bytes: vec![1],
                },
                MailboxAttachment {
                    filename: "b.txt".into(),
                    content_type: None,
                    raw_bytes: vec![2],
                },
            ],
            ..Default::default()
        };
        let ids: Vec<String> = message
            .attachment_sources()
            .into_iter()
            .map(|s| s.source_id)
            .collect();
        assert_eq!(ids, vec!["attachment-0", "attachment-1"]);
    }
}
