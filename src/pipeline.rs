//! Digest pipeline orchestration
//!
//! One run: list matching messages, extract and summarize each in order,
//! compose the digest, send it once. Only listing failures abort the run;
//! every per-message failure degrades and the loop continues.

use anyhow::Result;
use thiserror::Error;

use crate::config::Config;
use crate::digest::{DIGEST_SUBJECT, MessageSummaryRecord, compose_fragment, compose_message};
use crate::extract::extract_body;
use crate::gmail::{GmailClient, Message, MessagePayload};
use crate::summarize::LlmClient;

/// Fallback summary text substituted when the LLM call fails, so the
/// failure stays visible in the digest instead of silently dropping mail
pub const SUMMARY_FAILED: &str = "Error generating summary.";

/// Fatal run failures, mapped to process exit codes in main
#[derive(Debug, Error)]
pub enum RunError {
    #[error("authentication failed: {0:#}")]
    Auth(anyhow::Error),
    #[error("listing messages failed: {0:#}")]
    Listing(anyhow::Error),
}

/// How a run ended. Every variant is a completed run; `SendFailed` is the
/// known limitation where computed summaries are lost with the dispatch.
#[derive(Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// No matching messages; nothing was sent
    NothingToDo,
    /// Digest with `count` fragments delivered
    Sent { count: usize },
    /// Digest was composed but dispatch failed (logged, non-fatal)
    SendFailed { count: usize },
}

/// Mail provider seam: list, fetch, send
#[allow(async_fn_in_trait)]
pub trait Mailbox {
    async fn list_unread(&self, max_results: u32, query: &str) -> Result<Vec<String>>;
    async fn get_message(&self, id: &str) -> Result<Message>;
    async fn send(&self, raw: &str) -> Result<String>;
}

impl Mailbox for GmailClient {
    async fn list_unread(&self, max_results: u32, query: &str) -> Result<Vec<String>> {
        self.list_messages(max_results, query).await
    }

    async fn get_message(&self, id: &str) -> Result<Message> {
        GmailClient::get_message(self, id).await
    }

    async fn send(&self, raw: &str) -> Result<String> {
        self.send_raw(raw).await
    }
}

/// Summarizer seam; the error case is mapped to [`SUMMARY_FAILED`] here,
/// never inside the summarizer itself
#[allow(async_fn_in_trait)]
pub trait Summarize {
    async fn summarize(&self, body: &str) -> Result<String>;
}

impl Summarize for LlmClient {
    async fn summarize(&self, body: &str) -> Result<String> {
        LlmClient::summarize(self, body).await
    }
}

/// Run the digest pipeline once.
pub async fn run_digest(
    config: &Config,
    mailbox: &impl Mailbox,
    summarizer: &impl Summarize,
) -> Result<RunOutcome, RunError> {
    let ids = mailbox
        .list_unread(config.max_results, &config.query)
        .await
        .map_err(RunError::Listing)?;

    if ids.is_empty() {
        tracing::info!("No messages match '{}', nothing to send", config.query);
        return Ok(RunOutcome::NothingToDo);
    }

    tracing::info!("Summarizing {} message(s)", ids.len());
    let records = summarize_messages(mailbox, summarizer, &ids).await;

    let digest: String = records
        .iter()
        .map(|r| compose_fragment(r, config.account_link_index))
        .collect();
    let count = records.len();

    let raw = match compose_message(&config.recipient, DIGEST_SUBJECT, &digest) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::error!("Failed to compose digest message: {:#}", e);
            return Ok(RunOutcome::SendFailed { count });
        }
    };

    match mailbox.send(&raw).await {
        Ok(sent_id) => {
            tracing::info!("Digest with {} summaries sent to {} ({})", count, config.recipient, sent_id);
            Ok(RunOutcome::Sent { count })
        }
        Err(e) => {
            tracing::error!("Failed to send digest: {:#}", e);
            Ok(RunOutcome::SendFailed { count })
        }
    }
}

/// Fetch, extract, and summarize each message in listing order.
/// A failed fetch or summary degrades that one record; the loop never aborts.
async fn summarize_messages(
    mailbox: &impl Mailbox,
    summarizer: &impl Summarize,
    ids: &[String],
) -> Vec<MessageSummaryRecord> {
    let mut records = Vec::with_capacity(ids.len());

    for id in ids {
        let payload = match mailbox.get_message(id).await {
            Ok(message) => message.payload.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("Failed to fetch message {}: {:#}", id, e);
                MessagePayload::default()
            }
        };

        let sender = header_or(&payload, "From", "(unknown sender)");
        let subject = header_or(&payload, "Subject", "(no subject)");
        let date = header_or(&payload, "Date", "");

        let body = extract_body(&payload);

        let summary = match summarizer.summarize(&body).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!("Summarization failed for {}: {:#}", id, e);
                SUMMARY_FAILED.to_string()
            }
        };

        tracing::info!("Summarized email from {} with subject '{}'", sender, subject);

        records.push(MessageSummaryRecord {
            sender,
            subject,
            date,
            id: id.clone(),
            summary,
        });
    }

    records
}

fn header_or(payload: &MessagePayload, name: &str, fallback: &str) -> String {
    payload
        .header_value(name)
        .unwrap_or(fallback)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AiConfig, OauthConfig};
    use crate::gmail::{Header, MessagePart, PartBody};
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use std::cell::RefCell;

    fn test_config() -> Config {
        Config {
            recipient: "me+digest@gmail.com".to_string(),
            account_link_index: 1,
            max_results: 10,
            query: "is:unread".to_string(),
            oauth: OauthConfig::default(),
            ai: AiConfig::default(),
        }
    }

    fn header(name: &str, value: &str) -> Header {
        Header {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    fn html_message(id: &str, sender: &str, subject: &str, html: &str) -> Message {
        Message {
            id: id.to_string(),
            payload: Some(MessagePayload {
                mime_type: Some("multipart/alternative".to_string()),
                headers: vec![
                    header("From", sender),
                    header("Subject", subject),
                    header("Date", "Mon, 1 Jan 2024 12:00:00 +0000"),
                ],
                body: None,
                parts: Some(vec![MessagePart {
                    mime_type: Some("text/html".to_string()),
                    body: Some(PartBody {
                        data: Some(URL_SAFE_NO_PAD.encode(html)),
                    }),
                }]),
            }),
        }
    }

    fn plain_message(id: &str, sender: &str, subject: &str, text: &str) -> Message {
        Message {
            id: id.to_string(),
            payload: Some(MessagePayload {
                mime_type: Some("text/plain".to_string()),
                headers: vec![
                    header("From", sender),
                    header("Subject", subject),
                    header("Date", "Tue, 2 Jan 2024 09:30:00 +0000"),
                ],
                body: Some(PartBody {
                    data: Some(URL_SAFE_NO_PAD.encode(text)),
                }),
                parts: None,
            }),
        }
    }

    struct StubMailbox {
        messages: Vec<Message>,
        sends: RefCell<Vec<String>>,
        fail_listing: bool,
    }

    impl StubMailbox {
        fn with_messages(messages: Vec<Message>) -> Self {
            Self {
                messages,
                sends: RefCell::new(Vec::new()),
                fail_listing: false,
            }
        }
    }

    impl Mailbox for StubMailbox {
        async fn list_unread(&self, max_results: u32, _query: &str) -> Result<Vec<String>> {
            if self.fail_listing {
                anyhow::bail!("listing unavailable");
            }
            Ok(self
                .messages
                .iter()
                .take(max_results as usize)
                .map(|m| m.id.clone())
                .collect())
        }

        async fn get_message(&self, id: &str) -> Result<Message> {
            self.messages
                .iter()
                .find(|m| m.id == id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such message: {}", id))
        }

        async fn send(&self, raw: &str) -> Result<String> {
            self.sends.borrow_mut().push(raw.to_string());
            Ok("sent-id".to_string())
        }
    }

    struct FixedSummarizer(&'static str);

    impl Summarize for FixedSummarizer {
        async fn summarize(&self, _body: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingSummarizer;

    impl Summarize for FailingSummarizer {
        async fn summarize(&self, _body: &str) -> Result<String> {
            anyhow::bail!("simulated transport failure")
        }
    }

    #[tokio::test]
    async fn test_two_messages_one_send() {
        let mailbox = StubMailbox::with_messages(vec![
            html_message("m1", "alice@example.com", "Greetings", "<p>Hi <b>there</b></p>"),
            plain_message("m2", "bob@example.com", "Schedule", "Meeting moved to 3pm"),
        ]);
        let summarizer = FixedSummarizer("- fixed bullet\n");
        let config = test_config();

        let outcome = run_digest(&config, &mailbox, &summarizer).await.unwrap();
        assert_eq!(outcome, RunOutcome::Sent { count: 2 });

        // Exactly one outbound dispatch for the whole run
        assert_eq!(mailbox.sends.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_fragments_in_retrieval_order_with_links() {
        let mailbox = StubMailbox::with_messages(vec![
            html_message("m1", "alice@example.com", "Greetings", "<p>Hi <b>there</b></p>"),
            plain_message("m2", "bob@example.com", "Schedule", "Meeting moved to 3pm"),
        ]);
        let summarizer = FixedSummarizer("- fixed bullet\n");

        let ids = vec!["m1".to_string(), "m2".to_string()];
        let records = summarize_messages(&mailbox, &summarizer, &ids).await;

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "m1");
        assert_eq!(records[0].sender, "alice@example.com");
        assert_eq!(records[0].subject, "Greetings");
        assert_eq!(records[1].id, "m2");
        assert_eq!(records[1].subject, "Schedule");

        let fragment = compose_fragment(&records[1], 1);
        assert!(fragment.contains("https://mail.google.com/mail/u/1/#inbox/m2"));
        assert!(fragment.contains("• fixed bullet"));
    }

    #[tokio::test]
    async fn test_empty_listing_sends_nothing() {
        let mailbox = StubMailbox::with_messages(vec![]);
        let summarizer = FixedSummarizer("- unused\n");
        let config = test_config();

        let outcome = run_digest(&config, &mailbox, &summarizer).await.unwrap();
        assert_eq!(outcome, RunOutcome::NothingToDo);
        assert!(mailbox.sends.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_listing_failure_is_fatal() {
        let mailbox = StubMailbox {
            messages: vec![],
            sends: RefCell::new(Vec::new()),
            fail_listing: true,
        };
        let summarizer = FixedSummarizer("- unused\n");
        let config = test_config();

        let err = run_digest(&config, &mailbox, &summarizer).await.unwrap_err();
        assert!(matches!(err, RunError::Listing(_)));
        assert!(mailbox.sends.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_summarizer_failure_degrades_to_sentinel() {
        let mailbox = StubMailbox::with_messages(vec![plain_message(
            "m1",
            "alice@example.com",
            "Greetings",
            "body text",
        )]);

        let ids = vec!["m1".to_string()];
        let records = summarize_messages(&mailbox, &FailingSummarizer, &ids).await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].summary, SUMMARY_FAILED);

        // The sentinel flows into the digest fragment rather than aborting
        let fragment = compose_fragment(&records[0], 0);
        assert!(fragment.contains(SUMMARY_FAILED));

        let config = test_config();
        let outcome = run_digest(&config, &mailbox, &FailingSummarizer)
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Sent { count: 1 });
    }

    #[tokio::test]
    async fn test_fetch_failure_degrades_and_continues() {
        let mailbox = StubMailbox::with_messages(vec![plain_message(
            "m2",
            "bob@example.com",
            "Schedule",
            "Meeting moved to 3pm",
        )]);
        let summarizer = FixedSummarizer("- bullet\n");

        // m1 is listed but cannot be fetched
        let ids = vec!["m1".to_string(), "m2".to_string()];
        let records = summarize_messages(&mailbox, &summarizer, &ids).await;

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sender, "(unknown sender)");
        assert_eq!(records[0].subject, "(no subject)");
        assert_eq!(records[1].subject, "Schedule");
    }

    #[tokio::test]
    async fn test_send_failure_is_nonfatal() {
        struct SendFails(StubMailbox);

        impl Mailbox for SendFails {
            async fn list_unread(&self, max_results: u32, query: &str) -> Result<Vec<String>> {
                self.0.list_unread(max_results, query).await
            }
            async fn get_message(&self, id: &str) -> Result<Message> {
                self.0.get_message(id).await
            }
            async fn send(&self, _raw: &str) -> Result<String> {
                anyhow::bail!("smtp relay on fire")
            }
        }

        let mailbox = SendFails(StubMailbox::with_messages(vec![plain_message(
            "m1",
            "alice@example.com",
            "Greetings",
            "body",
        )]));
        let summarizer = FixedSummarizer("- bullet\n");
        let config = test_config();

        let outcome = run_digest(&config, &mailbox, &summarizer).await.unwrap();
        assert_eq!(outcome, RunOutcome::SendFailed { count: 1 });
    }
}
