//! Digest composition
//!
//! Formats one HTML fragment per summarized email and wraps the
//! accumulated fragments into the raw outbound message the Gmail send
//! endpoint expects.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use mail_builder::MessageBuilder;

/// Subject line of the outbound digest email
pub const DIGEST_SUBJECT: &str = "Summary of Unread Emails";

/// Everything the digest shows about one processed email.
/// Built once per message, in retrieval order.
#[derive(Debug, Clone)]
pub struct MessageSummaryRecord {
    pub sender: String,
    pub subject: String,
    /// Provider-formatted Date header, passed through opaquely
    pub date: String,
    /// Message id used to build the "View Email" deep link
    pub id: String,
    /// Bullet-formatted summary text (or the failure sentinel)
    pub summary: String,
}

/// Escape HTML special characters to prevent markup injection
pub fn escape_html(s: &str) -> String {
    s.chars()
        .flat_map(|c| match c {
            '&' => "&amp;".chars().collect::<Vec<_>>(),
            '<' => "&lt;".chars().collect::<Vec<_>>(),
            '>' => "&gt;".chars().collect::<Vec<_>>(),
            '"' => "&quot;".chars().collect::<Vec<_>>(),
            '\'' => "&#x27;".chars().collect::<Vec<_>>(),
            _ => vec![c],
        })
        .collect()
}

/// Render the `-` bullet markers as `•` glyphs and newlines as `<br>`.
/// Input is escaped before markup is introduced.
fn summary_to_html(summary: &str) -> String {
    escape_html(summary)
        .lines()
        .map(|line| match line.strip_prefix("- ") {
            Some(rest) => format!("• {}", rest),
            None => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("<br>")
}

/// Compose one self-contained HTML fragment for a summarized email,
/// followed by a horizontal separator.
pub fn compose_fragment(record: &MessageSummaryRecord, account_link_index: u32) -> String {
    let link = format!(
        "https://mail.google.com/mail/u/{}/#inbox/{}",
        account_link_index, record.id
    );

    format!(
        "<p><strong>From:</strong> {}<br>\
         <strong>Subject:</strong> {}<br>\
         <strong>Timestamp:</strong> {}<br>\
         <strong>Link:</strong> <a href='{}'>View Email</a><br>\
         <strong>Summary:</strong><br>{}<br></p><hr>",
        escape_html(&record.sender),
        escape_html(&record.subject),
        escape_html(&record.date),
        link,
        summary_to_html(&record.summary),
    )
}

/// Wrap the accumulated fragments in a minimal HTML document shell,
/// build the MIME envelope, and return the base64url-encoded raw message
/// for the Gmail send endpoint.
pub fn compose_message(recipient: &str, subject: &str, digest_body: &str) -> Result<String> {
    let html = format!(
        "<html>\n<body>\n<h3>Email Summary</h3>\n{}\n</body>\n</html>",
        digest_body
    );

    let eml = MessageBuilder::new()
        .to(recipient)
        .subject(subject)
        .html_body(html)
        .write_to_vec()
        .context("Failed to build digest message")?;

    Ok(URL_SAFE_NO_PAD.encode(eml))
}
