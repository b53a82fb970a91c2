//! Typed Gmail REST API client
//!
//! Covers exactly the three calls this tool needs: list matching messages,
//! fetch one message in full, send the digest. The payload schema mirrors
//! the API's single-part/multi-part shape with every absent field explicit.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::oauth::GmailOAuth;

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// Name/value header pair as returned by the API
#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Body blob of a message or part; `data` is base64url-encoded bytes
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartBody {
    pub data: Option<String>,
}

/// One MIME part of a multi-part message
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    pub mime_type: Option<String>,
    pub body: Option<PartBody>,
}

/// Full message payload: headers plus either a single body or a part list
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub mime_type: Option<String>,
    #[serde(default)]
    pub headers: Vec<Header>,
    pub body: Option<PartBody>,
    pub parts: Option<Vec<MessagePart>>,
}

impl MessagePayload {
    /// Case-insensitive header lookup; missing headers are None, not an error
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub id: String,
    pub payload: Option<MessagePayload>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessageListResponse {
    #[serde(default)]
    messages: Option<Vec<MessageRef>>,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    raw: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

/// Gmail API client for the authenticated user ("me")
pub struct GmailClient {
    client: Client,
    oauth: GmailOAuth,
}

impl GmailClient {
    pub fn new(oauth: GmailOAuth) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, oauth })
    }

    /// List message ids matching `query`, newest first, bounded by `max_results`
    pub async fn list_messages(&self, max_results: u32, query: &str) -> Result<Vec<String>> {
        let token = self.oauth.access_token().await?;

        let url = format!("{}/users/me/messages", GMAIL_API_BASE);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .query(&[("maxResults", max_results.to_string().as_str()), ("q", query)])
            .send()
            .await
            .context("Failed to send list request to Gmail")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Gmail list failed ({}): {}", status, error_text);
        }

        let list: MessageListResponse = response
            .json()
            .await
            .context("Failed to parse Gmail list response")?;

        // An absent `messages` array means no matches
        Ok(list
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.id)
            .collect())
    }

    /// Fetch one message with its full payload tree
    pub async fn get_message(&self, id: &str) -> Result<Message> {
        let token = self.oauth.access_token().await?;

        let url = format!("{}/users/me/messages/{}", GMAIL_API_BASE, id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .query(&[("format", "full")])
            .send()
            .await
            .with_context(|| format!("Failed to fetch message {}", id))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Gmail get {} failed ({}): {}", id, status, error_text);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse message {}", id))
    }

    /// Send a raw (base64url-encoded MIME) message; returns the new message id
    pub async fn send_raw(&self, raw: &str) -> Result<String> {
        let token = self.oauth.access_token().await?;

        let url = format!("{}/users/me/messages/send", GMAIL_API_BASE);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&SendRequest { raw })
            .send()
            .await
            .context("Failed to send message via Gmail")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Gmail send failed ({}): {}", status, error_text);
        }

        let sent: SendResponse = response
            .json()
            .await
            .context("Failed to parse Gmail send response")?;

        Ok(sent.id)
    }
}
