//! LLM-backed email summarization
//!
//! A thin chat-completions client (OpenAI-compatible endpoint) plus the
//! bullet normalization applied to whatever the model returns.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::AiConfig;

/// System role for summary requests
pub const SUMMARY_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that summarizes emails.";

/// Build the user prompt for one email body
fn summary_user_prompt(body: &str) -> String {
    format!(
        "Summarize the following email in no more than 3 bullet points. \
         Make sure each key point is listed as a bullet point:\n\n{}",
        body
    )
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Chat-completions client for summary requests
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl LlmClient {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let api_key = config.resolve_api_key()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_summary_tokens,
            temperature: config.temperature,
        })
    }

    /// Send a chat completion request and return the first choice's text
    pub async fn complete(&self, system_prompt: &str, user_content: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_content.to_string(),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to send request to LLM service")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error ({}): {}", status, error_text);
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        chat_response
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .context("No response content from LLM")
    }

    /// Summarize one email body into bullet points
    pub async fn summarize(&self, body: &str) -> Result<String> {
        let raw = self
            .complete(SUMMARY_SYSTEM_PROMPT, &summary_user_prompt(body))
            .await?;
        Ok(normalize_bullets(&raw))
    }
}

/// Re-normalize model output so every non-blank line is a `-` bullet.
///
/// Lines already starting with `-` pass through unchanged, so the
/// transformation is idempotent. Blank lines are dropped.
pub fn normalize_bullets(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('-') {
            result.push_str(line);
        } else {
            result.push_str("- ");
            result.push_str(line);
        }
        result.push('\n');
    }
    result
}
