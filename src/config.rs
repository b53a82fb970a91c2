use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the digest email is delivered. Usually the owner's own address
    /// or a plus-tagged relay alias (e.g. "me+digest@gmail.com").
    pub recipient: String,
    /// Gmail web account index used in "View Email" deep links
    /// (the N in https://mail.google.com/mail/u/N/). Not auto-detected.
    #[serde(default)]
    pub account_link_index: u32,
    /// Maximum number of messages summarized per run
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    /// Gmail search filter selecting which messages to digest
    #[serde(default = "default_query")]
    pub query: String,
    #[serde(default)]
    pub oauth: OauthConfig,
    #[serde(default)]
    pub ai: AiConfig,
}

/// OAuth2 client registration for the Gmail API.
///
/// Both fields fall back to the MAILDIGEST_OAUTH_CLIENT_ID and
/// MAILDIGEST_OAUTH_CLIENT_SECRET environment variables when unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OauthConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

impl OauthConfig {
    pub fn resolve_client_id(&self) -> Result<String> {
        self.client_id
            .clone()
            .or_else(|| std::env::var("MAILDIGEST_OAUTH_CLIENT_ID").ok())
            .context(
                "No OAuth client id. Set oauth.client_id in the config file \
                 or the MAILDIGEST_OAUTH_CLIENT_ID environment variable.",
            )
    }

    pub fn resolve_client_secret(&self) -> Option<String> {
        self.client_secret
            .clone()
            .or_else(|| std::env::var("MAILDIGEST_OAUTH_CLIENT_SECRET").ok())
    }
}

/// Summarization backend configuration (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// API key given inline. Takes precedence over `api_key_file`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Path to a file holding the API key (trailing whitespace trimmed)
    #[serde(default)]
    pub api_key_file: Option<PathBuf>,
    /// Model to use for summaries
    #[serde(default = "default_model")]
    pub model: String,
    /// Output-length budget per summary
    #[serde(default = "default_max_summary_tokens")]
    pub max_summary_tokens: u32,
    /// Sampling temperature; kept moderate for low-variance phrasing
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Chat-completions endpoint base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_file: None,
            model: default_model(),
            max_summary_tokens: default_max_summary_tokens(),
            temperature: default_temperature(),
            api_base: default_api_base(),
        }
    }
}

impl AiConfig {
    /// Resolve the API key: inline value wins, otherwise read the secret file.
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(ref key) = self.api_key
            && !key.is_empty()
        {
            return Ok(key.clone());
        }

        let path = self.api_key_file.as_ref().context(
            "No LLM API key configured. Set ai.api_key or ai.api_key_file in the config file.",
        )?;

        let key = fs::read_to_string(path)
            .with_context(|| format!("Failed to read API key file: {}", path.display()))?
            .trim()
            .to_string();

        if key.is_empty() {
            anyhow::bail!("API key file is empty: {}", path.display());
        }
        Ok(key)
    }
}

fn default_max_results() -> u32 {
    10
}

fn default_query() -> String {
    "is:unread".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_summary_tokens() -> u32 {
    150
}

fn default_temperature() -> f32 {
    0.5
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

impl Config {
    pub fn config_dir() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("maildigest");
        Ok(dir)
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Where cached OAuth tokens are persisted between runs
    pub fn token_cache_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("token.json"))
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            anyhow::bail!(
                "Configuration file not found at {}\n\
                 Run 'maildigest init' to create one, or write it yourself. Example:\n\n\
                 recipient = \"you+digest@gmail.com\"\n\
                 account_link_index = 0\n\n\
                 [oauth]\n\
                 client_id = \"....apps.googleusercontent.com\"\n\n\
                 [ai]\n\
                 api_key_file = \"/home/you/.config/maildigest/api_key\"",
                path.display()
            );
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        let dir = path.parent().unwrap();

        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    pub fn ensure_dirs() -> Result<()> {
        fs::create_dir_all(Self::config_dir()?)?;
        Ok(())
    }
}
