//! OAuth2 support for the Gmail API using the installed app flow
//!
//! Opens a browser for consent, catches the redirect on a loopback listener,
//! exchanges the authorization code for tokens, and caches them in a local
//! JSON file so subsequent runs only need the refresh-token grant.

use anyhow::{Context, Result, bail};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{Config, OauthConfig};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Scopes: read messages, send the digest. Nothing else.
const GMAIL_SCOPES: &str =
    "https://www.googleapis.com/auth/gmail.readonly https://www.googleapis.com/auth/gmail.send";

/// Tokens as returned by Google's token endpoint
#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Error response from Google
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[allow(dead_code)]
    error_description: Option<String>,
}

/// Cached tokens persisted between runs (the only state this tool keeps)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// When the access token expires; None means unknown, treated as expired
    pub expires_at: Option<DateTime<Utc>>,
}

impl CachedTokens {
    /// Expired check with a 60-second safety margin
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(exp) => Utc::now() >= exp - chrono::Duration::seconds(60),
            None => true,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read token cache: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse token cache: {}", path.display()))
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize tokens")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write token cache: {}", path.display()))?;
        Ok(())
    }
}

fn expiry_from_now(expires_in: Option<u64>) -> Option<DateTime<Utc>> {
    expires_in.map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64))
}

/// PKCE code verifier and challenge
struct PkceChallenge {
    verifier: String,
    challenge: String,
}

impl PkceChallenge {
    fn new() -> Result<Self> {
        let mut verifier_bytes = [0u8; 32];
        getrandom::fill(&mut verifier_bytes)
            .map_err(|e| anyhow::anyhow!("Failed to generate random bytes: {}", e))?;
        let verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(verifier_bytes);

        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let challenge_hash = hasher.finalize();
        let challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(challenge_hash);

        Ok(Self {
            verifier,
            challenge,
        })
    }
}

/// Gmail OAuth2 client for the installed app flow
pub struct GmailOAuth {
    client_id: String,
    client_secret: Option<String>,
    http_client: reqwest::Client,
    token_cache: PathBuf,
}

impl GmailOAuth {
    pub fn new(oauth: &OauthConfig) -> Result<Self> {
        let client_id = oauth.resolve_client_id()?;
        let client_secret = oauth.resolve_client_secret();

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client_id,
            client_secret,
            http_client,
            token_cache: Config::token_cache_path()?,
        })
    }

    /// Return a valid access token, refreshing the cached one if expired.
    ///
    /// Requires a prior 'maildigest auth' run to have seeded the cache.
    pub async fn access_token(&self) -> Result<String> {
        let mut tokens = CachedTokens::load(&self.token_cache).context(
            "No cached OAuth tokens. Run 'maildigest auth' to authorize this tool first.",
        )?;

        if !tokens.is_expired() {
            return Ok(tokens.access_token);
        }

        tracing::debug!("Access token expired, refreshing");
        let response = self.refresh(&tokens.refresh_token).await?;

        tokens.access_token = response.access_token;
        tokens.expires_at = expiry_from_now(response.expires_in);
        if let Some(refresh) = response.refresh_token {
            tokens.refresh_token = refresh;
        }
        tokens.store(&self.token_cache)?;

        Ok(tokens.access_token)
    }

    /// Run the full interactive consent flow and seed the token cache
    pub async fn authorize_interactive(&self) -> Result<()> {
        let flow = self.start_auth_flow()?;

        println!("Opening browser for Google authorization...");
        if let Err(e) = open::that(&flow.auth_url) {
            tracing::warn!("Failed to open browser: {}", e);
            println!("Open this URL manually:\n{}", flow.auth_url);
        }

        let code = Self::wait_for_callback(&flow)?;
        let response = self
            .exchange_code(&code, &flow.redirect_uri, &flow.pkce_verifier)
            .await?;

        let refresh_token = response
            .refresh_token
            .context("Google did not return a refresh token; revoke access and retry")?;

        let tokens = CachedTokens {
            access_token: response.access_token,
            refresh_token,
            expires_at: expiry_from_now(response.expires_in),
        };
        tokens.store(&self.token_cache)?;

        println!("Authorization complete. Tokens cached at {}", self.token_cache.display());
        Ok(())
    }

    /// Start the OAuth flow: bind the loopback listener and build the consent URL
    fn start_auth_flow(&self) -> Result<AuthFlowState> {
        let listener = TcpListener::bind("127.0.0.1:0").context("Failed to bind to local port")?;
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://127.0.0.1:{}", port);

        let pkce = PkceChallenge::new()?;

        // Random state parameter for CSRF protection
        let mut state_bytes = [0u8; 16];
        getrandom::fill(&mut state_bytes)
            .map_err(|e| anyhow::anyhow!("Failed to generate random state: {}", e))?;
        let state = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(state_bytes);

        let auth_url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&code_challenge={}&code_challenge_method=S256&access_type=offline&prompt=consent&state={}",
            GOOGLE_AUTH_URL,
            urlencode(&self.client_id),
            urlencode(&redirect_uri),
            urlencode(GMAIL_SCOPES),
            urlencode(&pkce.challenge),
            urlencode(&state),
        );

        tracing::debug!("OAuth2 redirect URI: {}", redirect_uri);

        Ok(AuthFlowState {
            auth_url,
            redirect_uri,
            pkce_verifier: pkce.verifier,
            state,
            listener,
        })
    }

    /// Wait for the OAuth callback and extract the authorization code
    fn wait_for_callback(flow: &AuthFlowState) -> Result<String> {
        use std::io::ErrorKind;

        flow.listener.set_nonblocking(true)?;

        // Poll for the redirect with a 2 minute timeout
        let timeout = Duration::from_secs(120);
        let start = std::time::Instant::now();

        let mut stream = loop {
            match flow.listener.accept() {
                Ok((stream, _)) => break stream,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if start.elapsed() > timeout {
                        bail!("OAuth callback timed out. Please try again.");
                    }
                    std::thread::sleep(Duration::from_millis(100));
                    continue;
                }
                Err(e) => {
                    return Err(e).context("Failed to accept OAuth callback connection");
                }
            }
        };

        let mut reader = BufReader::new(&stream);
        let mut request_line = String::new();
        reader.read_line(&mut request_line)?;

        let parse_query_param = |query: &str, param: &str| -> Option<String> {
            query
                .split('&')
                .find(|p| p.starts_with(&format!("{}=", param)))
                .map(|p| p.trim_start_matches(&format!("{}=", param)).to_string())
        };

        let query = request_line
            .split_whitespace()
            .nth(1)
            .and_then(|path| path.split('?').nth(1))
            .unwrap_or("");

        if let Some(error) = parse_query_param(query, "error") {
            let error = error.split(' ').next().unwrap_or(&error);
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\
                <html><body><h1>Authorization Failed</h1>\
                <p>Error: {}</p>\
                <p>Please close this window and try again.</p></body></html>",
                crate::digest::escape_html(error)
            );
            stream.write_all(response.as_bytes()).ok();

            bail!("Authorization failed: {}", error);
        }

        // Validate state parameter for CSRF protection
        let returned_state =
            parse_query_param(query, "state").context("No state parameter in callback")?;
        if returned_state != flow.state {
            bail!("State parameter mismatch - possible CSRF attack");
        }

        let code = parse_query_param(query, "code")
            .context("No authorization code in callback")?;

        let response = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\
            <html><body><h1>Authorization successful!</h1>\
            <p>You can close this window and return to maildigest.</p>\
            <script>window.close();</script></body></html>";
        stream.write_all(response.as_bytes())?;

        Ok(code)
    }

    /// Exchange authorization code for tokens
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        pkce_verifier: &str,
    ) -> Result<TokenResponse> {
        let mut params = vec![
            ("client_id", self.client_id.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
            ("code_verifier", pkce_verifier),
        ];

        // client_secret is required for some client types
        let secret_str;
        if let Some(ref secret) = self.client_secret {
            secret_str = secret.clone();
            params.push(("client_secret", &secret_str));
        }

        let response = self
            .http_client
            .post(GOOGLE_TOKEN_URL)
            .form(&params)
            .send()
            .await
            .context("Failed to exchange authorization code")?;

        if !response.status().is_success() {
            let error: ErrorResponse = response.json().await.unwrap_or(ErrorResponse {
                error: "unknown_error".to_string(),
                error_description: None,
            });
            bail!("Token exchange failed: {}", error.error);
        }

        response
            .json()
            .await
            .context("Failed to parse token response")
    }

    /// Refresh an access token using the stored refresh token
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let mut params = vec![
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let secret_str;
        if let Some(ref secret) = self.client_secret {
            secret_str = secret.clone();
            params.push(("client_secret", &secret_str));
        }

        let response = self
            .http_client
            .post(GOOGLE_TOKEN_URL)
            .form(&params)
            .send()
            .await
            .context("Failed to refresh token")?;

        if !response.status().is_success() {
            let error: ErrorResponse = response.json().await.unwrap_or(ErrorResponse {
                error: "unknown_error".to_string(),
                error_description: None,
            });
            bail!("Token refresh failed: {}", error.error);
        }

        response
            .json()
            .await
            .context("Failed to parse refresh token response")
    }
}

/// State for an in-progress OAuth flow
struct AuthFlowState {
    auth_url: String,
    redirect_uri: String,
    pkce_verifier: String,
    state: String,
    listener: TcpListener,
}

/// URL-encode a string
fn urlencode(s: &str) -> String {
    let mut result = String::new();
    for c in s.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '~' => result.push(c),
            _ => {
                for b in c.to_string().as_bytes() {
                    result.push_str(&format!("%{:02X}", b));
                }
            }
        }
    }
    result
}
