mod config;
mod digest;
mod extract;
mod gmail;
mod oauth;
mod pipeline;
mod summarize;

use anyhow::Result;
use std::env;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::gmail::GmailClient;
use crate::oauth::GmailOAuth;
use crate::pipeline::{RunError, RunOutcome, run_digest};
use crate::summarize::LlmClient;

fn setup_logging() {
    use std::fs::OpenOptions;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,maildigest=info"));

    // One appended line per summarized email goes to this file
    let log_file = Config::config_dir()
        .ok()
        .map(|dir| dir.join("maildigest.log"))
        .and_then(|path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .ok()
        });

    if let Some(file) = log_file {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false),
            )
            .init();
    } else {
        // Fallback to stderr if file logging fails
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_usage() {
    eprintln!(
        r#"maildigest - Summarize unread Gmail into a single digest email

Usage: maildigest [command]

Commands:
    (none)      Summarize unread mail and send the digest
    auth        Authorize Gmail access (opens a browser)
    init        Write a starter configuration file
    help        Show this help message

Configuration file: ~/.config/maildigest/config.toml
"#
    );
}

fn run_init() -> Result<()> {
    let path = Config::config_path()?;
    if path.exists() {
        anyhow::bail!("Configuration already exists at {}", path.display());
    }

    let config = Config {
        recipient: "you+digest@gmail.com".to_string(),
        account_link_index: 0,
        max_results: 10,
        query: "is:unread".to_string(),
        oauth: config::OauthConfig::default(),
        ai: config::AiConfig::default(),
    };
    config.save()?;

    println!("Starter configuration written to {}", path.display());
    println!("Edit the recipient, oauth.client_id, and ai.api_key_file values,");
    println!("then run 'maildigest auth'.");
    Ok(())
}

async fn run_auth() -> Result<()> {
    let config = Config::load()?;
    Config::ensure_dirs()?;

    let oauth = GmailOAuth::new(&config.oauth)?;
    oauth.authorize_interactive().await
}

async fn run(config: &Config) -> Result<RunOutcome, RunError> {
    let oauth = GmailOAuth::new(&config.oauth).map_err(RunError::Auth)?;
    // The pipeline assumes a working credential; fail fast here if not
    oauth.access_token().await.map_err(RunError::Auth)?;

    let mailbox = GmailClient::new(oauth).map_err(RunError::Auth)?;
    let summarizer = LlmClient::new(&config.ai).map_err(RunError::Auth)?;

    run_digest(config, &mailbox, &summarizer).await
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("help") | Some("--help") | Some("-h") => {
            print_usage();
        }
        Some("init") => {
            if let Err(e) = run_init() {
                eprintln!("Error: {:#}", e);
                std::process::exit(1);
            }
        }
        Some("auth") => {
            setup_logging();
            if let Err(e) = run_auth().await {
                eprintln!("Authorization failed: {:#}", e);
                std::process::exit(2);
            }
        }
        Some(cmd) => {
            eprintln!("Unknown command: {}", cmd);
            print_usage();
            std::process::exit(1);
        }
        None => {
            setup_logging();

            let config = match Config::load().and_then(|c| {
                Config::ensure_dirs()?;
                Ok(c)
            }) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Error: {:#}", e);
                    std::process::exit(1);
                }
            };

            match run(&config).await {
                Ok(RunOutcome::Sent { count }) => {
                    println!("Digest with {} summaries sent.", count);
                }
                Ok(RunOutcome::NothingToDo) => {
                    println!("No unread mail to summarize.");
                }
                Ok(RunOutcome::SendFailed { count }) => {
                    // Non-fatal by design: the run completed, the dispatch did not
                    eprintln!(
                        "Computed {} summaries but failed to send the digest; see the log.",
                        count
                    );
                }
                Err(e @ RunError::Auth(_)) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(2);
                }
                Err(e @ RunError::Listing(_)) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(3);
                }
            }
        }
    }
}
