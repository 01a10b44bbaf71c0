pub mod chat;
pub mod config;
pub mod llm;
pub mod store;
pub mod terminal;

use anyhow::Context;
use chat::ChatSession;
use clap::Parser;
use config::{mask_secret, Cli, Config};
use std::sync::Arc;
use store::ConversationStore;
use tracing::info;

/// Parse flags, open the history store and chat until the user leaves.
pub async fn run() -> anyhow::Result<()> {
    let config = Config::from_env().with_cli(Cli::parse());
    init_tracing(&config);

    // The API key is required before anything else happens.
    let provider = config
        .provider()
        .context("cannot configure the completion client")?;
    info!(
        base_url = %provider.config().base_url,
        model = %provider.config().model,
        api_key = %mask_secret(&provider.config().api_key),
        "completion client ready"
    );

    let store = ConversationStore::new(&config.data_dir).with_context(|| {
        format!("cannot open history directory {}", config.data_dir.display())
    })?;

    let mut terminal = terminal::stdio();
    let username = match config.username.clone() {
        Some(name) => name,
        None => match terminal.ask_username().await? {
            Some(name) => name,
            None => return Ok(()),
        },
    };

    let mut session = ChatSession::start(store, Arc::new(provider), username.as_str())
        .with_context(|| format!("cannot load history for {username}"))?;

    terminal.run(&mut session, config.stream).await?;
    info!(username = %username, messages = session.history().len(), "session ended");
    Ok(())
}

fn init_tracing(config: &Config) {
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match config.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: CHAT_BOX_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'warn'",
                    config.log_level, e
                );
                tracing_subscriber::EnvFilter::new("warn")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
