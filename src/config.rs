//! Runtime configuration: environment variables, overridden by CLI flags,
//! plus the API key lookup.

use crate::llm::{Provider, DEFAULT_MODEL, OPENROUTER_BASE_URL};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const API_KEY_VAR: &str = "OPENROUTER_API_KEY";
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

#[derive(Debug, Parser)]
#[command(name = "chat-box", version, about = "Chat with an LLM; history is kept per user")]
pub struct Cli {
    /// Skip the username prompt.
    #[arg(short, long)]
    pub username: Option<String>,

    /// Directory holding the `chat_history_<user>.json` files.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// OpenAI-compatible API root.
    #[arg(long)]
    pub base_url: Option<String>,

    #[arg(short, long)]
    pub model: Option<String>,

    #[arg(long)]
    pub temperature: Option<f32>,

    /// TOML file with an `OPENROUTER_API_KEY` entry.
    #[arg(long)]
    pub secrets_file: Option<PathBuf>,

    /// Talk to a local Ollama server instead; no API key needed.
    #[arg(long)]
    pub ollama: bool,

    #[arg(long, default_value = DEFAULT_OLLAMA_HOST)]
    pub ollama_host: String,

    /// Wait for the whole reply instead of printing it as it streams.
    #[arg(long)]
    pub no_stream: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub username: Option<String>,
    pub data_dir: PathBuf,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub secrets_file: PathBuf,
    pub ollama_host: Option<String>,
    pub stream: bool,
    /// `tracing` filter string, e.g. `"warn"` or `"chat_box_lib=debug"`.
    pub log_level: String,
    /// Emit log records as newline-delimited JSON.
    pub log_json: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            username: None,
            data_dir: PathBuf::from(env_or("CHAT_BOX_DATA_DIR", ".")),
            base_url: env_or("CHAT_BOX_BASE_URL", OPENROUTER_BASE_URL),
            model: env_or("CHAT_BOX_MODEL", DEFAULT_MODEL),
            temperature: parse_env("CHAT_BOX_TEMPERATURE", 0.0),
            secrets_file: PathBuf::from(env_or("CHAT_BOX_SECRETS_FILE", "secrets.toml")),
            ollama_host: None,
            stream: true,
            log_level: env_or("CHAT_BOX_LOG", "warn"),
            log_json: std::env::var("CHAT_BOX_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    /// Flags win over the environment.
    pub fn with_cli(mut self, cli: Cli) -> Self {
        if cli.username.is_some() {
            self.username = cli.username;
        }
        if let Some(dir) = cli.data_dir {
            self.data_dir = dir;
        }
        if let Some(url) = cli.base_url {
            self.base_url = url;
        }
        if let Some(model) = cli.model {
            self.model = model;
        }
        if let Some(temperature) = cli.temperature {
            self.temperature = temperature;
        }
        if let Some(path) = cli.secrets_file {
            self.secrets_file = path;
        }
        if cli.ollama {
            self.ollama_host = Some(cli.ollama_host);
        }
        self.stream = !cli.no_stream;
        self
    }

    /// Build the completion backend. Hosted backends need the API key.
    pub fn provider(&self) -> Result<Provider, ConfigError> {
        self.provider_with_key(std::env::var(API_KEY_VAR).ok())
    }

    fn provider_with_key(&self, env_key: Option<String>) -> Result<Provider, ConfigError> {
        let mut provider = match &self.ollama_host {
            Some(host) => Provider::ollama(host, self.model.clone()),
            None => {
                let mut provider =
                    Provider::openrouter(resolve_api_key(env_key, &self.secrets_file)?);
                let config = provider.config_mut();
                config.base_url = self.base_url.clone();
                config.model = self.model.clone();
                provider
            }
        };
        provider.config_mut().temperature = self.temperature;
        Ok(provider)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("OPENROUTER_API_KEY is not set and {} does not provide it", path.display())]
    MissingSecret { path: PathBuf },
    #[error("Cannot read secrets file {}: {source}", path.display())]
    SecretsFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid secrets file {}: {source}", path.display())]
    SecretsParse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Deserialize)]
struct Secrets {
    #[serde(rename = "OPENROUTER_API_KEY")]
    openrouter_api_key: Option<String>,
}

/// The environment value wins; otherwise the key comes from the secrets
/// file. A missing file is the same as a file without the key.
pub fn resolve_api_key(from_env: Option<String>, secrets_file: &Path) -> Result<String, ConfigError> {
    if let Some(key) = from_env.filter(|k| !k.trim().is_empty()) {
        return Ok(key.trim().to_string());
    }

    let text = match std::fs::read_to_string(secrets_file) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::MissingSecret {
                path: secrets_file.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(ConfigError::SecretsFile {
                path: secrets_file.to_path_buf(),
                source,
            })
        }
    };

    let secrets: Secrets = toml::from_str(&text).map_err(|source| ConfigError::SecretsParse {
        path: secrets_file.to_path_buf(),
        source,
    })?;

    secrets
        .openrouter_api_key
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ConfigError::MissingSecret {
            path: secrets_file.to_path_buf(),
        })
}

/// Mask API keys for display.
pub fn mask_secret(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let chars: Vec<char> = value.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    } else {
        "****".to_string()
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn base() -> Config {
        Config {
            username: None,
            data_dir: PathBuf::from("."),
            base_url: OPENROUTER_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
            temperature: 0.0,
            secrets_file: PathBuf::from("secrets.toml"),
            ollama_host: None,
            stream: true,
            log_level: "warn".into(),
            log_json: false,
        }
    }

    #[test]
    fn flags_override_environment_defaults() {
        let cli = Cli::parse_from([
            "chat-box",
            "--username",
            "alice",
            "--data-dir",
            "/tmp/chats",
            "--model",
            "openai/gpt-4o-mini",
            "--temperature",
            "0.7",
            "--no-stream",
        ]);

        let config = base().with_cli(cli);

        assert_eq!(config.username.as_deref(), Some("alice"));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/chats"));
        assert_eq!(config.model, "openai/gpt-4o-mini");
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.base_url, OPENROUTER_BASE_URL);
        assert!(!config.stream);
        assert!(config.ollama_host.is_none());
    }

    #[test]
    fn ollama_flag_builds_keyless_provider() {
        let cli = Cli::parse_from(["chat-box", "--ollama", "--model", "llama3"]);
        let provider = base().with_cli(cli).provider().unwrap();

        assert!(matches!(provider, Provider::Ollama(_)));
        assert_eq!(provider.config().base_url, "http://localhost:11434/v1");
        assert_eq!(provider.config().model, "llama3");
    }

    #[test]
    fn hosted_provider_starts_from_openrouter_and_applies_settings() {
        let provider = base().provider_with_key(Some("sk-or-env".into())).unwrap();
        assert!(matches!(provider, Provider::OpenAi(_)));
        assert_eq!(provider.config().base_url, OPENROUTER_BASE_URL);
        assert_eq!(provider.config().model, DEFAULT_MODEL);
        assert_eq!(provider.config().api_key, "sk-or-env");

        let cli = Cli::parse_from([
            "chat-box",
            "--base-url",
            "http://localhost:8080/v1",
            "--model",
            "openai/gpt-4o-mini",
            "--temperature",
            "0.5",
        ]);
        let provider = base()
            .with_cli(cli)
            .provider_with_key(Some("sk-or-env".into()))
            .unwrap();
        let config = provider.config();
        assert_eq!(config.base_url, "http://localhost:8080/v1");
        assert_eq!(config.model, "openai/gpt-4o-mini");
        assert_eq!(config.temperature, 0.5);
    }

    #[test]
    fn environment_key_wins_over_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("secrets.toml");
        std::fs::write(&path, "OPENROUTER_API_KEY = \"from-file\"\n").unwrap();

        let key = resolve_api_key(Some(" from-env ".into()), &path).unwrap();
        assert_eq!(key, "from-env");
    }

    #[test]
    fn key_is_read_from_secrets_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("secrets.toml");
        std::fs::write(&path, "OTHER = 1\nOPENROUTER_API_KEY = \"sk-or-file\"\n").unwrap();

        assert_eq!(resolve_api_key(None, &path).unwrap(), "sk-or-file");
        assert_eq!(resolve_api_key(Some("  ".into()), &path).unwrap(), "sk-or-file");
    }

    #[test]
    fn missing_key_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let absent = temp_dir.path().join("nope.toml");
        assert!(matches!(
            resolve_api_key(None, &absent),
            Err(ConfigError::MissingSecret { .. })
        ));

        let empty = temp_dir.path().join("secrets.toml");
        std::fs::write(&empty, "OPENROUTER_API_KEY = \"\"\n").unwrap();
        assert!(matches!(
            resolve_api_key(None, &empty),
            Err(ConfigError::MissingSecret { .. })
        ));
    }

    #[test]
    fn broken_secrets_file_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("secrets.toml");
        std::fs::write(&path, "OPENROUTER_API_KEY = \n").unwrap();

        assert!(matches!(
            resolve_api_key(None, &path),
            Err(ConfigError::SecretsParse { .. })
        ));
    }

    #[test]
    fn masks_keys() {
        assert_eq!(mask_secret("sk-or-v1-0123456789"), "sk-o...6789");
        assert_eq!(mask_secret("short"), "****");
        assert_eq!(mask_secret(""), "");
    }
}
