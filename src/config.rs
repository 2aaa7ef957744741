use serde::Deserialize;
use std::env;
use std::sync::OnceLock;
use thiserror::Error;

const DEFAULT_SUMMARY_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_MAX_IN_FLIGHT: usize = 4;
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_MS: u64 = 500;
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1000;
/// Attachment size limit applied when `MAX_ATTACHMENT_BYTES` is unset.
pub const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 25 * 1024 * 1024;
const DEFAULT_MAILBOX_ROOT: &str = "downloads";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the Inbox Digest server and CLI.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Backend used for summarization calls.
    pub summary_provider: SummaryProvider,
    /// Default model identifier passed to the backend when a request does not name one.
    pub summary_model: String,
    /// API key for OpenAI-compatible backends.
    pub openai_api_key: Option<String>,
    /// Optional override for the OpenAI-compatible base URL.
    pub openai_base_url: Option<String>,
    /// Optional override for the Ollama runtime URL.
    pub ollama_url: Option<String>,
    /// Optional override for the automatic per-chunk token budget.
    pub summary_chunk_tokens: Option<usize>,
    /// Maximum number of backend calls in flight at once.
    pub summary_max_in_flight: usize,
    /// Timeout applied to every individual backend call.
    pub summary_call_timeout_secs: u64,
    /// Attempts allowed per backend call, including the first one.
    pub summary_max_attempts: u32,
    /// Base delay for exponential backoff between attempts.
    pub summary_retry_base_ms: u64,
    /// Upper bound on tokens the backend may generate per call.
    pub summary_max_output_tokens: u32,
    /// Largest attachment (in bytes) the extraction dispatcher accepts.
    pub max_attachment_bytes: usize,
    /// Root directory of the on-disk mailbox.
    pub mailbox_root: String,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported summarization backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryProvider {
    /// OpenAI-compatible chat completions API.
    OpenAI,
    /// Local Ollama runtime.
    Ollama,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let summary_provider = match load_env_optional("SUMMARY_PROVIDER") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("SUMMARY_PROVIDER".to_string()))?,
            None => SummaryProvider::OpenAI,
        };
        let openai_api_key = load_env_optional("OPENAI_API_KEY");
        if summary_provider == SummaryProvider::OpenAI && openai_api_key.is_none() {
            return Err(ConfigError::MissingVariable("OPENAI_API_KEY".to_string()));
        }

        let summary_max_in_flight =
            parse_optional("SUMMARY_MAX_IN_FLIGHT")?.unwrap_or(DEFAULT_MAX_IN_FLIGHT);
        if summary_max_in_flight == 0 {
            return Err(ConfigError::InvalidValue("SUMMARY_MAX_IN_FLIGHT".into()));
        }
        let summary_max_attempts =
            parse_optional("SUMMARY_MAX_ATTEMPTS")?.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if summary_max_attempts == 0 {
            return Err(ConfigError::InvalidValue("SUMMARY_MAX_ATTEMPTS".into()));
        }

        Ok(Self {
            summary_provider,
            summary_model: load_env_optional("SUMMARY_MODEL")
                .unwrap_or_else(|| DEFAULT_SUMMARY_MODEL.to_string()),
            openai_api_key,
            openai_base_url: load_env_optional("OPENAI_BASE_URL"),
            ollama_url: load_env_optional("OLLAMA_URL"),
            summary_chunk_tokens: parse_optional("SUMMARY_CHUNK_TOKENS")?,
            summary_max_in_flight,
            summary_call_timeout_secs: parse_optional("SUMMARY_CALL_TIMEOUT_SECS")?
                .unwrap_or(DEFAULT_CALL_TIMEOUT_SECS),
            summary_max_attempts,
            summary_retry_base_ms: parse_optional("SUMMARY_RETRY_BASE_MS")?
                .unwrap_or(DEFAULT_RETRY_BASE_MS),
            summary_max_output_tokens: parse_optional("SUMMARY_MAX_OUTPUT_TOKENS")?
                .unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
            max_attachment_bytes: parse_optional("MAX_ATTACHMENT_BYTES")?
                .unwrap_or(DEFAULT_MAX_ATTACHMENT_BYTES),
            mailbox_root: load_env_optional("MAILBOX_ROOT")
                .unwrap_or_else(|| DEFAULT_MAILBOX_ROOT.to_string()),
            server_port: parse_optional("SERVER_PORT")?,
        })
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

impl std::str::FromStr for SummaryProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        provider = ?config.summary_provider,
        model = %config.summary_model,
        chunk_tokens = ?config.summary_chunk_tokens,
        max_in_flight = config.summary_max_in_flight,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
