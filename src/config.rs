use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::constants::{DEFAULT_USER_AGENT, TELEGRAM_API_URL};
use crate::notify::MessageFormat;
use crate::pipeline::CheckpointPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Source page
    pub thread_url: String,
    pub base_url: String,

    // Checkpoint
    pub checkpoint_path: PathBuf,

    // Telegram
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,
    pub telegram_api_url: String,
    pub message_format: MessageFormat,
    pub disable_link_preview: bool,

    // Page markup vocabulary
    pub post_container_class: String,
    pub post_content_class: String,
    pub post_controls_class: String,
    pub quote_block_class: String,
    pub permalink_class: String,
    pub excluded_image_hosts: Vec<String>,

    // HTTP
    pub http_timeout: Duration,
    pub user_agent: String,

    // Scheduling
    pub poll_interval: Option<Duration>,
    pub checkpoint_policy: CheckpointPolicy,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let thread_url = required_env("THREAD_URL")?;
        let base_url = match optional_env("BASE_URL") {
            Some(base) => base,
            None => derive_base_url(&thread_url)?,
        };

        Ok(Self {
            // Source page
            thread_url,
            base_url,

            // Checkpoint
            checkpoint_path: PathBuf::from(env_or_default("CHECKPOINT_PATH", "./data/last_id.txt")),

            // Telegram
            telegram_bot_token: required_env("TELEGRAM_BOT_TOKEN")?,
            telegram_chat_id: required_env("TELEGRAM_CHAT_ID")?,
            telegram_api_url: env_or_default("TELEGRAM_API_URL", TELEGRAM_API_URL),
            message_format: parse_message_format(&env_or_default("MESSAGE_FORMAT", "plain"))?,
            disable_link_preview: parse_env_bool("DISABLE_LINK_PREVIEW", false)?,

            // Page markup vocabulary
            post_container_class: env_or_default("POST_CONTAINER_CLASS", "postcontainer"),
            post_content_class: env_or_default("POST_CONTENT_CLASS", "postrow"),
            post_controls_class: env_or_default("POST_CONTROLS_CLASS", "nodecontrols"),
            quote_block_class: env_or_default("QUOTE_BLOCK_CLASS", "bbcode_container"),
            permalink_class: env_or_default("PERMALINK_CLASS", "postcounter"),
            excluded_image_hosts: parse_list(&env_or_default("EXCLUDED_IMAGE_HOSTS", "")),

            // HTTP
            http_timeout: Duration::from_secs(parse_env_u64("HTTP_TIMEOUT_SECS", 30)?),
            user_agent: env_or_default("USER_AGENT", DEFAULT_USER_AGENT),

            // Scheduling
            poll_interval: parse_env_optional_u64("POLL_INTERVAL_SECS")?.map(Duration::from_secs),
            checkpoint_policy: if parse_env_bool("ADVANCE_ON_NOTIFY_FAILURE", true)? {
                CheckpointPolicy::AdvanceOnFailure
            } else {
                CheckpointPolicy::HoldOnFailure
            },
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("THREAD_URL", &self.thread_url),
            ("BASE_URL", &self.base_url),
            ("TELEGRAM_API_URL", &self.telegram_api_url),
        ] {
            validate_url(name, value)?;
        }
        if self.telegram_bot_token.trim().is_empty() {
            return Err(invalid("TELEGRAM_BOT_TOKEN", "cannot be empty"));
        }
        if self.telegram_chat_id.trim().is_empty() {
            return Err(invalid("TELEGRAM_CHAT_ID", "cannot be empty"));
        }
        for (name, value) in [
            ("POST_CONTAINER_CLASS", &self.post_container_class),
            ("POST_CONTENT_CLASS", &self.post_content_class),
            ("POST_CONTROLS_CLASS", &self.post_controls_class),
            ("QUOTE_BLOCK_CLASS", &self.quote_block_class),
            ("PERMALINK_CLASS", &self.permalink_class),
        ] {
            if value.is_empty() || value.chars().any(char::is_whitespace) {
                return Err(invalid(name, "must be a single class name"));
            }
        }
        if self.http_timeout.is_zero() {
            return Err(invalid("HTTP_TIMEOUT_SECS", "must be at least 1"));
        }
        if self.poll_interval.is_some_and(|d| d.is_zero()) {
            return Err(invalid("POLL_INTERVAL_SECS", "must be at least 1"));
        }
        Ok(())
    }

    /// Configuration with placeholder values, for tests that override a few fields.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            thread_url: "https://forum.example.com/threads/1-test/page2".to_string(),
            base_url: "https://forum.example.com/".to_string(),
            checkpoint_path: PathBuf::from("./last_id.txt"),
            telegram_bot_token: "123:test-token".to_string(),
            telegram_chat_id: "42".to_string(),
            telegram_api_url: TELEGRAM_API_URL.to_string(),
            message_format: MessageFormat::Plain,
            disable_link_preview: false,
            post_container_class: "postcontainer".to_string(),
            post_content_class: "postrow".to_string(),
            post_controls_class: "nodecontrols".to_string(),
            quote_block_class: "bbcode_container".to_string(),
            permalink_class: "postcounter".to_string(),
            excluded_image_hosts: Vec::new(),
            http_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            poll_interval: None,
            checkpoint_policy: CheckpointPolicy::AdvanceOnFailure,
        }
    }
}

fn invalid(name: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message: message.to_string(),
    }
}

fn validate_url(name: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(invalid(name, "cannot be empty"));
    }
    let url = Url::parse(value).map_err(|e| invalid(name, &format!("not a valid URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(name, "must be an http(s) URL"));
    }
    Ok(())
}

/// Origin of the thread URL with a trailing slash, e.g. `https://forum.example.com/`.
fn derive_base_url(thread_url: &str) -> Result<String, ConfigError> {
    let url = Url::parse(thread_url)
        .map_err(|e| invalid("THREAD_URL", &format!("not a valid URL: {e}")))?;
    url.join("/")
        .map(String::from)
        .map_err(|e| invalid("BASE_URL", &format!("cannot derive from THREAD_URL: {e}")))
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    Ok(parse_env_optional_u64(name)?.unwrap_or(default))
}

fn parse_env_optional_u64(name: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => {
            val.parse()
                .map(Some)
                .map_err(|e| ConfigError::ParseInt {
                    name: name.to_string(),
                    source: e,
                })
        }
        _ => Ok(None),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}

fn parse_message_format(value: &str) -> Result<MessageFormat, ConfigError> {
    match value.to_lowercase().as_str() {
        "plain" | "text" => Ok(MessageFormat::Plain),
        "markdown" | "markdownv2" => Ok(MessageFormat::Markdown),
        "html" => Ok(MessageFormat::Html),
        _ => Err(invalid(
            "MESSAGE_FORMAT",
            &format!("must be 'plain', 'markdown' or 'html', got '{value}'"),
        )),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}
