use std::{env, fmt, net::SocketAddr, str::FromStr};

use super::server_bind_address;

pub use hookboard_core::validator::{DEFAULT_MAX_MESSAGE_LEN, DEFAULT_MAX_TITLE_LEN};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://hookboard.db?mode=rwc";
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;
pub const DEFAULT_FEED_LIMIT: usize = 50;
pub const DEFAULT_SSE_HEARTBEAT_SECS: u64 = 25;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Whether incoming webhooks must carry a valid `X-Webhook-Signature`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureMode {
    Required,
    Disabled,
}

impl SignatureMode {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "required" => Ok(Self::Required),
            "disabled" => Ok(Self::Disabled),
            other => Err(ConfigError::InvalidSignatureMode(other.to_string())),
        }
    }

    pub fn is_required(self) -> bool {
        matches!(self, Self::Required)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Disabled => "disabled",
        }
    }
}

/// Settings for the ingestion endpoint.
#[derive(Clone)]
pub struct WebhookSettings {
    pub secret: Option<String>,
    pub signature_mode: SignatureMode,
    pub max_body_bytes: usize,
    pub max_title_len: usize,
    pub max_message_len: usize,
}

impl fmt::Debug for WebhookSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookSettings")
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .field("signature_mode", &self.signature_mode)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("max_title_len", &self.max_title_len)
            .field("max_message_len", &self.max_message_len)
            .finish()
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub webhook: WebhookSettings,
    pub feed_limit: usize,
    pub sse_heartbeat_secs: u64,
    pub request_timeout_secs: u64,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;
        let database_url =
            read_var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let secret = read_var("WEBHOOK_SECRET");
        let signature_mode = match read_var("WEBHOOK_SIGNATURE_MODE") {
            Some(value) => SignatureMode::from_str(&value)?,
            None => SignatureMode::Required,
        };
        if signature_mode.is_required() && secret.is_none() {
            return Err(ConfigError::MissingSecret);
        }

        let webhook = WebhookSettings {
            secret,
            signature_mode,
            max_body_bytes: read_number("WEBHOOK_MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES)?,
            max_title_len: read_number("WEBHOOK_MAX_TITLE_LEN", DEFAULT_MAX_TITLE_LEN)?,
            max_message_len: read_number("WEBHOOK_MAX_MESSAGE_LEN", DEFAULT_MAX_MESSAGE_LEN)?,
        };

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            webhook,
            feed_limit: read_number("FEED_LIMIT", DEFAULT_FEED_LIMIT)?,
            sse_heartbeat_secs: read_number("SSE_HEARTBEAT_SECS", DEFAULT_SSE_HEARTBEAT_SECS)?,
            request_timeout_secs: read_number(
                "REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?,
        })
    }
}

fn read_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_number<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
{
    let Some(raw) = read_var(name) else {
        return Ok(default);
    };
    match raw.parse::<T>() {
        Ok(value) if value != T::default() => Ok(value),
        _ => Err(ConfigError::InvalidNumber { name, value: raw }),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    InvalidSignatureMode(String),
    MissingSecret,
    InvalidNumber { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::InvalidSignatureMode(value) => write!(
                f,
                "WEBHOOK_SIGNATURE_MODE must be 'required' or 'disabled' (got {value})"
            ),
            Self::MissingSecret => write!(
                f,
                "WEBHOOK_SECRET must be set when WEBHOOK_SIGNATURE_MODE is 'required'"
            ),
            Self::InvalidNumber { name, value } => {
                write!(f, "{name} must be a positive integer (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
