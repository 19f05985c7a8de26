//! Process-level helpers: `.env` loading and typed configuration.

pub mod config;

use std::{env, net::AddrParseError, net::SocketAddr, path::PathBuf};

pub use config::{AppConfig, ConfigError, Environment, SignatureMode, WebhookSettings};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
const BIND_ADDR_VAR: &str = "APP_BIND_ADDR";

/// Applies the nearest `.env` file, if any, and returns its path.
///
/// Variables already present in the process environment take precedence.
pub fn load_env_file() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

/// Resolves `APP_BIND_ADDR`; unset or blank falls back to [`DEFAULT_BIND_ADDR`].
pub fn server_bind_address() -> Result<SocketAddr, AddrParseError> {
    let configured = env::var(BIND_ADDR_VAR)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    configured.as_deref().unwrap_or(DEFAULT_BIND_ADDR).parse()
}

// Every test that touches process environment variables holds this lock.
#[cfg(test)]
pub(crate) static ENV_GUARD: std::sync::LazyLock<std::sync::Mutex<()>> =
    std::sync::LazyLock::new(|| std::sync::Mutex::new(()));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_or_blank_address_uses_default() {
        let _lock = ENV_GUARD.lock().expect("env guard poisoned");
        env::remove_var(BIND_ADDR_VAR);
        assert_eq!(
            server_bind_address().expect("default parses").to_string(),
            DEFAULT_BIND_ADDR
        );

        env::set_var(BIND_ADDR_VAR, "   ");
        assert_eq!(
            server_bind_address().expect("blank falls back").to_string(),
            DEFAULT_BIND_ADDR
        );
        env::remove_var(BIND_ADDR_VAR);
    }

    #[test]
    fn configured_address_is_parsed_or_rejected() {
        let _lock = ENV_GUARD.lock().expect("env guard poisoned");
        env::set_var(BIND_ADDR_VAR, " 0.0.0.0:9000 ");
        assert_eq!(
            server_bind_address().expect("custom address").to_string(),
            "0.0.0.0:9000"
        );

        env::set_var(BIND_ADDR_VAR, "localhost");
        assert!(server_bind_address().is_err());
        env::remove_var(BIND_ADDR_VAR);
    }
}
