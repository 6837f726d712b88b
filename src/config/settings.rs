//! Process settings from environment (`.env` honored via dotenvy).

use crate::error::ConfigError;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionBackend {
    None,
    Memory,
    Postgres,
}

impl FromStr for SessionBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "" | "none" => Ok(SessionBackend::None),
            "memory" => Ok(SessionBackend::Memory),
            "postgres" | "pg" => Ok(SessionBackend::Postgres),
            _ => Err(ConfigError::Validation(format!(
                "invalid SESSION_STORE: {} (expected none, memory or postgres)",
                s
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub models_path: String,
    pub body_limit_bytes: usize,
    pub request_timeout_ms: Option<u64>,
    pub session_store: SessionBackend,
    /// Commit the session after every request, not only after successful ones.
    pub session_auto_commit: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_url: None,
            bind_addr: "0.0.0.0:3000".into(),
            models_path: "models".into(),
            body_limit_bytes: 1024 * 1024,
            request_timeout_ms: None,
            session_store: SessionBackend::None,
            session_auto_commit: true,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Settings::default();
        let parse_num = |key: &str, raw: String| {
            raw.trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::Validation(format!("{} must be a number, got '{}'", key, raw)))
        };
        let body_limit_bytes = match lookup("BODY_LIMIT_BYTES") {
            Some(raw) => parse_num("BODY_LIMIT_BYTES", raw)? as usize,
            None => defaults.body_limit_bytes,
        };
        let request_timeout_ms = lookup("REQUEST_TIMEOUT_MS")
            .map(|raw| parse_num("REQUEST_TIMEOUT_MS", raw))
            .transpose()?;
        let session_store = lookup("SESSION_STORE")
            .map(|s| s.parse())
            .transpose()?
            .unwrap_or(defaults.session_store);
        let session_auto_commit = lookup("SESSION_AUTO_COMMIT")
            .map(|s| !matches!(s.to_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(defaults.session_auto_commit);
        Ok(Settings {
            database_url: lookup("DATABASE_URL").filter(|s| !s.is_empty()),
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            models_path: lookup("MODELS_PATH").unwrap_or(defaults.models_path),
            body_limit_bytes,
            request_timeout_ms,
            session_store,
            session_auto_commit,
        })
    }
}
