//! Application configuration

use std::env;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub public_url: String,

    // Database (absent = in-memory store)
    pub database_url: Option<String>,
    pub database_max_connections: u32,

    // Authentication
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub auth_timeout: Duration,

    // Chat limits
    pub max_message_chars: usize,
    /// How long an offline user's presence entry is kept
    pub presence_retention: Duration,

    // Attachments
    pub attachment_dir: PathBuf,
    pub max_attachment_bytes: usize,
    pub upload_timeout: Duration,

    // Logging
    pub log_json: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            public_url: env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),

            // Database
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5)?,

            // Authentication
            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },
            jwt_expiry_hours: parse_in_range("JWT_EXPIRY_HOURS", 24, 1..=MAX_JWT_EXPIRY_HOURS)?,
            auth_timeout: Duration::from_secs(parse_or("AUTH_TIMEOUT_SECS", 10)?),

            max_message_chars: parse_or("MAX_MESSAGE_CHARS", 2000)?,
            presence_retention: Duration::from_secs(parse_in_range(
                "PRESENCE_RETENTION_SECS",
                24 * 60 * 60,
                60..=30 * 24 * 60 * 60,
            )?),

            // Attachments
            attachment_dir: env::var("ATTACHMENT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/attachments")),
            max_attachment_bytes: parse_or("MAX_ATTACHMENT_BYTES", 5 * 1024 * 1024)?,
            upload_timeout: Duration::from_secs(parse_or("UPLOAD_TIMEOUT_SECS", 30)?),

            log_json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }

    /// Configuration suitable for tests and local tooling
    pub fn for_tests(jwt_secret: &str) -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_string(),
            public_url: "http://localhost:3000".to_string(),
            database_url: None,
            database_max_connections: 1,
            jwt_secret: jwt_secret.to_string(),
            jwt_expiry_hours: 1,
            auth_timeout: Duration::from_secs(2),
            max_message_chars: 2000,
            presence_retention: Duration::from_secs(60 * 60),
            attachment_dir: env::temp_dir().join("supportchat-attachments"),
            max_attachment_bytes: 1024 * 1024,
            upload_timeout: Duration::from_secs(5),
            log_json: false,
        }
    }
}

/// Longest accepted token lifetime (one year)
pub const MAX_JWT_EXPIRY_HOURS: i64 = 24 * 365;

/// Like [`parse_or`], rejecting values outside `range`
fn parse_in_range<T>(
    name: &'static str,
    default: T,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd,
{
    let value = parse_or(name, default)?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(name));
    }
    Ok(value)
}

/// Parse an optional numeric variable, falling back to `default` when unset
fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
