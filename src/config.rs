//! Environment variable based configuration.

use std::env;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    #[allow(dead_code)]
    pub cors_origins: Vec<String>,
    pub presence: PresenceConfig,
    pub typing: TypingConfig,
    pub matching: MatchingConfig,
    pub log_level: String,
}

/// Presence tracker settings
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// Seconds a disconnected user stays online before the offline flip.
    pub grace_secs: u64,
}

/// Typing indicator settings
#[derive(Debug, Clone)]
pub struct TypingConfig {
    /// Quiet period after which a typing indicator auto-expires.
    pub expiry_secs: u64,
}

/// Match queue settings
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    /// Periodic re-search interval for queued users. 0 disables the timer;
    /// searches then run only when another user enqueues.
    pub retry_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "5600".to_string())
                .parse()
                .unwrap_or(5600),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            cors_origins: env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            presence: PresenceConfig {
                grace_secs: env::var("PRESENCE_GRACE_SECS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
            },
            typing: TypingConfig {
                expiry_secs: env::var("TYPING_EXPIRY_SECS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            matching: MatchingConfig {
                retry_secs: env::var("MATCH_RETRY_SECS")
                    .unwrap_or_else(|_| "0".to_string())
                    .parse()
                    .unwrap_or(0),
            },
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5600,
            host: "127.0.0.1".to_string(),
            cors_origins: vec![],
            presence: PresenceConfig { grace_secs: 10 },
            typing: TypingConfig { expiry_secs: 5 },
            matching: MatchingConfig { retry_secs: 0 },
            log_level: "info".to_string(),
        }
    }
}
