use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub session: SessionConfig,
    pub feedback: FeedbackConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// Reasoning session store configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Inactivity window after which a session is evicted
    pub ttl_secs: u64,
    /// How often the TTL sweep runs
    pub cleanup_interval_secs: u64,
}

/// Outcome store and flush configuration
#[derive(Debug, Clone)]
pub struct FeedbackConfig {
    /// Soft cap on in-memory entries
    pub max_entries: usize,
    /// Fraction of entries removed by one prune pass
    pub prune_fraction: f64,
    /// Entries recorded between two batched flushes
    pub flush_batch_size: usize,
    /// Upper bound on the time between two flushes
    pub flush_interval_secs: u64,
    /// Bound on a single call into the persistence collaborator
    pub collaborator_timeout_ms: u64,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let session = SessionConfig {
            ttl_secs: env_or("SESSION_TTL_SECS", 3600),
            cleanup_interval_secs: env_or("SESSION_CLEANUP_INTERVAL_SECS", 600),
        };

        let feedback = FeedbackConfig {
            max_entries: env_or("FEEDBACK_MAX_ENTRIES", 10_000),
            prune_fraction: env_or("FEEDBACK_PRUNE_FRACTION", 0.2),
            flush_batch_size: env_or("FEEDBACK_FLUSH_BATCH_SIZE", 100),
            flush_interval_secs: env_or("FEEDBACK_FLUSH_INTERVAL_SECS", 60),
            collaborator_timeout_ms: env_or("COLLABORATOR_TIMEOUT_MS", 5000),
        };

        if !(feedback.prune_fraction > 0.0 && feedback.prune_fraction < 1.0) {
            return Err(AppError::Config {
                message: format!(
                    "FEEDBACK_PRUNE_FRACTION must be in (0, 1), got {}",
                    feedback.prune_fraction
                ),
            });
        }
        if feedback.flush_batch_size == 0 {
            return Err(AppError::Config {
                message: "FEEDBACK_FLUSH_BATCH_SIZE must be greater than zero".to_string(),
            });
        }

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/feedback.db".to_string()),
            ),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        Ok(Config {
            session,
            feedback,
            database,
            logging,
        })
    }
}

/// Parse an env var, falling back to `default` when unset or malformed.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl SessionConfig {
    /// Inactivity window as a chrono duration.
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs as i64)
    }

    /// Sweep interval as Duration.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl FeedbackConfig {
    /// Flush interval as Duration.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    /// Collaborator timeout as Duration.
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }

    /// Maximum number of successes persisted per flushed batch.
    pub fn success_sample_cap(&self) -> usize {
        (self.flush_batch_size / 10).max(1)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,             // 1 hour
            cleanup_interval_secs: 600, // 10 minutes
        }
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            prune_fraction: 0.2,
            flush_batch_size: 100,
            flush_interval_secs: 60,
            collaborator_timeout_ms: 5000,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/feedback.db"),
            max_connections: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_defaults() {
        let config = FeedbackConfig::default();
        assert_eq!(config.max_entries, 10_000);
        assert_eq!(config.flush_batch_size, 100);
        assert_eq!(config.success_sample_cap(), 10);
        assert_eq!(config.flush_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_success_sample_cap_never_zero() {
        let config = FeedbackConfig {
            flush_batch_size: 5,
            ..Default::default()
        };
        assert_eq!(config.success_sample_cap(), 1);
    }

    #[test]
    fn test_session_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.ttl(), chrono::Duration::hours(1));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(600));
    }
}
