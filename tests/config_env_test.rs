//! Config environment variable tests
//!
//! These tests verify that Config::from_env() correctly reads and applies
//! environment variable overrides. Config::from_env() also loads a .env file
//! via dotenvy when present, so these tests focus on override behavior.
//!
//! Tests use #[serial] to prevent race conditions with shared env vars.

use reasoning_feedback_core::config::{Config, LogFormat};
use reasoning_feedback_core::AppError;
use serial_test::serial;
use std::env;
use std::time::Duration;

#[test]
#[serial]
fn test_config_from_env_defaults() {
    let config = Config::from_env().unwrap();
    assert_eq!(config.session.ttl_secs, 3600);
    assert_eq!(config.feedback.max_entries, 10_000);
    assert_eq!(config.feedback.flush_batch_size, 100);
}

#[test]
#[serial]
fn test_config_from_env_session_overrides() {
    env::set_var("SESSION_TTL_SECS", "120");
    env::set_var("SESSION_CLEANUP_INTERVAL_SECS", "30");

    let config = Config::from_env().unwrap();
    assert_eq!(config.session.ttl(), chrono::Duration::minutes(2));
    assert_eq!(config.session.cleanup_interval(), Duration::from_secs(30));

    env::remove_var("SESSION_TTL_SECS");
    env::remove_var("SESSION_CLEANUP_INTERVAL_SECS");
}

#[test]
#[serial]
fn test_config_from_env_feedback_overrides() {
    env::set_var("FEEDBACK_MAX_ENTRIES", "500");
    env::set_var("FEEDBACK_PRUNE_FRACTION", "0.5");
    env::set_var("FEEDBACK_FLUSH_BATCH_SIZE", "40");
    env::set_var("FEEDBACK_FLUSH_INTERVAL_SECS", "15");
    env::set_var("COLLABORATOR_TIMEOUT_MS", "250");

    let config = Config::from_env().unwrap();
    assert_eq!(config.feedback.max_entries, 500);
    assert_eq!(config.feedback.prune_fraction, 0.5);
    assert_eq!(config.feedback.success_sample_cap(), 4);
    assert_eq!(config.feedback.flush_interval(), Duration::from_secs(15));
    assert_eq!(config.feedback.collaborator_timeout(), Duration::from_millis(250));

    env::remove_var("FEEDBACK_MAX_ENTRIES");
    env::remove_var("FEEDBACK_PRUNE_FRACTION");
    env::remove_var("FEEDBACK_FLUSH_BATCH_SIZE");
    env::remove_var("FEEDBACK_FLUSH_INTERVAL_SECS");
    env::remove_var("COLLABORATOR_TIMEOUT_MS");
}

#[test]
#[serial]
fn test_config_rejects_out_of_range_prune_fraction() {
    env::set_var("FEEDBACK_PRUNE_FRACTION", "1.5");

    let result = Config::from_env();
    assert!(matches!(result, Err(AppError::Config { .. })));

    env::remove_var("FEEDBACK_PRUNE_FRACTION");
}

#[test]
#[serial]
fn test_config_rejects_zero_batch_size() {
    env::set_var("FEEDBACK_FLUSH_BATCH_SIZE", "0");

    let result = Config::from_env();
    assert!(matches!(result, Err(AppError::Config { .. })));

    env::remove_var("FEEDBACK_FLUSH_BATCH_SIZE");
}

#[test]
#[serial]
fn test_config_from_env_custom_database() {
    env::set_var("DATABASE_PATH", "/custom/feedback.db");
    env::set_var("DATABASE_MAX_CONNECTIONS", "10");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.path.to_str().unwrap(), "/custom/feedback.db");
    assert_eq!(config.database.max_connections, 10);

    env::remove_var("DATABASE_PATH");
    env::remove_var("DATABASE_MAX_CONNECTIONS");
}

#[test]
#[serial]
fn test_config_invalid_number_uses_default() {
    env::set_var("DATABASE_MAX_CONNECTIONS", "not-a-number");

    let config = Config::from_env().unwrap();
    // Should fall back to default
    assert_eq!(config.database.max_connections, 5);

    env::remove_var("DATABASE_MAX_CONNECTIONS");
}

#[test]
#[serial]
fn test_config_from_env_logging() {
    env::set_var("LOG_FORMAT", "JSON");
    env::set_var("LOG_LEVEL", "debug");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.logging.level, "debug");

    env::remove_var("LOG_FORMAT");
    env::remove_var("LOG_LEVEL");
}
