//! Configuration integration tests.
//!
//! Tests for project configuration loading and the derived settings.

use mcplink_core::Config;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_load_project_config() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config_content = r#"{
        "log_level": "debug",
        "server": {"address": "0.0.0.0:9000", "public_url": "https://link.test"}
    }"#;
    fs::write(temp.path().join("mcplink.json"), config_content).expect("Failed to write config");

    let (config, sources) = Config::load(Some(temp.path()))
        .await
        .expect("Failed to load config");

    assert!(sources.iter().any(|p| p.ends_with("mcplink.json")));
    assert_eq!(config.server_address(), "0.0.0.0:9000");
    assert_eq!(config.public_url(), "https://link.test");
    assert_eq!(config.app_redirect_url(), "https://link.test/");
    assert_eq!(
        config.oauth_config().redirect_uri.as_deref(),
        Some("https://link.test/api/mcp/oauth/callback")
    );
}

#[tokio::test]
async fn test_jsonc_preferred_over_json() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    fs::write(
        temp.path().join("mcplink.jsonc"),
        r#"{
            // Keep records for a day
            "client": {"retention_hours": 24}
        }"#,
    )
    .expect("Failed to write config");
    fs::write(
        temp.path().join("mcplink.json"),
        r#"{"client": {"retention_hours": 1}}"#,
    )
    .expect("Failed to write config");

    let (config, _) = Config::load(Some(temp.path()))
        .await
        .expect("Failed to load config");

    assert_eq!(config.retention(), Duration::from_secs(24 * 3600));
}

#[tokio::test]
async fn test_session_timeout() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    fs::write(
        temp.path().join("mcplink.json"),
        r#"{"session": {"request_timeout_secs": 5}}"#,
    )
    .expect("Failed to write config");

    let (config, _) = Config::load(Some(temp.path()))
        .await
        .expect("Failed to load config");

    assert_eq!(config.request_timeout(), Duration::from_secs(5));
}
