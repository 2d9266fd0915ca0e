//! Configuration loading and graceful degradation
//!
//! - Missing config files fall back to compiled defaults
//! - Present but invalid files are errors
//! - Environment variables override file values; empty ones are ignored
//!
//! Tests that touch process environment variables are marked #[serial].

use funnel_common::config::{ConfigResolver, TomlConfig, CONFIG_ENV_VAR};
use funnel_common::Error;
use serial_test::serial;
use std::collections::HashMap;
use std::env;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

fn clear_env() {
    for name in [
        CONFIG_ENV_VAR,
        "FUNNEL_BIND",
        "FUNNEL_BACKEND_URL",
        "FUNNEL_BACKEND_KEY",
        "BREVO_API_KEY",
        "LIST_ID_EVA_MAIN",
        "OPENAI_API_KEY",
    ] {
        env::remove_var(name);
    }
}

#[test]
fn test_defaults() {
    let config = TomlConfig::default();
    assert_eq!(config.server.bind, "127.0.0.1:5740");
    assert_eq!(config.server.cache_ttl_secs, 30);
    assert_eq!(config.crm.list_id, 2);
    assert_eq!(config.crm.contacts_url, "https://api.brevo.com/v3/contacts");
    assert_eq!(config.voice.voice, "alloy");
    assert_eq!(config.voice.silence_duration_ms, 1000);
    assert_eq!(config.logging.level, "info");
    assert!(config.backend.url.is_none());
}

#[test]
fn test_partial_file_keeps_defaults_for_missing_sections() {
    let config = TomlConfig::from_toml_str(
        r#"
        [server]
        bind = "0.0.0.0:8080"

        [crm]
        list_id = 7
        "#,
    )
    .unwrap();

    assert_eq!(config.server.bind, "0.0.0.0:8080");
    assert_eq!(config.server.event_capacity, 100);
    assert_eq!(config.crm.list_id, 7);
    assert_eq!(config.crm.interest, "VR_Experience");
    assert_eq!(config.voice.temperature, 0.8);
}

#[test]
fn test_invalid_toml_is_config_error() {
    let err = TomlConfig::from_toml_str("[server\nbind = ").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_overrides_ignore_empty_and_bad_values() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("FUNNEL_BACKEND_URL", "https://proj.example.co"),
        ("BREVO_API_KEY", "   "),
        ("LIST_ID_EVA_MAIN", "not-a-number"),
        ("OPENAI_API_KEY", "sk-test"),
    ]);

    let mut config = TomlConfig::default();
    config.apply_overrides_from(|name| vars.get(name).map(|v| v.to_string()));

    assert_eq!(config.backend.url.as_deref(), Some("https://proj.example.co"));
    assert!(config.crm.api_key.is_none());
    assert_eq!(config.crm.list_id, 2);
    assert_eq!(config.voice.api_key.as_deref(), Some("sk-test"));
}

#[test]
#[serial]
fn test_resolver_missing_file_uses_defaults() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let resolver = ConfigResolver::new(Some(dir.path().join("absent.toml")));

    let config = resolver.resolve().unwrap();
    assert_eq!(config.server.bind, TomlConfig::default().server.bind);
}

#[test]
#[serial]
fn test_resolver_reads_file_then_applies_env() {
    clear_env();
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[server]\nbind = \"127.0.0.1:9000\"\n\n[crm]\nlist_id = 5").unwrap();

    env::set_var("LIST_ID_EVA_MAIN", "11");
    let resolver = ConfigResolver::new(Some(file.path().to_path_buf()));
    let config = resolver.resolve().unwrap();

    assert_eq!(config.server.bind, "127.0.0.1:9000");
    assert_eq!(config.crm.list_id, 11);

    clear_env();
}

#[test]
#[serial]
fn test_resolver_invalid_file_is_error() {
    clear_env();
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "this is not toml = = =").unwrap();

    let resolver = ConfigResolver::new(Some(file.path().to_path_buf()));
    assert!(resolver.resolve().is_err());
}

#[test]
#[serial]
fn test_config_env_var_names_the_file() {
    clear_env();
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();
    env::set_var(CONFIG_ENV_VAR, file.path());

    let resolver = ConfigResolver::new(None);
    assert_eq!(resolver.config_path(), Some(file.path().to_path_buf()));
    assert_eq!(resolver.resolve().unwrap().logging.level, "debug");

    clear_env();
}
