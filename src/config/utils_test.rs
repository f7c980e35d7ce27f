use crate::{
    config::constants::{CREDENTIALS_FILE_PATH, DEFAULT_API_ENDPOINT, LOG_FILE_PATH},
    models::TestMode,
};

use super::*;

#[test]
fn test_load_configuration() {
    let config = load_configuration("./testdata/config.toml").expect("failed to load config");

    assert_eq!(config.general.test_mode, Some(TestMode::Confirm));

    let log = &config.log;
    assert_eq!(log.level.as_deref(), Some("debug"));
    let log_filters = log.filters.as_deref().unwrap_or_default();
    assert_eq!(log_filters.len(), 1);
    assert_eq!(log_filters[0].module.as_deref(), Some("parley::session"));
    assert_eq!(log_filters[0].level.as_deref(), Some("trace"));

    let log_file = &log.file;
    assert_eq!(log_file.path, "/var/log/parley.log");
    assert_eq!(log_file.append, true);

    assert_eq!(config.api.endpoint, "https://assistant.example.com/api/v1");
    assert_eq!(config.api.timeout_secs, Some(30));
    assert_eq!(
        config.api.timeout(),
        Some(std::time::Duration::from_secs(30))
    );

    assert_eq!(
        config.storage.credentials_path,
        "/var/lib/parley/credentials.json"
    );
}

#[test]
fn test_load_configuration_with_some_default_fields() {
    let config =
        load_configuration("./testdata/config_with_default.toml").expect("failed to load config");

    assert_eq!(config.general.test_mode, Some(TestMode::Off));

    let log = &config.log;
    assert_eq!(log.level.as_deref(), Some("info"));
    assert_eq!(log.file.path, LOG_FILE_PATH);

    assert_eq!(config.api.endpoint, DEFAULT_API_ENDPOINT);
    assert_eq!(config.api.timeout(), None);
    assert_eq!(config.storage.credentials_path, CREDENTIALS_FILE_PATH);
}

#[test]
fn test_load_configuration_rejects_unknown_test_mode() {
    let err = toml::from_str::<Configuration>("[general]\ntest_mode = 7\n")
        .expect_err("test mode 7 should be rejected");
    assert!(err.to_string().contains("test mode"));
}

#[test]
fn test_resolve_path() {
    let ret = resolve_path("$PARLEY_TEST_PATH/${PARLEY_USER_PATH}/config.toml")
        .expect("failed to resolve path");
    assert_eq!(ret, "//config.toml");

    let dir = "/tmp/test";
    let user_path = "user_path";
    unsafe {
        std::env::set_var("PARLEY_TEST_PATH", dir);
        std::env::set_var("PARLEY_USER_PATH", user_path);
    }
    let ret = resolve_path("$PARLEY_TEST_PATH/${PARLEY_USER_PATH}/config.toml")
        .expect("failed to resolve path");
    assert_eq!(ret, format!("{dir}/{user_path}/config.toml"));
}

#[test]
fn test_basename() {
    assert_eq!(basename("src/session/client.rs"), "client.rs");
    assert_eq!(basename("main.rs"), "main.rs");
}
