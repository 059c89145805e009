use std::collections::HashMap;

use super::*;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
    move |key| map.get(key).cloned()
}

#[test]
fn identity_only_uses_defaults() {
    let config = ChatConfig::from_lookup(lookup(&[("TEAMROOM_USER_ID", "12"), ("TEAMROOM_USER_NAME", "Ann")]))
        .expect("config");
    assert_eq!(config.user, LocalUser { id: 12, name: "Ann".into() });
    assert_eq!(config.base_url, DEFAULT_BASE_URL);
    assert_eq!(config.session_token, None);
    assert_eq!(config.typing_idle, Duration::from_millis(DEFAULT_TYPING_IDLE_MS));
    assert_eq!(config.typing_ttl, Duration::from_millis(DEFAULT_TYPING_TTL_MS));
    assert_eq!(config.reconnect_min, Duration::from_millis(DEFAULT_RECONNECT_MIN_MS));
    assert_eq!(config.reconnect_max, Duration::from_millis(DEFAULT_RECONNECT_MAX_MS));
    assert_eq!(config.request_timeout, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));
    assert_eq!(config.prefs_path, None);
}

#[test]
fn missing_identity_is_an_error() {
    let err = ChatConfig::from_lookup(lookup(&[("TEAMROOM_USER_NAME", "Ann")])).expect_err("no id");
    assert!(matches!(err, ConfigError::Missing("TEAMROOM_USER_ID")));

    let err = ChatConfig::from_lookup(lookup(&[("TEAMROOM_USER_ID", "12"), ("TEAMROOM_USER_NAME", "  ")]))
        .expect_err("blank name");
    assert!(matches!(err, ConfigError::Missing("TEAMROOM_USER_NAME")));
}

#[test]
fn invalid_user_id_is_an_error() {
    let err = ChatConfig::from_lookup(lookup(&[("TEAMROOM_USER_ID", "abc"), ("TEAMROOM_USER_NAME", "Ann")]))
        .expect_err("bad id");
    assert!(matches!(err, ConfigError::Invalid { key: "TEAMROOM_USER_ID", .. }));
}

#[test]
fn invalid_tunables_fall_back_and_max_never_below_min() {
    let config = ChatConfig::from_lookup(lookup(&[
        ("TEAMROOM_USER_ID", "12"),
        ("TEAMROOM_USER_NAME", "Ann"),
        ("TEAMROOM_TYPING_IDLE_MS", "soon"),
        ("TEAMROOM_RECONNECT_MIN_MS", "4000"),
        ("TEAMROOM_RECONNECT_MAX_MS", "500"),
        ("TEAMROOM_BASE_URL", "https://team.example.com/"),
        ("TEAMROOM_PREFS_PATH", "/tmp/teamroom.json"),
    ]))
    .expect("config");
    assert_eq!(config.typing_idle, Duration::from_millis(DEFAULT_TYPING_IDLE_MS));
    assert_eq!(config.reconnect_min, Duration::from_millis(4000));
    assert_eq!(config.reconnect_max, Duration::from_millis(4000));
    assert_eq!(config.base_url, "https://team.example.com");
    assert_eq!(config.prefs_path, Some(PathBuf::from("/tmp/teamroom.json")));
}

#[test]
fn ws_url_follows_scheme() {
    let mut config = ChatConfig::new(LocalUser { id: 1, name: "Ann".into() });
    assert_eq!(config.ws_url().as_deref(), Ok("ws://127.0.0.1:3000/api/ws"));
    config.base_url = "https://team.example.com".into();
    assert_eq!(config.ws_url().as_deref(), Ok("wss://team.example.com/api/ws"));
    config.base_url = "ftp://nope".into();
    assert!(config.ws_url().is_err());
}

// Environment mutation requires unsafe in edition 2024. This is the only
// test touching `TEAMROOM_*` variables.
#[test]
fn from_env_reads_process_environment() {
    unsafe {
        std::env::set_var("TEAMROOM_USER_ID", "77");
        std::env::set_var("TEAMROOM_USER_NAME", "Env User");
        std::env::set_var("TEAMROOM_SESSION_TOKEN", "tok");
    }
    let config = ChatConfig::from_env().expect("config");
    assert_eq!(config.user.id, 77);
    assert_eq!(config.session_token.as_deref(), Some("tok"));
    unsafe {
        std::env::remove_var("TEAMROOM_USER_ID");
        std::env::remove_var("TEAMROOM_USER_NAME");
        std::env::remove_var("TEAMROOM_SESSION_TOKEN");
    }
}
