use super::*;
use crate::models::UserProfile;
use crate::storage::{MemoryStore, REFRESH_TOKEN_KEY, TOKEN_KEY, USER_KEY};

fn credential() -> Credential {
    Credential {
        access_token: Some("access".to_string()),
        refresh_token: Some("refresh".to_string()),
        user: Some(UserProfile {
            id: "u1".to_string(),
            email: "ada@example.com".to_string(),
            full_name: "Ada".to_string(),
            provider: "local".to_string(),
        }),
    }
}

#[test]
fn test_set_persists_fixed_keys() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("nested").join("credentials.json");

    let store = FileStore::open(&path).expect("open store");
    assert_eq!(store.get(), Credential::default());

    store.set(credential());

    let raw = std::fs::read_to_string(&path).expect("read credentials file");
    let entries: BTreeMap<String, String> = serde_json::from_str(&raw).expect("parse file");
    assert_eq!(entries.get(TOKEN_KEY).map(String::as_str), Some("access"));
    assert_eq!(
        entries.get(REFRESH_TOKEN_KEY).map(String::as_str),
        Some("refresh")
    );
    assert!(entries.get(USER_KEY).is_some_and(|u| u.contains("ada@example.com")));

    let reopened = FileStore::open(&path).expect("reopen store");
    assert_eq!(reopened.get(), credential());
}

#[test]
fn test_clear_removes_every_credential_key() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("credentials.json");
    std::fs::write(&path, r#"{"token": "old", "theme": "dark"}"#).expect("seed file");

    let store = FileStore::open(&path).expect("open store");
    assert_eq!(store.get().access_token.as_deref(), Some("old"));

    store.set(credential());
    store.clear();
    assert_eq!(store.get(), Credential::default());

    let reopened = FileStore::open(&path).expect("reopen store");
    assert_eq!(reopened.get(), Credential::default());
    let raw = std::fs::read_to_string(&path).expect("read credentials file");
    assert!(raw.contains("theme"), "unrelated keys must survive a clear");
}

#[test]
fn test_unreadable_user_profile_is_ignored() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("credentials.json");
    std::fs::write(&path, r#"{"token": "t", "user": "{not json"}"#).expect("seed file");

    let store = FileStore::open(&path).expect("open store");
    let credential = store.get();
    assert_eq!(credential.access_token.as_deref(), Some("t"));
    assert_eq!(credential.user, None);
}

#[test]
fn test_memory_store_round_trip() {
    let store = MemoryStore::with_credential(credential());
    assert!(store.get().is_authenticated());
    store.set(Credential {
        refresh_token: None,
        ..credential()
    });
    assert_eq!(store.get().refresh_token, None);
    store.clear();
    assert!(!store.get().is_authenticated());
}
