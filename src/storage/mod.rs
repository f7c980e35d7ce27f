pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::{collections::BTreeMap, sync::Arc};

use crate::{
    config::{StorageConfig, resolve_path},
    models::{Credential, UserProfile},
};
use eyre::{Context, Result};

pub const TOKEN_KEY: &str = "token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const USER_KEY: &str = "user";

/// Synchronous holder of the signed-in user's credential. Writes are
/// last-writer-wins.
pub trait CredentialStore {
    fn get(&self) -> Credential;
    fn set(&self, credential: Credential);
    fn clear(&self);
}

pub type ArcCredentialStore = Arc<dyn CredentialStore + Send + Sync>;

pub fn new_store(config: &StorageConfig) -> Result<ArcCredentialStore> {
    let path = resolve_path(&config.credentials_path).wrap_err(format!(
        "resolving credentials path {}",
        config.credentials_path
    ))?;
    let store = FileStore::open(&path).wrap_err(format!("opening credential store {}", path))?;
    Ok(Arc::new(store))
}

fn to_entries(credential: &Credential, entries: &mut BTreeMap<String, String>) {
    put(entries, TOKEN_KEY, credential.access_token.clone());
    put(entries, REFRESH_TOKEN_KEY, credential.refresh_token.clone());
    let user = credential.user.as_ref().and_then(|user| {
        serde_json::to_string(user)
            .inspect_err(|err| log::error!("Failed to serialize user profile: {}", err))
            .ok()
    });
    put(entries, USER_KEY, user);
}

fn from_entries(entries: &BTreeMap<String, String>) -> Credential {
    let user = entries.get(USER_KEY).and_then(|raw| {
        serde_json::from_str::<UserProfile>(raw)
            .inspect_err(|err| log::warn!("Ignoring unreadable stored user profile: {}", err))
            .ok()
    });
    Credential {
        access_token: entries.get(TOKEN_KEY).cloned(),
        refresh_token: entries.get(REFRESH_TOKEN_KEY).cloned(),
        user,
    }
}

fn clear_entries(entries: &mut BTreeMap<String, String>) {
    for key in [TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY] {
        entries.remove(key);
    }
}

fn put(entries: &mut BTreeMap<String, String>, key: &str, value: Option<String>) {
    match value {
        Some(value) => entries.insert(key.to_string(), value),
        None => entries.remove(key),
    };
}
