use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::models::Credential;

use super::{CredentialStore, clear_entries, from_entries, to_entries};

/// Process local store, nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        let store = Self::default();
        store.set(credential);
        store
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self) -> Credential {
        from_entries(&self.entries.lock())
    }

    fn set(&self, credential: Credential) {
        to_entries(&credential, &mut self.entries.lock());
    }

    fn clear(&self) {
        clear_entries(&mut self.entries.lock());
    }
}
