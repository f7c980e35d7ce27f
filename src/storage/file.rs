#[cfg(test)]
#[path = "file_test.rs"]
mod tests;

use std::{
    collections::BTreeMap,
    io::Write,
    path::{Path, PathBuf},
};

use eyre::{Context, Result};
use parking_lot::Mutex;

use crate::models::Credential;

use super::{CredentialStore, clear_entries, from_entries, to_entries};

/// Key-value credential store persisted as a flat JSON object.
///
/// Every write replaces the whole file through a temporary file and a
/// rename, so a crash never leaves a half written credential behind.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .wrap_err(format!("reading {}", path.display()))?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw).wrap_err(format!("parsing {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };

        log::debug!(
            "Opened credential store {} with {} keys",
            path.display(),
            entries.len()
        );
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let dir = self.path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir).wrap_err(format!("creating directory {}", dir.display()))?;

        let payload = serde_json::to_vec_pretty(entries).wrap_err("serializing credentials")?;
        let tmp_path = self.path.with_extension("tmp");
        let mut file = std::fs::File::create(&tmp_path)
            .wrap_err(format!("creating {}", tmp_path.display()))?;
        file.write_all(&payload)
            .wrap_err(format!("writing {}", tmp_path.display()))?;
        file.sync_all()
            .wrap_err(format!("syncing {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .wrap_err(format!("replacing {}", self.path.display()))?;
        Ok(())
    }

    fn persist_or_log(&self, entries: &BTreeMap<String, String>) {
        if let Err(err) = self.persist(entries) {
            log::error!("Failed to persist credentials: {:?}", err);
        }
    }
}

impl CredentialStore for FileStore {
    fn get(&self) -> Credential {
        from_entries(&self.entries.lock())
    }

    fn set(&self, credential: Credential) {
        let mut entries = self.entries.lock();
        to_entries(&credential, &mut entries);
        self.persist_or_log(&entries);
    }

    fn clear(&self) {
        let mut entries = self.entries.lock();
        clear_entries(&mut entries);
        self.persist_or_log(&entries);
    }
}
