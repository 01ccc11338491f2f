//! Read/unread flags kept beside the Maildir, since nothing on the ingestion
//! side carries IMAP flags.
//!
//! The mapping is loaded once, mutated in memory and rewritten in full after
//! every change. Every mutation runs under one async mutex that is held until
//! the file write has finished, so two writers never interleave their bytes.

use log::{debug, error, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

type Flags = BTreeMap<String, bool>;

#[derive(Debug)]
pub struct ReadStateStore {
    flags: Mutex<Flags>,
    /// `None` keeps the flags in memory only.
    file: Option<PathBuf>,
}

impl ReadStateStore {
    /// Loads the JSON file at `path`; a missing or malformed file starts empty.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let flags = read_flags(&path).await;
        debug!("Loaded {} read flags from {}", flags.len(), path.display());
        ReadStateStore {
            flags: Mutex::new(flags),
            file: Some(path),
        }
    }

    /// A store that never touches the filesystem.
    #[cfg(test)]
    pub fn in_memory() -> Self {
        ReadStateStore {
            flags: Mutex::new(Flags::new()),
            file: None,
        }
    }

    pub async fn is_read(&self, id: &str) -> bool {
        self.flags.lock().await.get(id).copied().unwrap_or(false)
    }

    pub async fn mark_read(&self, id: &str) {
        let mut flags = self.flags.lock().await;
        flags.insert(id.to_string(), true);
        self.flush(&flags).await;
    }

    pub async fn mark_unread(&self, id: &str) {
        let mut flags = self.flags.lock().await;
        if flags.remove(id).is_some() {
            self.flush(&flags).await;
        }
    }

    pub async fn clear_all(&self) {
        let mut flags = self.flags.lock().await;
        flags.clear();
        self.flush(&flags).await;
    }

    #[cfg(test)]
    pub async fn snapshot(&self) -> BTreeMap<String, bool> {
        self.flags.lock().await.clone()
    }

    async fn flush(&self, flags: &Flags) {
        let Some(path) = &self.file else {
            return;
        };
        if let Err(err) = write_flags(path, flags).await {
            error!("Failed to persist read state to {}: {}", path.display(), err);
        }
    }
}

async fn read_flags(path: &Path) -> Flags {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Flags::new(),
        Err(err) => {
            warn!("Cannot read {}: {}", path.display(), err);
            return Flags::new();
        }
    };
    match serde_json::from_slice::<BTreeMap<String, serde_json::Value>>(&content) {
        Ok(raw) => raw
            .into_iter()
            .filter(|(_, value)| value.as_bool() == Some(true))
            .map(|(id, _)| (id, true))
            .collect(),
        Err(err) => {
            warn!("Ignoring malformed read state in {}: {}", path.display(), err);
            Flags::new()
        }
    }
}

async fn write_flags(path: &Path, flags: &Flags) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(flags)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    // Readers of the file never see a half-written object.
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
