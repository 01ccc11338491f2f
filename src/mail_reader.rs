use crate::error::Result;
use crate::maildir::{is_metadata_file, Folder, Subfolder};
use crate::read_state::ReadStateStore;
use log::warn;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod display;
pub mod message;
pub mod thumbnail;

use message::MessageParser;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MessageSummary {
    pub id: String,
    pub folder: String,
    pub subfolder: Subfolder,
    pub timestamp: i64,
    pub size: u64,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub preview: String,
    pub attachment_count: usize,
    pub read: bool,
}

/// Loads stored messages and turns them into listing entries.
pub struct MessageReader {
    parser: Arc<dyn MessageParser>,
    read_state: Arc<ReadStateStore>,
}

impl MessageReader {
    pub fn new(parser: Arc<dyn MessageParser>, read_state: Arc<ReadStateStore>) -> Self {
        MessageReader { parser, read_state }
    }

    pub fn parser(&self) -> &dyn MessageParser {
        self.parser.as_ref()
    }

    /// Summaries of every message under `new/` then `cur/`. A message that
    /// cannot be read or parsed is logged and left out.
    pub async fn read_folder(&self, folder: &Folder) -> Vec<MessageSummary> {
        let mut summaries = Vec::new();
        for subfolder in Subfolder::ALL {
            let dir = folder.subfolder_path(subfolder);
            let files = match list_message_files(&dir).await {
                Ok(files) => files,
                Err(err) => {
                    warn!("Cannot list {}: {}", dir.display(), err);
                    continue;
                }
            };
            for (filename, path) in files {
                match self.summarize(folder, subfolder, &filename, &path).await {
                    Ok(summary) => summaries.push(summary),
                    Err(err) => warn!("Skipping {}: {}", path.display(), err),
                }
            }
        }
        summaries
    }

    async fn summarize(
        &self,
        folder: &Folder,
        subfolder: Subfolder,
        filename: &str,
        path: &Path,
    ) -> Result<MessageSummary> {
        let metadata = tokio::fs::metadata(path).await?;
        let raw = tokio::fs::read(path).await?;
        let parsed = self.parser.parse(&raw)?;

        Ok(MessageSummary {
            id: filename.to_string(),
            folder: folder.name.clone(),
            subfolder,
            timestamp: message_timestamp(filename, &metadata),
            size: metadata.len(),
            from: display::format_addresses(&parsed.from),
            to: display::format_addresses(&parsed.to),
            subject: parsed.subject.unwrap_or_default(),
            preview: parsed.text.as_deref().map(display::preview).unwrap_or_default(),
            attachment_count: parsed.attachments.len(),
            read: self.read_state.is_read(filename).await,
        })
    }
}

/// Message files in `dir` sorted by name; a missing directory is empty.
pub(crate) async fn list_message_files(dir: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if is_metadata_file(&name) || !entry.file_type().await?.is_file() {
            continue;
        }
        files.push((name, entry.path()));
    }
    files.sort();
    Ok(files)
}

/// Seconds prefix of `<unixSeconds>.<hex>.<host>`.
pub fn filename_timestamp(filename: &str) -> Option<i64> {
    filename.split('.').next()?.parse().ok()
}

/// Filename prefix, or the file's mtime when the name carries none.
pub fn message_timestamp(filename: &str, metadata: &std::fs::Metadata) -> i64 {
    filename_timestamp(filename).unwrap_or_else(|| modified_seconds(metadata))
}

fn modified_seconds(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
