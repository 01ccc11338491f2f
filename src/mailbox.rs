//! Logical inbox view over the whole Maildir tree, plus the mutations the
//! query surface exposes.

pub mod attachments;

use crate::error::{Result, StoreError};
use crate::mail_reader::display::format_addresses;
use crate::mail_reader::message::{Address, Header, MessageParser};
use crate::mail_reader::thumbnail::ThumbnailRenderer;
use crate::mail_reader::{list_message_files, message_timestamp, MessageReader, MessageSummary};
use crate::maildir::guard;
use crate::maildir::writer::MessageWriter;
use crate::maildir::{is_metadata_file, Maildir, MessageLocation, Subfolder};
use crate::read_state::ReadStateStore;
use log::{debug, info, warn};
use serde::Serialize;
use std::io;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct MessageList {
    pub total: usize,
    pub total_size: u64,
    pub messages: Vec<MessageSummary>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct FolderInfo {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct AttachmentInfo {
    pub index: usize,
    pub filename: String,
    pub content_type: String,
    pub size: usize,
    pub content_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageDetail {
    pub id: String,
    pub folder: String,
    pub subfolder: Subfolder,
    pub size: u64,
    pub timestamp: i64,
    pub from: String,
    pub to: String,
    pub cc: String,
    pub from_addresses: Vec<Address>,
    pub to_addresses: Vec<Address>,
    pub cc_addresses: Vec<Address>,
    pub subject: String,
    pub date: Option<String>,
    pub headers: Vec<Header>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub raw: String,
    pub attachments: Vec<AttachmentInfo>,
    pub read: bool,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ImportFailure {
    pub index: usize,
    pub error: String,
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub failed: usize,
    pub errors: Vec<ImportFailure>,
}

pub struct Mailbox {
    maildir: Maildir,
    reader: MessageReader,
    read_state: Arc<ReadStateStore>,
    writer: Arc<MessageWriter>,
    thumbnails: Arc<dyn ThumbnailRenderer>,
}

impl Mailbox {
    pub fn new(
        maildir: Maildir,
        writer: Arc<MessageWriter>,
        read_state: Arc<ReadStateStore>,
        parser: Arc<dyn MessageParser>,
        thumbnails: Arc<dyn ThumbnailRenderer>,
    ) -> Self {
        let reader = MessageReader::new(parser, read_state.clone());
        Mailbox {
            maildir,
            reader,
            read_state,
            writer,
            thumbnails,
        }
    }

    pub async fn list_folders(&self) -> Vec<FolderInfo> {
        let mut infos = Vec::new();
        for folder in self.maildir.list_folders().await {
            let mut count = 0;
            for subfolder in Subfolder::ALL {
                match list_message_files(&folder.subfolder_path(subfolder)).await {
                    Ok(files) => count += files.len(),
                    Err(err) => warn!("Cannot count messages in {}/{}: {}", folder.name, subfolder, err),
                }
            }
            infos.push(FolderInfo { name: folder.name, count });
        }
        infos
    }

    /// Every message in every folder, newest first.
    pub async fn list_all(&self) -> MessageList {
        let mut messages = Vec::new();
        for folder in self.maildir.list_folders().await {
            messages.extend(self.reader.read_folder(&folder).await);
        }
        // Stable, so equal timestamps keep folder/filename order.
        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        MessageList {
            total: messages.len(),
            total_size: messages.iter().map(|m| m.size).sum(),
            messages,
        }
    }

    /// First `new/` or `cur/` entry named `id` (or `id:<info>`), folder by folder.
    pub async fn find(&self, id: &str) -> Result<Option<MessageLocation>> {
        let id = guard::validate(id)?;
        // Files of the mailbox-protocol server are never messages.
        if is_metadata_file(id) {
            return Ok(None);
        }
        let info_prefix = format!("{}:", id);

        for folder in self.maildir.list_folders().await {
            for subfolder in Subfolder::ALL {
                let dir = folder.subfolder_path(subfolder);
                let exact = dir.join(id);
                if tokio::fs::metadata(&exact).await.map(|m| m.is_file()).unwrap_or(false) {
                    return Ok(Some(MessageLocation {
                        filename: id.to_string(),
                        folder: folder.name.clone(),
                        subfolder,
                        path: exact,
                    }));
                }
                let renamed = list_message_files(&dir)
                    .await
                    .unwrap_or_default()
                    .into_iter()
                    .find(|(name, _)| name.starts_with(&info_prefix));
                if let Some((filename, path)) = renamed {
                    return Ok(Some(MessageLocation {
                        filename,
                        folder: folder.name.clone(),
                        subfolder,
                        path,
                    }));
                }
            }
        }
        Ok(None)
    }

    async fn locate(&self, id: &str) -> Result<MessageLocation> {
        self.find(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("message {}", id)))
    }

    async fn read_located(&self, id: &str) -> Result<(MessageLocation, Vec<u8>)> {
        let location = self.locate(id).await?;
        match tokio::fs::read(&location.path).await {
            Ok(raw) => Ok((location, raw)),
            // Deleted between lookup and read.
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("message {}", id)))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_detail(&self, id: &str) -> Result<MessageDetail> {
        let (location, raw) = self.read_located(id).await?;
        let metadata = match tokio::fs::metadata(&location.path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(format!("message {}", id)));
            }
            Err(err) => return Err(err.into()),
        };
        let parsed = self.reader.parser().parse(&raw)?;

        let date = match parsed.sent_at.and_then(|secs| chrono::DateTime::from_timestamp(secs, 0)) {
            Some(date) => Some(date.to_rfc3339()),
            None => parsed.date.clone(),
        };
        let attachments = parsed
            .attachments
            .iter()
            .enumerate()
            .map(|(index, attachment)| AttachmentInfo {
                index,
                filename: attachment.filename.clone(),
                content_type: attachment.content_type.clone(),
                size: attachment.size(),
                content_id: attachment.content_id.clone(),
            })
            .collect();

        Ok(MessageDetail {
            timestamp: message_timestamp(&location.filename, &metadata),
            size: raw.len() as u64,
            from: format_addresses(&parsed.from),
            to: format_addresses(&parsed.to),
            cc: if parsed.cc.is_empty() {
                String::new()
            } else {
                format_addresses(&parsed.cc)
            },
            subject: parsed.subject.unwrap_or_default(),
            date,
            headers: parsed.headers,
            text: parsed.text,
            html: parsed.html,
            raw: String::from_utf8_lossy(&raw).into_owned(),
            attachments,
            read: self.read_state.is_read(&location.filename).await,
            from_addresses: parsed.from,
            to_addresses: parsed.to,
            cc_addresses: parsed.cc,
            id: location.filename.clone(),
            folder: location.folder,
            subfolder: location.subfolder,
        })
    }

    /// Unmodified bytes of the stored message.
    pub async fn export_raw(&self, id: &str) -> Result<Vec<u8>> {
        let (_, raw) = self.read_located(id).await?;
        Ok(raw)
    }

    pub async fn mark_read(&self, id: &str) -> Result<bool> {
        let location = self.locate(id).await?;
        self.read_state.mark_read(&location.filename).await;
        Ok(true)
    }

    pub async fn mark_unread(&self, id: &str) -> Result<bool> {
        let location = self.locate(id).await?;
        self.read_state.mark_unread(&location.filename).await;
        Ok(false)
    }

    pub async fn delete_one(&self, id: &str) -> Result<()> {
        let location = self.locate(id).await?;
        match tokio::fs::remove_file(&location.path).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(format!("message {}", id)));
            }
            Err(err) => return Err(err.into()),
        }
        self.read_state.mark_unread(&location.filename).await;
        info!("Deleted {}", location.path.display());
        Ok(())
    }

    /// Unlinks every message in every folder and forgets all read flags.
    pub async fn delete_all(&self) -> usize {
        let mut deleted = 0;
        for folder in self.maildir.list_folders().await {
            for subfolder in Subfolder::ALL {
                let dir = folder.subfolder_path(subfolder);
                let files = match list_message_files(&dir).await {
                    Ok(files) => files,
                    Err(err) => {
                        warn!("Cannot list {}: {}", dir.display(), err);
                        continue;
                    }
                };
                for (_, path) in files {
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => deleted += 1,
                        Err(err) => warn!("Failed to delete {}: {}", path.display(), err),
                    }
                }
            }
        }
        self.read_state.clear_all().await;
        info!("Deleted {} messages", deleted);
        deleted
    }

    /// Stores each buffer that parses as a message; failures are reported per item.
    pub async fn import(&self, items: Vec<Vec<u8>>) -> ImportReport {
        let mut report = ImportReport::default();
        for (index, raw) in items.into_iter().enumerate() {
            match self.import_one(&raw).await {
                Ok(filename) => {
                    debug!("Imported item {} as {}", index, filename);
                    report.imported += 1;
                }
                Err(err) => {
                    warn!("Import of item {} failed: {}", index, err);
                    report.failed += 1;
                    report.errors.push(ImportFailure {
                        index,
                        error: err.to_string(),
                    });
                }
            }
        }
        report
    }

    async fn import_one(&self, raw: &[u8]) -> Result<String> {
        if raw.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(StoreError::Parse("empty message".to_string()));
        }
        self.reader.parser().parse(raw)?;
        Ok(self.writer.commit(raw).await?.filename)
    }
}
