use crate::error::{Result, StoreError};
use crate::maildir::{Folder, Maildir, MessageLocation, Subfolder};
use log::{debug, warn};
use std::io;
use std::path::Path;

const FILE_MODE: u32 = 0o644;

/// Optional owner applied to every committed message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ownership {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

/// Delivers messages into the root inbox with the tmp-then-rename protocol.
#[derive(Debug, Clone)]
pub struct MessageWriter {
    inbox: Folder,
    host_tag: String,
    ownership: Ownership,
}

impl MessageWriter {
    pub fn new(maildir: &Maildir, host: &str, ownership: Ownership) -> Self {
        MessageWriter {
            inbox: maildir.inbox(),
            host_tag: host_tag(host),
            ownership,
        }
    }

    pub async fn commit(&self, bytes: &[u8]) -> Result<MessageLocation> {
        self.commit_at(chrono::Utc::now().timestamp(), bytes).await
    }

    pub(crate) async fn commit_at(&self, epoch_seconds: i64, bytes: &[u8]) -> Result<MessageLocation> {
        let filename = format!("{}.{:016x}.{}", epoch_seconds, rand::random::<u64>(), self.host_tag);
        let tmp_dir = self.inbox.tmp_path();
        let new_dir = self.inbox.subfolder_path(Subfolder::New);

        tokio::fs::create_dir_all(&tmp_dir).await.map_err(StoreError::StoreWrite)?;
        tokio::fs::create_dir_all(&new_dir).await.map_err(StoreError::StoreWrite)?;

        let tmp_path = tmp_dir.join(&filename);
        let final_path = new_dir.join(&filename);

        if let Err(err) = self.write_and_publish(&tmp_path, &final_path, bytes).await {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!("Could not remove {}: {}", tmp_path.display(), cleanup);
                }
            }
            return Err(StoreError::StoreWrite(err));
        }

        debug!("Committed {} ({} bytes)", final_path.display(), bytes.len());
        Ok(MessageLocation {
            filename,
            folder: self.inbox.name.clone(),
            subfolder: Subfolder::New,
            path: final_path,
        })
    }

    async fn write_and_publish(&self, tmp_path: &Path, final_path: &Path, bytes: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(tmp_path)
            .await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        set_mode(tmp_path).await?;
        if self.ownership != Ownership::default() {
            let path = tmp_path.to_path_buf();
            let Ownership { uid, gid } = self.ownership;
            tokio::task::spawn_blocking(move || chown(&path, uid, gid))
                .await
                .map_err(io::Error::other)??;
        }

        tokio::fs::rename(tmp_path, final_path).await
    }
}

/// Host part of a Maildir filename; separators would break the grammar.
fn host_tag(host: &str) -> String {
    let tag: String = host
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '.' | '\0' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect();
    if tag.is_empty() {
        "localhost".to_string()
    } else {
        tag
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(FILE_MODE)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn chown(path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
    std::os::unix::fs::chown(path, uid, gid)
}

#[cfg(not(unix))]
fn chown(_path: &Path, _uid: Option<u32>, _gid: Option<u32>) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn writer(dir: &TempDir) -> (Maildir, MessageWriter) {
        let maildir = Maildir::new(dir.path(), "catchall");
        let writer = MessageWriter::new(&maildir, "mail.example.com", Ownership::default());
        (maildir, writer)
    }

    #[tokio::test]
    async fn committed_bytes_are_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let (maildir, writer) = writer(&dir);
        let body = b"Subject: hi\r\n\r\n\xff\x00binary\r\n".to_vec();

        let location = writer.commit(&body).await.unwrap();

        assert_eq!(location.subfolder, Subfolder::New);
        assert_eq!(location.path.parent().unwrap(), maildir.root().join("new"));
        assert_eq!(tokio::fs::read(&location.path).await.unwrap(), body);
        let leftovers = std::fs::read_dir(maildir.root().join("tmp")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn filename_follows_grammar() {
        let dir = tempfile::tempdir().unwrap();
        let (_, writer) = writer(&dir);
        let location = writer.commit_at(1_700_000_000, b"x").await.unwrap();

        let parts: Vec<&str> = location.filename.split('.').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "1700000000");
        assert_eq!(parts[1].len(), 16);
        assert!(parts[1].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(parts[2], "mail_example_com");
    }

    #[tokio::test]
    async fn concurrent_commits_get_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let (_, writer) = writer(&dir);
        let a = writer.commit_at(1, b"a").await.unwrap();
        let b = writer.commit_at(1, b"b").await.unwrap();
        assert_ne!(a.filename, b.filename);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn committed_file_mode_is_fixed() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let (_, writer) = writer(&dir);
        let location = writer.commit(b"x").await.unwrap();
        let mode = std::fs::metadata(&location.path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, FILE_MODE);
    }

    #[tokio::test]
    async fn unusable_store_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the user directory should be.
        std::fs::write(dir.path().join("catchall"), b"").unwrap();
        let (_, writer) = writer(&dir);

        let err = writer.commit(b"x").await.unwrap_err();
        assert!(matches!(err, StoreError::StoreWrite(_)));
    }

    #[test]
    fn host_tag_strips_separators() {
        assert_eq!(host_tag("a/b:c.d"), "a_b_c_d");
        assert_eq!(host_tag(""), "localhost");
    }
}
