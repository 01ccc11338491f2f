use crate::maildir::{Folder, Maildir, FOLDER_MARKER};
use log::warn;

impl Maildir {
    /// The root inbox followed by every `.<Name>` directory, sorted by name.
    pub async fn list_folders(&self) -> Vec<Folder> {
        let mut folders = vec![self.inbox()];
        match self.scan_extra_folders().await {
            Ok(mut extra) => {
                extra.sort_by(|a, b| a.name.cmp(&b.name));
                folders.extend(extra);
            }
            Err(err) => warn!("Cannot scan folders in {}: {}", self.root().display(), err),
        }
        folders
    }

    async fn scan_extra_folders(&self) -> std::io::Result<Vec<Folder>> {
        let mut extra = Vec::new();
        let mut entries = tokio::fs::read_dir(self.root()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            match name.strip_prefix(FOLDER_MARKER) {
                Some(logical) if !logical.is_empty() => extra.push(Folder {
                    name: logical.to_string(),
                    path: entry.path(),
                }),
                _ => {}
            }
        }
        Ok(extra)
    }
}
