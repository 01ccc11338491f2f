//! Physical layout of the catch-all store.
//!
//! ```text
//! <base>/<user>/Maildir/
//!   new/ cur/ tmp/
//!   .<Folder>/{new,cur,tmp}/
//! <base>/<user>/.read-status.json
//! ```

pub mod folders;
pub mod guard;
pub mod writer;

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const INBOX: &str = "INBOX";
pub const FOLDER_MARKER: char = '.';
pub const READ_STATE_FILE: &str = ".read-status.json";

const TMP: &str = "tmp";

static METADATA_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\..*|dovecot[.-].*|subscriptions|maildirfolder)$")
        .expect("metadata pattern is valid")
});

/// Files the mailbox-protocol server keeps next to messages.
pub fn is_metadata_file(name: &str) -> bool {
    METADATA_FILE.is_match(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Subfolder {
    New,
    Cur,
}

impl Subfolder {
    /// Lookup order: fresh deliveries first.
    pub const ALL: [Subfolder; 2] = [Subfolder::New, Subfolder::Cur];

    pub fn as_str(self) -> &'static str {
        match self {
            Subfolder::New => "new",
            Subfolder::Cur => "cur",
        }
    }
}

impl fmt::Display for Subfolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical folder and the directory holding its `new`/`cur`/`tmp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub name: String,
    pub path: PathBuf,
}

impl Folder {
    pub fn subfolder_path(&self, subfolder: Subfolder) -> PathBuf {
        self.path.join(subfolder.as_str())
    }

    pub fn tmp_path(&self) -> PathBuf {
        self.path.join(TMP)
    }
}

/// Where a message currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageLocation {
    pub filename: String,
    pub folder: String,
    pub subfolder: Subfolder,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Maildir {
    root: PathBuf,
    read_state_path: PathBuf,
}

impl Maildir {
    pub fn new(base_path: impl AsRef<Path>, user: &str) -> Self {
        let user_dir = base_path.as_ref().join(user);
        Maildir {
            root: user_dir.join("Maildir"),
            read_state_path: user_dir.join(READ_STATE_FILE),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn read_state_path(&self) -> &Path {
        &self.read_state_path
    }

    pub fn inbox(&self) -> Folder {
        Folder {
            name: INBOX.to_string(),
            path: self.root.clone(),
        }
    }

    /// Creates `new/`, `cur/` and `tmp/` of the root inbox.
    pub async fn ensure_layout(&self) -> std::io::Result<()> {
        let inbox = self.inbox();
        for subfolder in Subfolder::ALL {
            tokio::fs::create_dir_all(inbox.subfolder_path(subfolder)).await?;
        }
        tokio::fs::create_dir_all(inbox.tmp_path()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_files_are_recognised() {
        assert!(is_metadata_file("dovecot-uidlist"));
        assert!(is_metadata_file("dovecot.index.log"));
        assert!(is_metadata_file(".hidden"));
        assert!(is_metadata_file("maildirfolder"));
        assert!(!is_metadata_file("1700000000.abcdef.localhost"));
        assert!(!is_metadata_file("dovecotish"));
    }

    #[test]
    fn paths_follow_user_layout() {
        let maildir = Maildir::new("/srv/mail", "catchall");
        assert_eq!(maildir.root(), Path::new("/srv/mail/catchall/Maildir"));
        assert_eq!(
            maildir.read_state_path(),
            Path::new("/srv/mail/catchall/.read-status.json")
        );
        assert_eq!(
            maildir.inbox().subfolder_path(Subfolder::Cur),
            Path::new("/srv/mail/catchall/Maildir/cur")
        );
    }

    #[tokio::test]
    async fn ensure_layout_creates_inbox_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let maildir = Maildir::new(dir.path(), "u");
        maildir.ensure_layout().await.unwrap();
        for sub in ["new", "cur", "tmp"] {
            assert!(maildir.root().join(sub).is_dir());
        }
    }
}
