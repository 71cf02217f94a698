//! Directory-backed mail store.
//!
//! Each folder is `<root>/<folder>` holding `tmp/`, `new/`, and `cur/`.
//! Copies are staged as temp files in `tmp/` and persisted into `new/` on
//! commit, so a rolled-back transaction never becomes visible. A folder
//! containing a `.readonly` marker refuses saves unless ACLs are ignored.

use crate::message::MessageData;
use crate::storage::{MailErrorKind, MailStore, Mailbox, StorageError, StorageResult};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;

const SUBSCRIPTIONS: &str = "subscriptions";
const READONLY_MARKER: &str = ".readonly";

/// Atomically write `data` to `path` using a tempfile in the same directory.
pub fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Maildir {
    root: PathBuf,
    hostname: String,
}

impl Maildir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            hostname: "localhost".to_string(),
        }
    }

    /// Host part used in generated message file names.
    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.hostname = hostname.replace(['/', ':'], "_");
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of folder `name`. Any letter case of `INBOX` maps to the
    /// one `INBOX` directory.
    pub fn folder_path(&self, name: &str) -> StorageResult<PathBuf> {
        if is_inbox(name) {
            return Ok(self.root.join("INBOX"));
        }
        let rel = Path::new(name);
        let valid = !name.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::new(
                MailErrorKind::NoPermission,
                format!("invalid mailbox name: {}", crate::sanitize::sanitize(name, 128)),
            ));
        }
        Ok(self.root.join(rel))
    }

    /// Delivered message files in `folder`, sorted by name.
    pub fn messages(&self, folder: &str) -> StorageResult<Vec<PathBuf>> {
        let new_dir = self.folder_path(folder)?.join("new");
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&new_dir)? {
            files.push(entry?.path());
        }
        files.sort();
        Ok(files)
    }

    pub fn subscriptions(&self) -> StorageResult<Vec<String>> {
        let path = self.root.join(SUBSCRIPTIONS);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(path)?;
        Ok(data.lines().map(str::to_owned).collect())
    }

    fn exists(&self, folder: &Path) -> bool {
        folder.join("new").is_dir() && folder.join("tmp").is_dir()
    }

    fn create_dirs(folder: &Path) -> std::io::Result<()> {
        for sub in ["tmp", "new", "cur"] {
            std::fs::create_dir_all(folder.join(sub))?;
        }
        Ok(())
    }
}

fn is_inbox(name: &str) -> bool {
    name.eq_ignore_ascii_case("INBOX")
}

impl MailStore for Maildir {
    fn name(&self) -> &str {
        "maildir"
    }

    fn open_mailbox(&mut self, name: &str, ignore_acls: bool) -> StorageResult<Box<dyn Mailbox>> {
        let folder = self.folder_path(name)?;
        if !self.exists(&folder) {
            if is_inbox(name) {
                Self::create_dirs(&folder)?;
            } else {
                return Err(StorageError::not_found(name));
            }
        }
        if !ignore_acls && folder.join(READONLY_MARKER).exists() {
            return Err(StorageError::new(
                MailErrorKind::NoPermission,
                format!("Permission denied for mailbox {name}"),
            ));
        }
        Ok(Box::new(MaildirMailbox {
            name: name.to_string(),
            folder,
            hostname: self.hostname.clone(),
            staged: Vec::new(),
        }))
    }

    fn create_mailbox(&mut self, name: &str) -> StorageResult<()> {
        let folder = self.folder_path(name)?;
        if self.exists(&folder) {
            return Err(StorageError::new(
                MailErrorKind::Exists,
                format!("Mailbox already exists: {name}"),
            ));
        }
        Self::create_dirs(&folder)?;
        tracing::debug!(mailbox = name, "created maildir folder");
        Ok(())
    }

    fn set_subscribed(&mut self, name: &str, subscribed: bool) -> StorageResult<()> {
        let mut subs = self.subscriptions()?;
        let present = subs.iter().any(|s| s == name);
        match (subscribed, present) {
            (true, false) => subs.push(name.to_string()),
            (false, true) => subs.retain(|s| s != name),
            _ => return Ok(()),
        }
        let mut data = subs.join("\n");
        if !data.is_empty() {
            data.push('\n');
        }
        atomic_write(&self.root.join(SUBSCRIPTIONS), data.as_bytes())?;
        Ok(())
    }
}

/// Save transaction on one maildir folder.
pub struct MaildirMailbox {
    name: String,
    folder: PathBuf,
    hostname: String,
    staged: Vec<NamedTempFile>,
}

impl MaildirMailbox {
    fn unique_name(&self) -> String {
        format!(
            "{}.{}.{}",
            chrono::Utc::now().timestamp(),
            uuid::Uuid::new_v4().simple(),
            self.hostname
        )
    }
}

impl Mailbox for MaildirMailbox {
    fn name(&self) -> &str {
        &self.name
    }

    fn copy(&mut self, message: &MessageData, keywords: &[String]) -> StorageResult<()> {
        let mut tmp = NamedTempFile::new_in(self.folder.join("tmp"))?;
        if !keywords.is_empty() {
            write!(tmp, "X-Keywords: {}\r\n", keywords.join(" "))?;
        }
        tmp.write_all(message.raw())?;
        tmp.flush()?;
        self.staged.push(tmp);
        Ok(())
    }

    fn commit(&mut self) -> StorageResult<()> {
        let new_dir = self.folder.join("new");
        for tmp in std::mem::take(&mut self.staged) {
            let target = new_dir.join(self.unique_name());
            tmp.persist_noclobber(&target).map_err(|e| StorageError::from(e.error))?;
        }
        Ok(())
    }

    fn rollback(&mut self) {
        // Dropping a NamedTempFile deletes it.
        self.staged.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn message() -> MessageData {
        MessageData::parse("Subject: hi\r\n\r\nbody\r\n", None, None).unwrap()
    }

    #[test]
    fn inbox_is_created_on_open() {
        let dir = TempDir::new().unwrap();
        let mut store = Maildir::new(dir.path());
        let mailbox = store.open_mailbox("INBOX", true).unwrap();
        assert_eq!(mailbox.name(), "INBOX");
        assert!(dir.path().join("INBOX/new").is_dir());
    }

    #[test]
    fn inbox_name_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let mut store = Maildir::new(dir.path());
        assert_eq!(store.folder_path("inbox").unwrap(), dir.path().join("INBOX"));

        let mut mailbox = store.open_mailbox("Inbox", true).unwrap();
        mailbox.copy(&message(), &[]).unwrap();
        mailbox.commit().unwrap();
        assert_eq!(store.messages("INBOX").unwrap().len(), 1);
        assert!(!dir.path().join("Inbox").exists());
    }

    #[test]
    fn missing_folder_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mut store = Maildir::new(dir.path());
        let err = store.open_mailbox("Archive", false).err().unwrap();
        assert_eq!(err.kind, MailErrorKind::NotFound);
    }

    #[test]
    fn copy_is_invisible_until_commit() {
        let dir = TempDir::new().unwrap();
        let mut store = Maildir::new(dir.path());
        store.create_mailbox("Work").unwrap();
        let mut mailbox = store.open_mailbox("Work", false).unwrap();

        mailbox
            .copy(&message(), &["$label1".to_string(), "urgent".to_string()])
            .unwrap();
        assert!(store.messages("Work").unwrap().is_empty());

        mailbox.commit().unwrap();
        let files = store.messages("Work").unwrap();
        assert_eq!(files.len(), 1);
        let content = std::fs::read_to_string(&files[0]).unwrap();
        assert!(content.starts_with("X-Keywords: $label1 urgent\r\nSubject: hi"));
    }

    #[test]
    fn rollback_discards_staged_copies() {
        let dir = TempDir::new().unwrap();
        let mut store = Maildir::new(dir.path());
        let mut mailbox = store.open_mailbox("INBOX", true).unwrap();
        mailbox.copy(&message(), &[]).unwrap();
        mailbox.rollback();
        mailbox.commit().unwrap();

        assert!(store.messages("INBOX").unwrap().is_empty());
        assert_eq!(std::fs::read_dir(dir.path().join("INBOX/tmp")).unwrap().count(), 0);
    }

    #[test]
    fn readonly_folder_respects_acl_flag() {
        let dir = TempDir::new().unwrap();
        let mut store = Maildir::new(dir.path());
        store.create_mailbox("Locked").unwrap();
        std::fs::write(dir.path().join("Locked/.readonly"), "").unwrap();

        let err = store.open_mailbox("Locked", false).err().unwrap();
        assert_eq!(err.kind, MailErrorKind::NoPermission);
        assert!(store.open_mailbox("Locked", true).is_ok());
    }

    #[test]
    fn create_twice_reports_exists() {
        let dir = TempDir::new().unwrap();
        let mut store = Maildir::new(dir.path());
        store.create_mailbox("Lists/rust").unwrap();
        let err = store.create_mailbox("Lists/rust").unwrap_err();
        assert_eq!(err.kind, MailErrorKind::Exists);
    }

    #[test]
    fn escaping_names_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = Maildir::new(dir.path());
        assert!(store.folder_path("../etc").is_err());
        assert!(store.folder_path("/abs").is_err());
        assert!(store.folder_path("").is_err());
    }

    #[test]
    fn subscriptions_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut store = Maildir::new(dir.path());
        store.set_subscribed("Work", true).unwrap();
        store.set_subscribed("Work", true).unwrap();
        store.set_subscribed("Play", true).unwrap();
        assert_eq!(store.subscriptions().unwrap(), vec!["Work", "Play"]);
        store.set_subscribed("Work", false).unwrap();
        assert_eq!(store.subscriptions().unwrap(), vec!["Play"]);
    }
}
