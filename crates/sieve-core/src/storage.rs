//! Mail-store collaborator interface.
//!
//! The engine never touches mailboxes directly: the `store` action opens a
//! [`Mailbox`] through a [`MailStore`] in its start phase, stages the copy in
//! execute, and finalizes or discards it in commit or rollback.

use crate::message::MessageData;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Machine-readable class of a storage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailErrorKind {
    NotFound,
    NoPermission,
    NoSpace,
    Exists,
    Temporary,
    Other,
}

impl MailErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MailErrorKind::NotFound => "not_found",
            MailErrorKind::NoPermission => "no_permission",
            MailErrorKind::NoSpace => "no_space",
            MailErrorKind::Exists => "exists",
            MailErrorKind::Temporary => "temporary",
            MailErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for MailErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<std::io::ErrorKind> for MailErrorKind {
    fn from(kind: std::io::ErrorKind) -> Self {
        use std::io::ErrorKind as K;
        match kind {
            K::NotFound => MailErrorKind::NotFound,
            K::PermissionDenied => MailErrorKind::NoPermission,
            K::AlreadyExists => MailErrorKind::Exists,
            K::Interrupted | K::WouldBlock | K::TimedOut => MailErrorKind::Temporary,
            _ => MailErrorKind::Other,
        }
    }
}

/// A storage failure: human-readable text plus its kind.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct StorageError {
    pub kind: MailErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: MailErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(mailbox: &str) -> Self {
        Self::new(
            MailErrorKind::NotFound,
            format!("Mailbox doesn't exist: {mailbox}"),
        )
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self.kind, MailErrorKind::Temporary | MailErrorKind::NoSpace)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::new(e.kind().into(), e.to_string())
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A collection of mailboxes, e.g. one user's maildir tree.
pub trait MailStore {
    /// Name used when logging which backend handled a message.
    fn name(&self) -> &str;

    /// Open `name` for saving. `ignore_acls` lifts access restrictions; it is
    /// used for the default mailbox so local delivery cannot be locked out.
    fn open_mailbox(&mut self, name: &str, ignore_acls: bool) -> StorageResult<Box<dyn Mailbox>>;

    fn create_mailbox(&mut self, name: &str) -> StorageResult<()>;

    fn set_subscribed(&mut self, name: &str, subscribed: bool) -> StorageResult<()>;
}

/// One open mailbox holding a save transaction.
pub trait Mailbox {
    fn name(&self) -> &str;

    /// Stage a copy of `message` carrying `keywords`. Nothing is visible to
    /// readers until [`commit`](Mailbox::commit).
    fn copy(&mut self, message: &MessageData, keywords: &[String]) -> StorageResult<()>;

    fn commit(&mut self) -> StorageResult<()>;

    /// Discard anything staged. Safe to call when nothing was staged.
    fn rollback(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_kinds() {
        let e: StorageError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(e.kind, MailErrorKind::NoPermission);
        assert_eq!(e.to_string(), "denied");
    }

    #[test]
    fn temporary_kinds() {
        assert!(StorageError::new(MailErrorKind::Temporary, "later").is_temporary());
        assert!(StorageError::new(MailErrorKind::NoSpace, "full").is_temporary());
        assert!(!StorageError::not_found("Archive").is_temporary());
    }

    #[test]
    fn not_found_message_names_mailbox() {
        let e = StorageError::not_found("Lists/rust");
        assert_eq!(e.kind, MailErrorKind::NotFound);
        assert!(e.to_string().contains("Lists/rust"));
    }
}
