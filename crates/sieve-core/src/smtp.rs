//! Outgoing-mail collaborator interface.

use crate::maildir::atomic_write;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SmtpError {
    /// Whether retrying later may succeed.
    pub temporary: bool,
    pub message: String,
}

impl SmtpError {
    pub fn temporary(message: impl Into<String>) -> Self {
        Self {
            temporary: true,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            temporary: false,
            message: message.into(),
        }
    }
}

/// Submits composed messages. `sender` is the envelope sender; `None`
/// means the null return path.
pub trait SmtpTransport {
    fn send(&mut self, sender: Option<&str>, recipients: &[String], data: &[u8])
        -> Result<(), SmtpError>;
}

/// Envelope written next to each queued message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: Option<String>,
    pub recipients: Vec<String>,
}

/// Transport that queues each message as `<id>.eml` plus an `<id>.yaml`
/// envelope in a directory.
#[derive(Debug, Clone)]
pub struct OutboxDir {
    dir: PathBuf,
}

impl OutboxDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Queued message files, sorted by name.
    pub fn queued(&self) -> std::io::Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "eml") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl SmtpTransport for OutboxDir {
    fn send(
        &mut self,
        sender: Option<&str>,
        recipients: &[String],
        data: &[u8],
    ) -> Result<(), SmtpError> {
        if recipients.is_empty() {
            return Err(SmtpError::permanent("no recipients"));
        }
        let id = format!(
            "{}-{}",
            chrono::Utc::now().format("%Y%m%dT%H%M%S"),
            uuid::Uuid::new_v4().simple()
        );
        let envelope = Envelope {
            sender: sender.map(str::to_owned),
            recipients: recipients.to_vec(),
        };
        let envelope = serde_yaml::to_string(&envelope)
            .map_err(|e| SmtpError::permanent(format!("failed to encode envelope: {e}")))?;

        // Envelope first: a queued .eml always has its envelope.
        atomic_write(&self.dir.join(format!("{id}.yaml")), envelope.as_bytes())
            .map_err(|e| SmtpError::temporary(e.to_string()))?;
        atomic_write(&self.dir.join(format!("{id}.eml")), data)
            .map_err(|e| SmtpError::temporary(e.to_string()))?;
        tracing::debug!(id = %id, recipients = recipients.len(), "queued outgoing message");
        Ok(())
    }
}
