use crate::storage::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecOutcome {
    Ok,
    /// The transaction failed and was rolled back.
    Failure,
    /// The implicit keep itself could not store the message.
    KeepFailed,
}

impl fmt::Display for ExecOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecOutcome::Ok => "ok",
            ExecOutcome::Failure => "failure",
            ExecOutcome::KeepFailed => "keep_failed",
        };
        f.write_str(s)
    }
}

/// Outcome state of one run, read by the caller afterwards to decide the
/// final disposition of the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecStatus {
    /// The implicit keep is still in effect.
    pub keep: bool,
    /// Some store action targeted the default mailbox.
    pub tried_default_save: bool,
    pub message_saved: bool,
    /// Name of the last mail store an action used.
    pub last_storage: Option<String>,
    pub last_storage_error: Option<StorageError>,
    pub outcome: ExecOutcome,
}

impl Default for ExecStatus {
    fn default() -> Self {
        Self {
            keep: true,
            tried_default_save: false,
            message_saved: false,
            last_storage: None,
            last_storage_error: None,
            outcome: ExecOutcome::Ok,
        }
    }
}

impl ExecStatus {
    pub fn is_ok(&self) -> bool {
        self.outcome == ExecOutcome::Ok
    }
}
