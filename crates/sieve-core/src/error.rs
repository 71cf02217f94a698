use crate::storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SieveError {
    #[error("{location}: conflicting {action} action: {reason}")]
    ConflictingAction {
        action: String,
        location: String,
        reason: String,
    },

    #[error("total number of actions exceeds policy limit ({limit})")]
    ActionLimit { limit: usize },

    #[error("number of {action} actions exceeds policy limit ({limit})")]
    InstanceLimit { action: String, limit: usize },

    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("unknown action type: {0}")]
    UnknownAction(String),

    #[error("action type '{0}' is already registered")]
    DuplicateActionType(String),

    #[error("action registry is already initialized")]
    RegistryInitialized,

    #[error("result was already executed")]
    AlreadyExecuted,

    #[error("failed to parse message: {0}")]
    MessageParse(#[from] mailparse::MailParseError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Failure of one action hook during execution.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Failed(String),

    /// An invariant was violated. Details go to the master log only.
    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SieveError>;
