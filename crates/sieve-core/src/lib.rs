pub mod action;
pub mod actions;
pub mod config;
pub mod diag;
pub mod duplicate;
pub mod error;
pub mod maildir;
pub mod message;
pub mod registry;
pub mod result;
pub mod sanitize;
pub mod smtp;
pub mod status;
pub mod storage;
mod transaction;

pub use action::{Action, RuntimeEnv, SideEffect, SourceLocation};
pub use config::EngineConfig;
pub use diag::ErrorHandler;
pub use error::{ActionError, Result, SieveError};
pub use message::MessageData;
pub use result::SieveResult;
pub use status::{ExecOutcome, ExecStatus};
