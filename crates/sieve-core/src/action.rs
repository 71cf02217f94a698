//! The plugin surface for action kinds.
//!
//! An [`Action`] is one pending effect. Its hooks run in the order
//! `start` → `execute` → `commit`, or `rollback` once anything in the batch
//! fails (see [`crate::transaction`]). Per-action transaction state lives in
//! the action value itself between `start` and its terminal phase.

use crate::config::EngineConfig;
use crate::diag::ErrorHandler;
use crate::error::ActionError;
use crate::message::MessageData;
use crate::registry::{ActionType, SideEffectType};
use crate::sanitize::sanitize;
use crate::smtp::SmtpTransport;
use crate::status::ExecStatus;
use crate::storage::MailStore;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

// ---------------------------------------------------------------------------
// SourceLocation
// ---------------------------------------------------------------------------

/// Where in the filtering script an action was requested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub line: u32,
}

impl SourceLocation {
    pub fn new(script: Option<&str>, line: u32) -> Self {
        Self {
            script: script.map(str::to_owned),
            line,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&ErrorHandler::script_location(
            self.script.as_deref(),
            self.line,
        ))
    }
}

// ---------------------------------------------------------------------------
// Hook outcomes
// ---------------------------------------------------------------------------

/// Verdict of comparing a new action against an earlier one of its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateCheck {
    Independent,
    /// The new action adds nothing; it is not appended and its side effects
    /// are merged into the earlier one.
    DropNew,
    /// The new action takes the earlier one's place in the sequence.
    ReplaceExisting,
    Conflict(String),
}

/// Transaction phase, for failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    Execute,
    Commit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Start => "start",
            Phase::Execute => "execute",
            Phase::Commit => "commit",
        })
    }
}

// ---------------------------------------------------------------------------
// Environments
// ---------------------------------------------------------------------------

/// Context available while an action is being added to a result.
pub struct AddEnv<'a> {
    pub config: &'a EngineConfig,
    pub ehandler: &'a ErrorHandler,
    pub location: &'a SourceLocation,
}

impl AddEnv<'_> {
    pub fn location_string(&self) -> String {
        self.location.to_string()
    }
}

/// What the caller hands to [`SieveResult::execute`](crate::result::SieveResult::execute).
pub struct RuntimeEnv<'a> {
    pub message: &'a MessageData,
    /// `None` runs without a mail store: store actions are skipped but still
    /// count as delivered.
    pub store: Option<&'a mut dyn MailStore>,
    pub smtp: Option<&'a mut dyn SmtpTransport>,
}

impl<'a> RuntimeEnv<'a> {
    pub fn new(message: &'a MessageData) -> Self {
        Self {
            message,
            store: None,
            smtp: None,
        }
    }

    pub fn with_store(mut self, store: &'a mut dyn MailStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_smtp(mut self, smtp: &'a mut dyn SmtpTransport) -> Self {
        self.smtp = Some(smtp);
        self
    }
}

/// Everything an action hook may use during execution.
pub struct ActionExecEnv<'a> {
    pub config: EngineConfig,
    pub message: &'a MessageData,
    pub store: Option<&'a mut dyn MailStore>,
    pub smtp: Option<&'a mut dyn SmtpTransport>,
    pub status: ExecStatus,
    pub ehandler: ErrorHandler,
    location: String,
}

impl<'a> ActionExecEnv<'a> {
    pub fn new(
        runtime: RuntimeEnv<'a>,
        config: EngineConfig,
        ehandler: ErrorHandler,
        status: ExecStatus,
    ) -> Self {
        let location = format!(
            "msgid={}",
            runtime
                .message
                .message_id()
                .map(|id| sanitize(id, 80))
                .unwrap_or_else(|| "unspecified".to_string())
        );
        Self {
            config,
            message: runtime.message,
            store: runtime.store,
            smtp: runtime.smtp,
            status,
            ehandler,
            location,
        }
    }

    /// `msgid=<Message-ID>`, the location of every execution-time report.
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.ehandler.error(Some(&self.location), message);
    }

    pub fn warning(&self, message: impl fmt::Display) {
        self.ehandler.warning(Some(&self.location), message);
    }

    pub fn log(&self, message: impl fmt::Display) {
        self.ehandler.info(Some(&self.location), message);
    }

    pub fn into_status(self) -> ExecStatus {
        self.status
    }
}

// ---------------------------------------------------------------------------
// Result printing
// ---------------------------------------------------------------------------

/// Text sink for dry-run output.
#[derive(Debug, Default)]
pub struct ResultPrinter {
    out: String,
}

impl ResultPrinter {
    /// One `  * <text>` action line.
    pub fn action(&mut self, text: &str) {
        self.out.push_str("  * ");
        self.out.push_str(text);
        self.out.push('\n');
    }

    /// One `        + <text>` side-effect line.
    pub fn side_effect(&mut self, text: &str) {
        self.out.push_str("        + ");
        self.out.push_str(text);
        self.out.push('\n');
    }

    /// Free-form text, written as given.
    pub fn raw(&mut self, text: &str) {
        self.out.push_str(text);
    }

    pub fn finish(self) -> String {
        self.out
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

pub trait Action: fmt::Debug {
    fn action_type(&self) -> &'static ActionType;

    /// Compare against an earlier action of the same type. May rewrite
    /// `self`, e.g. to drop items the earlier action already covers.
    fn check_duplicate(&mut self, _env: &AddEnv<'_>, _existing: &dyn Action) -> DuplicateCheck {
        DuplicateCheck::Independent
    }

    /// Reason this action cannot coexist with `other`, an action of a
    /// different type.
    fn check_conflict(&self, _env: &AddEnv<'_>, _other: &dyn Action) -> Option<String> {
        None
    }

    /// Describe the action. Clearing `keep` hides the implicit keep from
    /// the printed result.
    fn print(&self, printer: &mut ResultPrinter, keep: &mut bool);

    fn start(&mut self, _env: &mut ActionExecEnv<'_>) -> Result<(), ActionError> {
        Ok(())
    }

    fn execute(&mut self, _env: &mut ActionExecEnv<'_>) -> Result<(), ActionError> {
        Ok(())
    }

    /// Finalize. `Ok(true)` cancels the implicit keep.
    ///
    /// The returned flag is what the driver acts on. The default answers
    /// with the type's `TRIES_DELIVER` flag; actions that cancel keep
    /// without delivering (discard) override it and return `Ok(true)`.
    fn commit(&mut self, _env: &mut ActionExecEnv<'_>) -> Result<bool, ActionError> {
        Ok(self.action_type().tries_deliver())
    }

    /// Release whatever `start` acquired. `success` tells whether this
    /// action's own work had succeeded. Must tolerate never having executed.
    fn rollback(&mut self, _env: &mut ActionExecEnv<'_>, _success: bool) {}

    /// Text reported when a hook fails.
    fn failure_message(&self, phase: Phase, error: &ActionError) -> String {
        format!("{} action failed to {phase}: {error}", self.action_type().name)
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub trait SideEffect: fmt::Debug {
    fn side_effect_type(&self) -> &'static SideEffectType;

    fn print(&self, printer: &mut ResultPrinter);

    /// Fold `other`, a side effect of the same type, into this one.
    fn merge(&mut self, other: &dyn SideEffect);

    /// Runs right before the owning action's `execute`.
    fn pre_execute(
        &self,
        _action: &mut dyn Action,
        _env: &mut ActionExecEnv<'_>,
    ) -> Result<(), ActionError> {
        Ok(())
    }

    /// Runs after the owning action committed.
    fn post_commit(&self, _action: &dyn Action, _env: &mut ActionExecEnv<'_>) {}

    fn as_any(&self) -> &dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_location_display() {
        assert_eq!(SourceLocation::new(Some("main"), 12).to_string(), "main: line 12");
        assert_eq!(SourceLocation::new(None, 3).to_string(), "line 3");
    }

    #[test]
    fn exec_location_uses_sanitized_message_id() {
        let msg = MessageData::parse("Message-ID: <abc@example.org>\r\n\r\nx\r\n", None, None)
            .unwrap();
        let env = ActionExecEnv::new(
            RuntimeEnv::new(&msg),
            EngineConfig::default(),
            ErrorHandler::buffer(&Default::default(), false, 0),
            ExecStatus::default(),
        );
        assert_eq!(env.location(), "msgid=<abc@example.org>");

        let anon = MessageData::parse("Subject: x\r\n\r\nx\r\n", None, None).unwrap();
        let env = ActionExecEnv::new(
            RuntimeEnv::new(&anon),
            EngineConfig::default(),
            ErrorHandler::buffer(&Default::default(), false, 0),
            ExecStatus::default(),
        );
        assert_eq!(env.location(), "msgid=unspecified");
    }

    #[test]
    fn printer_layout() {
        let mut printer = ResultPrinter::default();
        printer.action("discard");
        printer.side_effect("add IMAP flags: a");
        printer.raw("    => extra\n");
        assert_eq!(
            printer.finish(),
            "  * discard\n        + add IMAP flags: a\n    => extra\n"
        );
    }
}
