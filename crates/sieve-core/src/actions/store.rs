//! `fileinto` and explicit `keep`: save the message into a mailbox.

use crate::action::{Action, ActionExecEnv, AddEnv, DuplicateCheck, Phase, ResultPrinter};
use crate::config::EngineConfig;
use crate::duplicate::same_folder;
use crate::error::ActionError;
use crate::registry::{ActionFlags, ActionType};
use crate::sanitize::sanitize;
use crate::storage::{MailErrorKind, MailStore, Mailbox, StorageError, StorageResult};
use std::any::Any;
use std::fmt;

pub static STORE: ActionType = ActionType {
    name: "store",
    flags: ActionFlags::TRIES_DELIVER,
    instance_limit: 0,
    description: "store the message into a mailbox",
};

pub struct StoreAction {
    folder: String,
    keep: bool,
    keywords: Vec<String>,

    // transaction state
    mailbox: Option<Box<dyn Mailbox>>,
    skipped: bool,
    failed: bool,
}

impl StoreAction {
    /// `fileinto "<folder>"`.
    pub fn new(folder: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            keep: false,
            keywords: Vec::new(),
            mailbox: None,
            skipped: false,
            failed: false,
        }
    }

    /// Explicit `keep`: store into the default mailbox.
    pub fn keep(default_mailbox: &str) -> Self {
        Self {
            keep: true,
            ..Self::new(default_mailbox)
        }
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn is_keep(&self) -> bool {
        self.keep
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Keywords set on the stored copy. Repeats are ignored.
    pub fn add_keywords(&mut self, keywords: &[String]) {
        for kw in keywords {
            if !self.keywords.contains(kw) {
                self.keywords.push(kw.clone());
            }
        }
    }

    fn mailbox_name(&self) -> String {
        sanitize(&self.folder, 128)
    }

    fn fail(&mut self, env: &mut ActionExecEnv<'_>, error: StorageError) -> ActionError {
        self.failed = true;
        env.status.last_storage_error = Some(error.clone());
        ActionError::Storage(error)
    }
}

impl fmt::Debug for StoreAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreAction")
            .field("folder", &self.folder)
            .field("keep", &self.keep)
            .field("keywords", &self.keywords)
            .field("open", &self.mailbox.is_some())
            .finish()
    }
}

fn open_mailbox(
    store: &mut dyn MailStore,
    folder: &str,
    config: &EngineConfig,
) -> StorageResult<Box<dyn Mailbox>> {
    let ignore_acls = folder.eq_ignore_ascii_case("INBOX");
    match store.open_mailbox(folder, ignore_acls) {
        Err(e) if e.kind == MailErrorKind::NotFound && config.mailbox_autocreate => {
            match store.create_mailbox(folder) {
                Ok(()) => {}
                // Lost a race with another delivery.
                Err(e) if e.kind == MailErrorKind::Exists => {}
                Err(e) => return Err(e),
            }
            if config.mailbox_autosubscribe {
                if let Err(e) = store.set_subscribed(folder, true) {
                    tracing::debug!(target: "sieve", folder, error = %e, "subscribe failed");
                }
            }
            store.open_mailbox(folder, ignore_acls)
        }
        other => other,
    }
}

impl Action for StoreAction {
    fn action_type(&self) -> &'static ActionType {
        &STORE
    }

    fn check_duplicate(&mut self, _env: &AddEnv<'_>, existing: &dyn Action) -> DuplicateCheck {
        let Some(other) = existing.as_any().downcast_ref::<StoreAction>() else {
            return DuplicateCheck::Independent;
        };
        if !same_folder(&self.folder, &other.folder) {
            return DuplicateCheck::Independent;
        }
        if self.keep && !other.keep {
            DuplicateCheck::ReplaceExisting
        } else {
            DuplicateCheck::DropNew
        }
    }

    fn print(&self, printer: &mut ResultPrinter, keep: &mut bool) {
        printer.action(&format!("store message in folder: {}", self.mailbox_name()));
        *keep = false;
    }

    fn start(&mut self, env: &mut ActionExecEnv<'_>) -> Result<(), ActionError> {
        let Some(store) = env.store.as_deref_mut() else {
            self.skipped = true;
            return Ok(());
        };
        match open_mailbox(store, &self.folder, &env.config) {
            Ok(mailbox) => {
                self.mailbox = Some(mailbox);
                Ok(())
            }
            Err(e) => Err(self.fail(env, e)),
        }
    }

    fn execute(&mut self, env: &mut ActionExecEnv<'_>) -> Result<(), ActionError> {
        if self.skipped {
            return Ok(());
        }
        if same_folder(&self.folder, &env.config.default_mailbox) {
            env.status.tried_default_save = true;
        }
        env.status.last_storage = env.store.as_deref().map(|s| s.name().to_string());

        let Some(mailbox) = self.mailbox.as_mut() else {
            return Err(ActionError::Internal(format!(
                "no open mailbox for '{}'",
                self.mailbox_name()
            )));
        };
        match mailbox.copy(env.message, &self.keywords) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(env, e)),
        }
    }

    fn commit(&mut self, env: &mut ActionExecEnv<'_>) -> Result<bool, ActionError> {
        if self.skipped {
            env.log(format!("store into mailbox '{}' skipped", self.mailbox_name()));
            return Ok(true);
        }
        let Some(mailbox) = self.mailbox.as_mut() else {
            return Err(ActionError::Internal(format!(
                "no open mailbox for '{}'",
                self.mailbox_name()
            )));
        };
        match mailbox.commit() {
            Ok(()) => {
                self.mailbox = None;
                env.status.message_saved = true;
                env.log(format!("stored mail into mailbox '{}'", self.mailbox_name()));
                Ok(true)
            }
            Err(e) => Err(self.fail(env, e)),
        }
    }

    fn rollback(&mut self, env: &mut ActionExecEnv<'_>, _success: bool) {
        if let Some(mut mailbox) = self.mailbox.take() {
            mailbox.rollback();
        }
        // Our own failure was already reported by the driver.
        if !self.skipped && !self.failed {
            env.log(format!("store into mailbox '{}' aborted", self.mailbox_name()));
        }
    }

    fn failure_message(&self, _phase: Phase, error: &ActionError) -> String {
        format!("failed to store into mailbox '{}': {error}", self.mailbox_name())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{RuntimeEnv, SourceLocation};
    use crate::diag::{ErrorHandler, SharedBuffer};
    use crate::maildir::Maildir;
    use crate::message::MessageData;
    use crate::status::ExecStatus;
    use tempfile::TempDir;

    fn message() -> MessageData {
        MessageData::parse("Subject: x\r\n\r\nhello\r\n", None, None).unwrap()
    }

    fn handler(buf: &SharedBuffer) -> ErrorHandler {
        let handler = ErrorHandler::buffer(buf, false, 0);
        handler.set_info_enabled(true);
        handler
    }

    fn add_env<'a>(
        config: &'a EngineConfig,
        ehandler: &'a ErrorHandler,
        location: &'a SourceLocation,
    ) -> AddEnv<'a> {
        AddEnv {
            config,
            ehandler,
            location,
        }
    }

    #[test]
    fn duplicate_rules() {
        let config = EngineConfig::default();
        let handler = ErrorHandler::buffer(&SharedBuffer::default(), false, 0);
        let loc = SourceLocation::default();
        let env = add_env(&config, &handler, &loc);

        let inbox = StoreAction::new("INBOX");
        assert_eq!(
            StoreAction::new("inbox").check_duplicate(&env, &inbox),
            DuplicateCheck::DropNew
        );
        assert_eq!(
            StoreAction::keep("INBOX").check_duplicate(&env, &inbox),
            DuplicateCheck::ReplaceExisting
        );
        assert_eq!(
            StoreAction::new("INBOX").check_duplicate(&env, &StoreAction::keep("INBOX")),
            DuplicateCheck::DropNew
        );
        assert_eq!(
            StoreAction::new("Archive").check_duplicate(&env, &inbox),
            DuplicateCheck::Independent
        );
    }

    #[test]
    fn keywords_are_unioned() {
        let mut store = StoreAction::new("Work");
        store.add_keywords(&["a".to_string(), "b".to_string()]);
        store.add_keywords(&["b".to_string(), "c".to_string()]);
        assert_eq!(store.keywords(), ["a", "b", "c"]);
    }

    #[test]
    fn autocreate_opens_missing_folder() {
        let dir = TempDir::new().unwrap();
        let mut maildir = Maildir::new(dir.path());
        let msg = message();
        let buf = SharedBuffer::default();
        let config = EngineConfig {
            mailbox_autocreate: true,
            mailbox_autosubscribe: true,
            ..EngineConfig::default()
        };
        let mut env = ActionExecEnv::new(
            RuntimeEnv::new(&msg).with_store(&mut maildir),
            config,
            handler(&buf),
            ExecStatus::default(),
        );

        let mut action = StoreAction::new("Lists");
        action.start(&mut env).unwrap();
        action.execute(&mut env).unwrap();
        assert!(action.commit(&mut env).unwrap());
        let status = env.into_status();
        assert!(status.message_saved);
        assert!(!status.tried_default_save);

        assert_eq!(maildir.messages("Lists").unwrap().len(), 1);
        assert_eq!(maildir.subscriptions().unwrap(), vec!["Lists".to_string()]);
    }

    #[test]
    fn rollback_discards_staged_copy() {
        let dir = TempDir::new().unwrap();
        let mut maildir = Maildir::new(dir.path());
        let msg = message();
        let buf = SharedBuffer::default();
        let mut env = ActionExecEnv::new(
            RuntimeEnv::new(&msg).with_store(&mut maildir),
            EngineConfig::default(),
            handler(&buf),
            ExecStatus::default(),
        );

        let mut action = StoreAction::keep("INBOX");
        action.start(&mut env).unwrap();
        action.execute(&mut env).unwrap();
        action.rollback(&mut env, true);
        assert!(env.status.tried_default_save);
        drop(env);

        assert!(maildir.messages("INBOX").unwrap().is_empty());
        assert!(buf.contents().contains("store into mailbox 'INBOX' aborted"));
    }

    #[test]
    fn missing_folder_fails_start() {
        let dir = TempDir::new().unwrap();
        let mut maildir = Maildir::new(dir.path());
        let msg = message();
        let mut env = ActionExecEnv::new(
            RuntimeEnv::new(&msg).with_store(&mut maildir),
            EngineConfig::default(),
            ErrorHandler::buffer(&SharedBuffer::default(), false, 0),
            ExecStatus::default(),
        );

        let mut action = StoreAction::new("Nope");
        let err = action.start(&mut env).unwrap_err();
        assert_eq!(
            action.failure_message(Phase::Start, &err),
            "failed to store into mailbox 'Nope': Mailbox doesn't exist: Nope"
        );
        assert_eq!(
            env.status.last_storage_error.as_ref().map(|e| e.kind),
            Some(MailErrorKind::NotFound)
        );
    }
}
