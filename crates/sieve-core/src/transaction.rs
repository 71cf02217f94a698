//! Transaction driver.
//!
//! Runs the start → execute → commit protocol over a batch of actions, one
//! phase at a time across the whole batch and in sequence order within a
//! phase. Any start or execute failure rolls back every action that was
//! started. A commit failure rolls back the failing action and every later
//! one; actions already committed stay committed, and so does their
//! cancellation of the implicit keep. Actions a failed start never reached
//! stay `Pending`.

use crate::action::{ActionExecEnv, Phase};
use crate::error::ActionError;
use crate::result::{ActionEntry, ActionState};

/// Drive `entries` through the protocol. Returns whether every action
/// committed.
///
/// Updates `env.status.keep`: it ends up false when any action that
/// committed asked to cancel the implicit keep.
pub(crate) fn run(entries: &mut [ActionEntry], env: &mut ActionExecEnv<'_>) -> bool {
    let span = tracing::debug_span!(target: "sieve", "transaction", actions = entries.len());
    let _enter = span.enter();

    if !start_all(entries, env) || !execute_all(entries, env) {
        rollback_started(entries, env);
        env.status.keep = true;
        return false;
    }

    let (ok, keep_cancelled) = commit_all(entries, env);
    env.status.keep = !keep_cancelled;
    ok
}

fn start_all(entries: &mut [ActionEntry], env: &mut ActionExecEnv<'_>) -> bool {
    for entry in entries.iter_mut() {
        let result = entry.action.start(env);
        // A failed start may still hold resources; rollback releases them.
        entry.state = ActionState::Started;
        if let Err(e) = result {
            report_failure(entry, Phase::Start, &e, env);
            return false;
        }
        tracing::debug!(target: "sieve", action = entry.action.action_type().name, "started");
    }
    true
}

fn execute_all(entries: &mut [ActionEntry], env: &mut ActionExecEnv<'_>) -> bool {
    for entry in entries.iter_mut() {
        if let Err(e) = execute_one(entry, env) {
            report_failure(entry, Phase::Execute, &e, env);
            return false;
        }
        entry.state = ActionState::Executed;
        tracing::debug!(target: "sieve", action = entry.action.action_type().name, "executed");
    }
    true
}

fn execute_one(entry: &mut ActionEntry, env: &mut ActionExecEnv<'_>) -> Result<(), ActionError> {
    for side_effect in &entry.side_effects {
        side_effect.pre_execute(entry.action.as_mut(), env)?;
    }
    entry.action.execute(env)
}

/// Returns whether every action committed, and whether any committed action
/// cancelled the implicit keep.
fn commit_all(entries: &mut [ActionEntry], env: &mut ActionExecEnv<'_>) -> (bool, bool) {
    let mut keep_cancelled = false;
    for idx in 0..entries.len() {
        let entry = &mut entries[idx];
        match entry.action.commit(env) {
            Ok(cancel_keep) => {
                entry.state = ActionState::Committed;
                keep_cancelled |= cancel_keep;
                for side_effect in &entry.side_effects {
                    side_effect.post_commit(entry.action.as_ref(), env);
                }
                tracing::debug!(
                    target: "sieve",
                    action = entry.action.action_type().name,
                    cancel_keep,
                    "committed"
                );
            }
            Err(e) => {
                report_failure(entry, Phase::Commit, &e, env);
                entry.action.rollback(env, false);
                entry.state = ActionState::RolledBack;
                for later in entries[idx + 1..].iter_mut() {
                    later.action.rollback(env, true);
                    later.state = ActionState::RolledBack;
                }
                return (false, keep_cancelled);
            }
        }
    }
    (true, keep_cancelled)
}

fn rollback_started(entries: &mut [ActionEntry], env: &mut ActionExecEnv<'_>) {
    for entry in entries.iter_mut() {
        match entry.state {
            ActionState::Started => entry.action.rollback(env, false),
            ActionState::Executed => entry.action.rollback(env, true),
            ActionState::Pending | ActionState::Committed | ActionState::RolledBack => continue,
        }
        entry.state = ActionState::RolledBack;
        tracing::debug!(target: "sieve", action = entry.action.action_type().name, "rolled back");
    }
}

fn report_failure(entry: &ActionEntry, phase: Phase, error: &ActionError, env: &ActionExecEnv<'_>) {
    let text = entry.action.failure_message(phase, error);
    match error {
        ActionError::Internal(_) => env.ehandler.critical(Some(env.location()), text),
        _ => env.error(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ResultPrinter, RuntimeEnv};
    use crate::config::EngineConfig;
    use crate::diag::{ErrorHandler, SharedBuffer};
    use crate::message::MessageData;
    use crate::registry::{ActionFlags, ActionType};
    use crate::status::ExecStatus;
    use std::any::Any;
    use std::cell::RefCell;
    use std::rc::Rc;

    static SCRIPTED: ActionType = ActionType {
        name: "scripted",
        flags: ActionFlags::TRIES_DELIVER,
        instance_limit: 0,
        description: "records hook calls",
    };

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum FailAt {
        Never,
        Start,
        Execute,
        Commit,
    }

    #[derive(Debug)]
    struct Scripted {
        id: u32,
        fail: FailAt,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Scripted {
        fn boxed(id: u32, fail: FailAt, log: &Rc<RefCell<Vec<String>>>) -> Box<dyn Action> {
            Box::new(Scripted {
                id,
                fail,
                log: log.clone(),
            })
        }

        fn hook(&self, phase: FailAt, name: &str) -> Result<(), ActionError> {
            self.log.borrow_mut().push(format!("{name}{}", self.id));
            if self.fail == phase {
                return Err(ActionError::Failed(format!("{name} broke")));
            }
            Ok(())
        }
    }

    impl Action for Scripted {
        fn action_type(&self) -> &'static ActionType {
            &SCRIPTED
        }

        fn print(&self, printer: &mut ResultPrinter, _keep: &mut bool) {
            printer.action(&format!("scripted {}", self.id));
        }

        fn start(&mut self, _env: &mut ActionExecEnv<'_>) -> Result<(), ActionError> {
            self.hook(FailAt::Start, "start")
        }

        fn execute(&mut self, _env: &mut ActionExecEnv<'_>) -> Result<(), ActionError> {
            self.hook(FailAt::Execute, "execute")
        }

        fn commit(&mut self, _env: &mut ActionExecEnv<'_>) -> Result<bool, ActionError> {
            self.hook(FailAt::Commit, "commit").map(|()| true)
        }

        fn rollback(&mut self, _env: &mut ActionExecEnv<'_>, success: bool) {
            self.log
                .borrow_mut()
                .push(format!("rollback{}:{success}", self.id));
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn drive(fails: &[FailAt]) -> (bool, Vec<ActionEntry>, Vec<String>, ExecStatus, String) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut entries: Vec<ActionEntry> = fails
            .iter()
            .enumerate()
            .map(|(i, f)| ActionEntry::new(Scripted::boxed(i as u32 + 1, *f, &log), Default::default()))
            .collect();
        let msg = MessageData::parse("Subject: t\r\n\r\nbody\r\n", None, None).unwrap();
        let buf = SharedBuffer::default();
        let mut env = ActionExecEnv::new(
            RuntimeEnv::new(&msg),
            EngineConfig::default(),
            ErrorHandler::buffer(&buf, false, 0),
            ExecStatus::default(),
        );
        let ok = run(&mut entries, &mut env);
        let status = env.into_status();
        let calls = log.borrow().clone();
        (ok, entries, calls, status, buf.contents())
    }

    fn states(entries: &[ActionEntry]) -> Vec<ActionState> {
        entries.iter().map(|e| e.state()).collect()
    }

    #[test]
    fn phases_run_across_the_batch_in_order() {
        let (ok, entries, calls, status, _) = drive(&[FailAt::Never, FailAt::Never]);
        assert!(ok);
        assert_eq!(
            calls,
            vec!["start1", "start2", "execute1", "execute2", "commit1", "commit2"]
        );
        assert_eq!(states(&entries), vec![ActionState::Committed; 2]);
        assert!(!status.keep);
    }

    #[test]
    fn execute_failure_rolls_back_everything() {
        let (ok, entries, calls, status, log) =
            drive(&[FailAt::Never, FailAt::Execute, FailAt::Never]);
        assert!(!ok);
        assert_eq!(states(&entries), vec![ActionState::RolledBack; 3]);
        assert_eq!(
            calls,
            vec![
                "start1",
                "start2",
                "start3",
                "execute1",
                "execute2",
                "rollback1:true",
                "rollback2:false",
                "rollback3:false",
            ]
        );
        assert!(status.keep);
        assert!(log.contains("error: scripted action failed to execute: execute broke."));
    }

    #[test]
    fn start_failure_skips_unstarted_hooks() {
        let (ok, entries, calls, status, _) =
            drive(&[FailAt::Never, FailAt::Start, FailAt::Never]);
        assert!(!ok);
        assert_eq!(
            states(&entries),
            vec![
                ActionState::RolledBack,
                ActionState::RolledBack,
                ActionState::Pending
            ]
        );
        assert!(status.keep);
        assert_eq!(
            calls,
            vec!["start1", "start2", "rollback1:false", "rollback2:false"]
        );
    }

    #[test]
    fn commit_failure_keeps_earlier_commits() {
        let (ok, entries, calls, status, _) =
            drive(&[FailAt::Never, FailAt::Commit, FailAt::Never]);
        assert!(!ok);
        assert_eq!(
            states(&entries),
            vec![
                ActionState::Committed,
                ActionState::RolledBack,
                ActionState::RolledBack
            ]
        );
        assert_eq!(
            &calls[6..],
            &["commit1", "commit2", "rollback2:false", "rollback3:true"]
        );
        // The first action was delivered; the message must not be kept twice.
        assert!(!status.keep);
    }

    #[test]
    fn commit_failure_first_leaves_keep_active() {
        let (ok, _, _, status, _) = drive(&[FailAt::Commit, FailAt::Never]);
        assert!(!ok);
        assert!(status.keep);
    }

    static NOTE: ActionType = ActionType {
        name: "note",
        flags: ActionFlags::empty(),
        instance_limit: 0,
        description: "does not deliver",
    };

    #[derive(Debug)]
    struct Note;

    impl Action for Note {
        fn action_type(&self) -> &'static ActionType {
            &NOTE
        }

        fn print(&self, printer: &mut ResultPrinter, _keep: &mut bool) {
            printer.action("note");
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn keep_follows_type_flags_unless_commit_overrides() {
        let msg = MessageData::parse("Subject: t\r\n\r\nbody\r\n", None, None).unwrap();
        let mut env = ActionExecEnv::new(
            RuntimeEnv::new(&msg),
            EngineConfig::default(),
            ErrorHandler::buffer(&SharedBuffer::default(), false, 0),
            ExecStatus::default(),
        );
        let mut entries = vec![ActionEntry::new(Box::new(Note), Default::default())];
        assert!(run(&mut entries, &mut env));
        assert!(env.status.keep);

        let log = Rc::new(RefCell::new(Vec::new()));
        let mut entries = vec![
            ActionEntry::new(Box::new(Note), Default::default()),
            ActionEntry::new(Scripted::boxed(1, FailAt::Never, &log), Default::default()),
        ];
        assert!(run(&mut entries, &mut env));
        assert!(!env.status.keep);
    }

    #[test]
    fn empty_batch_keeps_message() {
        let (ok, _, calls, status, _) = drive(&[]);
        assert!(ok);
        assert!(calls.is_empty());
        assert!(status.keep);
    }
}
