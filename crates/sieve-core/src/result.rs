//! The result container: the ordered actions one filtering run produced.

use crate::action::{
    Action, ActionExecEnv, AddEnv, DuplicateCheck, ResultPrinter, RuntimeEnv, SideEffect,
    SourceLocation,
};
use crate::actions::store::StoreAction;
use crate::config::EngineConfig;
use crate::diag::ErrorHandler;
use crate::error::{Result, SieveError};
use crate::registry::{self, ActionType};
use crate::status::{ExecOutcome, ExecStatus};
use crate::transaction;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ActionState / ActionEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Pending,
    Started,
    Executed,
    Committed,
    RolledBack,
}

/// One pending action with its side effects.
#[derive(Debug)]
pub struct ActionEntry {
    pub(crate) action: Box<dyn Action>,
    pub(crate) side_effects: Vec<Box<dyn SideEffect>>,
    location: SourceLocation,
    pub(crate) state: ActionState,
}

impl ActionEntry {
    pub(crate) fn new(action: Box<dyn Action>, location: SourceLocation) -> Self {
        Self {
            action,
            side_effects: Vec::new(),
            location,
            state: ActionState::Pending,
        }
    }

    pub fn action(&self) -> &dyn Action {
        self.action.as_ref()
    }

    pub fn action_type(&self) -> &'static ActionType {
        self.action.action_type()
    }

    pub fn side_effects(&self) -> impl Iterator<Item = &dyn SideEffect> + '_ {
        self.side_effects.iter().map(|s| s.as_ref())
    }

    pub fn location(&self) -> &SourceLocation {
        &self.location
    }

    pub fn state(&self) -> ActionState {
        self.state
    }

    /// Attach a side effect, merging it into one of the same type if present.
    fn attach(&mut self, side_effect: Box<dyn SideEffect>) {
        let ty = side_effect.side_effect_type();
        match self
            .side_effects
            .iter_mut()
            .find(|s| s.side_effect_type() == ty)
        {
            Some(existing) => existing.merge(side_effect.as_ref()),
            None => self.side_effects.push(side_effect),
        }
    }
}

// ---------------------------------------------------------------------------
// SieveResult
// ---------------------------------------------------------------------------

/// The pending actions of one run, in program order, plus the run's
/// diagnostic handler and outcome state.
///
/// Adding an action runs duplicate and conflict resolution against what is
/// already there; survivors are never reordered.
#[derive(Debug)]
pub struct SieveResult {
    config: EngineConfig,
    ehandler: ErrorHandler,
    entries: Vec<ActionEntry>,
    status: ExecStatus,
    executed: bool,
}

impl SieveResult {
    pub fn new(config: EngineConfig, ehandler: ErrorHandler) -> Self {
        Self {
            config,
            ehandler,
            entries: Vec::new(),
            status: ExecStatus::default(),
            executed: false,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ehandler(&self) -> &ErrorHandler {
        &self.ehandler
    }

    pub fn status(&self) -> &ExecStatus {
        &self.status
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ActionEntry> {
        self.entries.iter()
    }

    // -----------------------------------------------------------------------
    // Adding actions
    // -----------------------------------------------------------------------

    pub fn add_action(
        &mut self,
        mut action: Box<dyn Action>,
        side_effects: Vec<Box<dyn SideEffect>>,
        location: SourceLocation,
    ) -> Result<()> {
        let action_type = action.action_type();
        let registry = registry::global();
        if !registry.contains(action_type) {
            return Err(SieveError::UnknownAction(action_type.name.to_string()));
        }
        if let Some(unknown) = side_effects
            .iter()
            .find(|s| !registry.contains_side_effect(s.side_effect_type()))
        {
            return Err(SieveError::UnknownAction(
                unknown.side_effect_type().name.to_string(),
            ));
        }

        let verdict = {
            let env = AddEnv {
                config: &self.config,
                ehandler: &self.ehandler,
                location: &location,
            };
            match self.check_conflicts(&env, action.as_ref()) {
                Some(reason) => Err(reason),
                None => Ok(Self::check_duplicates(&self.entries, &env, action.as_mut())),
            }
        };

        match verdict {
            Err(reason) | Ok((_, DuplicateCheck::Conflict(reason))) => {
                Err(self.conflict(action_type, &location, reason))
            }
            Ok((Some(idx), DuplicateCheck::DropNew)) => {
                let entry = &mut self.entries[idx];
                for side_effect in side_effects {
                    entry.attach(side_effect);
                }
                Ok(())
            }
            Ok((Some(idx), DuplicateCheck::ReplaceExisting)) => {
                let entry = &mut self.entries[idx];
                entry.action = action;
                entry.location = location;
                for side_effect in side_effects {
                    entry.attach(side_effect);
                }
                Ok(())
            }
            Ok(_) => {
                self.check_limits(action_type, &location)?;
                let mut entry = ActionEntry::new(action, location);
                for side_effect in side_effects {
                    entry.attach(side_effect);
                }
                self.entries.push(entry);
                Ok(())
            }
        }
    }

    /// Conflict with any action of a different type, asked in both directions.
    fn check_conflicts(&self, env: &AddEnv<'_>, action: &dyn Action) -> Option<String> {
        let action_type = action.action_type();
        self.entries
            .iter()
            .filter(|e| e.action_type() != action_type)
            .find_map(|e| {
                action
                    .check_conflict(env, e.action())
                    .or_else(|| e.action().check_conflict(env, action))
            })
    }

    /// First non-independent verdict against earlier actions of the same
    /// type, with the index of the earlier action.
    fn check_duplicates(
        entries: &[ActionEntry],
        env: &AddEnv<'_>,
        action: &mut dyn Action,
    ) -> (Option<usize>, DuplicateCheck) {
        let action_type = action.action_type();
        for (idx, entry) in entries.iter().enumerate() {
            if entry.action_type() != action_type {
                continue;
            }
            match action.check_duplicate(env, entry.action()) {
                DuplicateCheck::Independent => {}
                verdict => return (Some(idx), verdict),
            }
        }
        (None, DuplicateCheck::Independent)
    }

    fn check_limits(&self, action_type: &'static ActionType, location: &SourceLocation) -> Result<()> {
        let limit = self.config.max_actions;
        if limit > 0 && self.entries.len() >= limit {
            let err = SieveError::ActionLimit { limit };
            self.ehandler.error(Some(&location.to_string()), &err);
            return Err(err);
        }
        let limit = action_type.instance_limit;
        if limit > 0
            && self
                .entries
                .iter()
                .filter(|e| e.action_type() == action_type)
                .count()
                >= limit
        {
            let err = SieveError::InstanceLimit {
                action: action_type.name.to_string(),
                limit,
            };
            self.ehandler.error(Some(&location.to_string()), &err);
            return Err(err);
        }
        Ok(())
    }

    fn conflict(
        &self,
        action_type: &ActionType,
        location: &SourceLocation,
        reason: String,
    ) -> SieveError {
        let location = location.to_string();
        self.ehandler.error(
            Some(&location),
            format!("conflicting {} action: {reason}", action_type.name),
        );
        SieveError::ConflictingAction {
            action: action_type.name.to_string(),
            location,
            reason,
        }
    }

    // -----------------------------------------------------------------------
    // Printing
    // -----------------------------------------------------------------------

    /// Dry-run description of what executing would do.
    pub fn print(&self) -> String {
        let mut printer = ResultPrinter::default();
        let mut keep = true;

        printer.raw("\nPerformed actions:\n\n");
        if self.entries.is_empty() {
            printer.raw("  (none)\n");
        }
        for entry in &self.entries {
            entry.action.print(&mut printer, &mut keep);
            for side_effect in &entry.side_effects {
                side_effect.print(&mut printer);
            }
        }

        printer.raw("\nImplicit keep:\n\n");
        if keep {
            StoreAction::keep(&self.config.default_mailbox).print(&mut printer, &mut keep);
        } else {
            printer.raw("  (none)\n");
        }
        printer.finish()
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run the transaction over every action. A result executes once; a
    /// second call is an internal error and reports failure.
    pub fn execute(&mut self, runtime: RuntimeEnv<'_>) -> ExecStatus {
        if self.executed {
            self.ehandler
                .critical(None, SieveError::AlreadyExecuted.to_string());
            return ExecStatus {
                outcome: ExecOutcome::Failure,
                ..self.status.clone()
            };
        }
        self.executed = true;

        let mut env = ActionExecEnv::new(
            runtime,
            self.config.clone(),
            self.ehandler.clone(),
            ExecStatus::default(),
        );
        let ok = transaction::run(&mut self.entries, &mut env);
        self.status = env.into_status();
        self.status.outcome = if ok {
            ExecOutcome::Ok
        } else {
            ExecOutcome::Failure
        };
        tracing::debug!(
            target: "sieve",
            outcome = %self.status.outcome,
            keep = self.status.keep,
            "result executed"
        );
        self.status.clone()
    }

    /// Give up on a run whose script failed before its actions could be
    /// executed. Nothing is performed; the implicit keep stays in effect.
    pub fn abort(&mut self) -> ExecStatus {
        self.executed = true;
        self.status = ExecStatus {
            outcome: ExecOutcome::Failure,
            ..ExecStatus::default()
        };
        self.status.clone()
    }

    /// Store the message into the default mailbox, as the implicit keep.
    ///
    /// Callers invoke this after [`execute`](Self::execute) when
    /// `status().keep` is still set. That includes every failed run in which
    /// no committed action had cancelled the keep. A failing keep turns the
    /// outcome into [`ExecOutcome::KeepFailed`].
    pub fn implicit_keep(&mut self, runtime: RuntimeEnv<'_>) -> ExecStatus {
        let mut entries = [ActionEntry::new(
            Box::new(StoreAction::keep(&self.config.default_mailbox)),
            SourceLocation::default(),
        )];
        let mut env = ActionExecEnv::new(
            runtime,
            self.config.clone(),
            self.ehandler.clone(),
            self.status.clone(),
        );
        let ok = transaction::run(&mut entries, &mut env);
        self.status = env.into_status();
        if !ok {
            self.status.outcome = ExecOutcome::KeepFailed;
        }
        self.status.clone()
    }
}
