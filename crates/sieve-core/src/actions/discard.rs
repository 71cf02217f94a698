use crate::action::{Action, ActionExecEnv, AddEnv, DuplicateCheck, ResultPrinter};
use crate::error::ActionError;
use crate::registry::{ActionFlags, ActionType};
use std::any::Any;

pub static DISCARD: ActionType = ActionType {
    name: "discard",
    flags: ActionFlags::empty(),
    instance_limit: 0,
    description: "silently drop the message",
};

/// Cancels the implicit keep. Delivers nothing itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardAction;

impl Action for DiscardAction {
    fn action_type(&self) -> &'static ActionType {
        &DISCARD
    }

    fn check_duplicate(&mut self, _env: &AddEnv<'_>, _existing: &dyn Action) -> DuplicateCheck {
        DuplicateCheck::DropNew
    }

    fn print(&self, printer: &mut ResultPrinter, keep: &mut bool) {
        printer.action("discard");
        *keep = false;
    }

    fn commit(&mut self, env: &mut ActionExecEnv<'_>) -> Result<bool, ActionError> {
        env.log("marked message to be discarded if not explicitly delivered (discard action)");
        Ok(true)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
