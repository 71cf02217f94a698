//! The `:flags` side effect: IMAP keywords set on a stored copy.

use crate::action::{Action, ActionExecEnv, ResultPrinter, SideEffect};
use crate::actions::store::StoreAction;
use crate::error::ActionError;
use crate::registry::SideEffectType;
use crate::sanitize::sanitize;
use std::any::Any;

pub static FLAGS: SideEffectType = SideEffectType {
    name: "flags",
    description: "set IMAP flags on the stored message",
};

const SYSTEM_FLAGS: [&str; 5] = ["\\Answered", "\\Flagged", "\\Deleted", "\\Seen", "\\Draft"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagsSideEffect {
    keywords: Vec<String>,
}

impl FlagsSideEffect {
    /// Each item may hold several space-separated flags.
    pub fn new<I, S>(flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut this = Self::default();
        for item in flags {
            let item: String = item.into();
            this.extend(item.split_whitespace());
        }
        this
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    fn extend<'a>(&mut self, flags: impl IntoIterator<Item = &'a str>) {
        for flag in flags {
            if !self.keywords.iter().any(|k| k == flag) {
                self.keywords.push(flag.to_string());
            }
        }
    }
}

/// System flags must be one of the RFC 3501 set; keywords must be atoms.
pub fn is_valid_flag(flag: &str) -> bool {
    if let Some(name) = flag.strip_prefix('\\') {
        return SYSTEM_FLAGS
            .iter()
            .any(|s| s[1..].eq_ignore_ascii_case(name));
    }
    !flag.is_empty()
        && flag.chars().all(|c| {
            c.is_ascii_graphic() && !matches!(c, '(' | ')' | '{' | '%' | '*' | '"' | '\\' | ']')
        })
}

impl SideEffect for FlagsSideEffect {
    fn side_effect_type(&self) -> &'static SideEffectType {
        &FLAGS
    }

    fn print(&self, printer: &mut ResultPrinter) {
        printer.side_effect(&format!("add IMAP flags: {}", self.keywords.join(" ")));
    }

    fn merge(&mut self, other: &dyn SideEffect) {
        if let Some(other) = other.as_any().downcast_ref::<FlagsSideEffect>() {
            self.extend(other.keywords.iter().map(String::as_str));
        }
    }

    fn pre_execute(
        &self,
        action: &mut dyn Action,
        env: &mut ActionExecEnv<'_>,
    ) -> Result<(), ActionError> {
        let name = action.action_type().name;
        let Some(store) = action.as_any_mut().downcast_mut::<StoreAction>() else {
            env.warning(format!("IMAP flags ignored for {name} action"));
            return Ok(());
        };
        let mut valid = Vec::with_capacity(self.keywords.len());
        for flag in &self.keywords {
            if is_valid_flag(flag) {
                valid.push(flag.clone());
            } else {
                env.warning(format!("IMAP flag '{}' is invalid; ignored", sanitize(flag, 64)));
            }
        }
        store.add_keywords(&valid);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
