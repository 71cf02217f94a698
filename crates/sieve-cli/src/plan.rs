//! Action plans: the list of actions a filtering script decided on, as YAML.
//!
//! ```yaml
//! - action: fileinto
//!   folder: Lists/rust
//!   flags: ["\\Seen"]
//!   line: 3
//! - action: notify
//!   options: ["ops@example.org"]
//!   importance: 1
//! - action: keep
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sieve_core::action::{Action, SideEffect, SourceLocation};
use sieve_core::actions::discard::DiscardAction;
use sieve_core::actions::flags::FlagsSideEffect;
use sieve_core::actions::notify::NotifyAction;
use sieve_core::actions::store::StoreAction;
use sieve_core::{MessageData, SieveResult};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    #[serde(alias = "fileinto")]
    Store,
    Keep,
    Discard,
    Notify,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub action: PlanAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    /// IMAP flags for the stored copy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    /// Notify recipients.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Script line; defaults to the entry's position in the plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// Script name used in report locations.
    pub script: Option<String>,
    pub entries: Vec<PlanEntry>,
}

impl Plan {
    /// Load a plan; the script name is the file stem.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read plan {}", path.display()))?;
        let script = path.file_stem().map(|s| s.to_string_lossy().into_owned());
        Self::from_yaml_str(&data, script)
            .with_context(|| format!("invalid plan {}", path.display()))
    }

    pub fn from_yaml_str(data: &str, script: Option<String>) -> anyhow::Result<Self> {
        let entries = if data.trim().is_empty() {
            Vec::new()
        } else {
            serde_yaml::from_str(data)?
        };
        Ok(Self { script, entries })
    }

    /// Add every entry to `result`, in order. Stops at the first entry that
    /// cannot be added; the error has been reported through the result's
    /// handler by then.
    pub fn apply(&self, result: &mut SieveResult, message: &MessageData) -> anyhow::Result<()> {
        for (idx, entry) in self.entries.iter().enumerate() {
            let location =
                SourceLocation::new(self.script.as_deref(), entry.line.unwrap_or(idx as u32 + 1));
            let action = match build_action(entry, result, message, &location) {
                Ok(action) => action,
                Err(e) => {
                    result.ehandler().error(Some(&location.to_string()), &e);
                    return Err(e);
                }
            };
            let side_effects: Vec<Box<dyn SideEffect>> = if entry.flags.is_empty() {
                Vec::new()
            } else {
                vec![Box::new(FlagsSideEffect::new(entry.flags.iter().cloned()))]
            };
            result
                .add_action(action, side_effects, location.clone())
                .with_context(|| format!("{location}: failed to add {:?} action", entry.action))?;
        }
        Ok(())
    }
}

fn build_action(
    entry: &PlanEntry,
    result: &SieveResult,
    message: &MessageData,
    location: &SourceLocation,
) -> anyhow::Result<Box<dyn Action>> {
    let action: Box<dyn Action> = match entry.action {
        PlanAction::Store => {
            let Some(folder) = entry.folder.as_deref() else {
                anyhow::bail!("fileinto needs a folder");
            };
            Box::new(StoreAction::new(folder))
        }
        PlanAction::Keep => Box::new(StoreAction::keep(&result.config().default_mailbox)),
        PlanAction::Discard => Box::new(DiscardAction),
        PlanAction::Notify => {
            let mut builder = NotifyAction::builder()
                .recipients(entry.options.iter().cloned())
                .source(message)
                .report_to(result.ehandler(), location);
            if let Some(id) = &entry.id {
                builder = builder.id(id.clone());
            }
            if let Some(importance) = entry.importance {
                builder = builder.importance(importance);
            }
            if let Some(template) = &entry.message {
                builder = builder.message(template.clone());
            }
            Box::new(builder.build()?)
        }
    };
    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_core::diag::SharedBuffer;
    use sieve_core::{EngineConfig, ErrorHandler};

    const PLAN: &str = r#"
- action: fileinto
  folder: Work
  flags: ["\\Seen urgent"]
- action: notify
  options: ["ops@example.org"]
  message: "$subject$"
  importance: 2
  line: 9
- action: keep
"#;

    fn message() -> MessageData {
        MessageData::parse("Subject: Build failed\r\n\r\nx\r\n", None, None).unwrap()
    }

    fn result() -> (SieveResult, SharedBuffer) {
        let buf = SharedBuffer::default();
        let handler = ErrorHandler::buffer(&buf, false, 0);
        (SieveResult::new(EngineConfig::default(), handler), buf)
    }

    #[test]
    fn parses_entries() {
        let plan = Plan::from_yaml_str(PLAN, Some("main".into())).unwrap();
        assert_eq!(plan.entries.len(), 3);
        assert_eq!(plan.entries[0].action, PlanAction::Store);
        assert_eq!(plan.entries[1].line, Some(9));
        assert_eq!(plan.entries[2].action, PlanAction::Keep);
    }

    #[test]
    fn empty_plan_is_allowed() {
        let plan = Plan::from_yaml_str("", None).unwrap();
        assert!(plan.entries.is_empty());
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert!(Plan::from_yaml_str("- action: vacation\n", None).is_err());
    }

    #[test]
    fn apply_builds_actions_in_order() {
        let plan = Plan::from_yaml_str(PLAN, Some("main".into())).unwrap();
        let (mut result, _) = result();
        plan.apply(&mut result, &message()).unwrap();

        let names: Vec<&str> = result.iter().map(|e| e.action_type().name).collect();
        assert_eq!(names, vec!["store", "notify", "store"]);
        assert_eq!(result.iter().nth(1).unwrap().location().to_string(), "main: line 9");
        let printed = result.print();
        assert!(printed.contains("  * store message in folder: Work\n        + add IMAP flags: \\Seen urgent\n"));
        assert!(printed.contains("    => message       : Build failed\n"));
    }

    #[test]
    fn missing_folder_is_reported_at_entry() {
        let plan = Plan::from_yaml_str("- action: discard\n- action: store\n", Some("s".into()))
            .unwrap();
        let (mut result, buf) = result();
        assert!(plan.apply(&mut result, &message()).is_err());
        assert_eq!(result.len(), 1);
        assert!(buf.contents().contains("s: line 2: error: fileinto needs a folder."));
    }
}
