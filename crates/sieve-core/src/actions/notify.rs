//! The deprecated `notify` command with the `mailto` method.
//!
//! Sends a short notification mail about the filtered message to a list of
//! recipients. Recipients already notified by an earlier notify action in
//! the same result are dropped; a notify left with no recipients is not
//! added at all.

use crate::action::{Action, ActionExecEnv, AddEnv, DuplicateCheck, ResultPrinter, SourceLocation};
use crate::config::EngineConfig;
use crate::diag::ErrorHandler;
use crate::duplicate::compact_against;
use crate::error::{ActionError, Result};
use crate::message::{Address, MessageData};
use crate::registry::{ActionFlags, ActionType};
use crate::sanitize::sanitize;
use chrono::{DateTime, Local};
use regex::{Captures, Regex};
use std::any::Any;
use std::sync::OnceLock;

pub static NOTIFY: ActionType = ActionType {
    name: "notify",
    flags: ActionFlags::SENDS_RESPONSE,
    instance_limit: 0,
    description: "send a notification mail (deprecated notify extension)",
};

pub const MAX_RECIPIENTS: usize = 8;
pub const DEFAULT_MESSAGE: &str = "$from$: $subject$";

const SUBJECT: &str = "[SIEVE] New mail notification";
const X_SIEVE: &str = concat!("sieve-core ", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct Recipient {
    /// As written in the script.
    pub full: String,
    pub address: Address,
}

#[derive(Debug, Clone)]
pub struct NotifyAction {
    id: Option<String>,
    importance: u8,
    message: String,
    recipients: Vec<Recipient>,
}

impl NotifyAction {
    pub fn builder<'a>() -> NotifyBuilder<'a> {
        NotifyBuilder::default()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// 1 (high) to 3 (low).
    pub fn importance(&self) -> u8 {
        self.importance
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    pub fn recipient_list(&self) -> Vec<String> {
        self.recipients.iter().map(|r| r.full.clone()).collect()
    }

    /// The notification mail: RFC 2822 header block, blank line, body.
    pub fn compose(&self, config: &EngineConfig, now: DateTime<Local>) -> String {
        let mut msg = String::with_capacity(512 + self.message.len());
        header(&mut msg, "X-Sieve", X_SIEVE);
        header(&mut msg, "Date", &now.to_rfc2822());

        let (priority, importance) = match self.importance {
            1 => ("1 (Highest)", "High"),
            3 => ("5 (Lowest)", "Low"),
            _ => ("3 (Normal)", "Normal"),
        };
        header(&mut msg, "X-Priority", priority);
        header(&mut msg, "Importance", importance);

        header(&mut msg, "From", &config.postmaster_address);
        header(&mut msg, "Subject", SUBJECT);
        header(&mut msg, "Auto-Submitted", "auto-generated (notify)");
        header(&mut msg, "Precedence", "bulk");
        header(&mut msg, "MIME-Version", "1.0");
        if self.message.is_ascii() {
            header(&mut msg, "Content-Type", "text/plain; charset=us-ascii");
            header(&mut msg, "Content-Transfer-Encoding", "7bit");
        } else {
            header(&mut msg, "Content-Type", "text/plain; charset=utf-8");
            header(&mut msg, "Content-Transfer-Encoding", "8bit");
        }
        let message_id = format!(
            "<{}.{}@{}>",
            now.timestamp(),
            uuid::Uuid::new_v4().simple(),
            config.hostname
        );
        header(&mut msg, "Message-ID", &message_id);

        let to: Vec<&str> = self.recipients.iter().map(|r| r.full.as_str()).collect();
        header(&mut msg, "To", &to.join(", "));

        msg.push_str("\r\n");
        msg.push_str(&self.message);
        msg.push_str("\r\n");
        msg
    }

    /// Recipients for log lines: the first three, then a total.
    fn summary(&self) -> String {
        let mut all = self
            .recipients
            .iter()
            .take(3)
            .map(|r| format!("<{}>", r.address))
            .collect::<Vec<_>>()
            .join(", ");
        if self.recipients.len() > 3 {
            all.push_str(&format!(", ... ({} total)", self.recipients.len()));
        }
        all
    }
}

fn header(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push_str("\r\n");
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects the command's arguments and validates them into a
/// [`NotifyAction`].
#[derive(Default)]
pub struct NotifyBuilder<'a> {
    id: Option<String>,
    importance: Option<i64>,
    template: Option<String>,
    recipients: Vec<String>,
    source: Option<&'a MessageData>,
    report: Option<(&'a ErrorHandler, String)>,
}

impl<'a> NotifyBuilder<'a> {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Clamped to 1..=3. Defaults to 1.
    pub fn importance(mut self, importance: i64) -> Self {
        self.importance = Some(importance);
        self
    }

    /// Message template; see [`expand_message`].
    pub fn message(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn recipients<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recipients.extend(recipients.into_iter().map(Into::into));
        self
    }

    /// Message the template variables are taken from.
    pub fn source(mut self, message: &'a MessageData) -> Self {
        self.source = Some(message);
        self
    }

    /// Where recipient warnings go. Invalid recipients are returned as
    /// errors instead.
    pub fn report_to(mut self, ehandler: &'a ErrorHandler, location: &SourceLocation) -> Self {
        self.report = Some((ehandler, location.to_string()));
        self
    }

    pub fn build(self) -> Result<NotifyAction> {
        let importance = self.importance.unwrap_or(1).clamp(1, 3) as u8;
        let template = self.template.as_deref().unwrap_or(DEFAULT_MESSAGE);
        let message = expand_message(template, self.source);

        let mut recipients: Vec<Recipient> = Vec::with_capacity(self.recipients.len());
        for raw in &self.recipients {
            let address = Address::parse(raw)?;

            if recipients.iter().any(|r| r.address == address) {
                self.warn(format!(
                    "duplicate recipient '{}' specified in the :options argument of the deprecated notify command",
                    sanitize(raw, 128)
                ));
            } else if recipients.len() >= MAX_RECIPIENTS {
                self.warn(format!(
                    "more than the maximum {MAX_RECIPIENTS} recipients are specified for the deprecated notify command; the rest is discarded"
                ));
                break;
            } else {
                recipients.push(Recipient {
                    full: raw.clone(),
                    address,
                });
            }
        }

        Ok(NotifyAction {
            id: self.id,
            importance,
            message,
            recipients,
        })
    }

    fn warn(&self, message: String) {
        match &self.report {
            Some((ehandler, location)) => ehandler.warning(Some(location), message),
            None => tracing::warn!(target: "sieve", "{message}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Message template
// ---------------------------------------------------------------------------

fn variable_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\$(from|env-from|subject|text)(?:\[(\d+)\])?\$")
            .expect("notify variable regex is valid")
    })
}

/// Fill in `$from$`, `$env-from$`, `$subject$`, `$text$` and `$text[n]$`
/// (the first `n` characters of the body). Without a message every
/// variable expands to empty text.
pub fn expand_message(template: &str, source: Option<&MessageData>) -> String {
    variable_re()
        .replace_all(template, |caps: &Captures<'_>| {
            let name = caps[1].to_ascii_lowercase();
            let limit = caps.get(2).and_then(|n| n.as_str().parse::<usize>().ok());
            if limit.is_some() && name != "text" {
                return caps[0].to_string();
            }
            let Some(msg) = source else {
                return String::new();
            };
            match name.as_str() {
                "from" => msg.from().unwrap_or_default().to_string(),
                "env-from" => msg.envelope_sender.clone().unwrap_or_default(),
                "subject" => msg.subject().unwrap_or_default().to_string(),
                _ => match limit {
                    Some(n) => msg.text().chars().take(n).collect(),
                    None => msg.text().to_string(),
                },
            }
        })
        .into_owned()
}

// ---------------------------------------------------------------------------
// Action hooks
// ---------------------------------------------------------------------------

impl Action for NotifyAction {
    fn action_type(&self) -> &'static ActionType {
        &NOTIFY
    }

    fn check_duplicate(&mut self, env: &AddEnv<'_>, existing: &dyn Action) -> DuplicateCheck {
        let Some(other) = existing.as_any().downcast_ref::<NotifyAction>() else {
            return DuplicateCheck::Independent;
        };
        compact_against(&mut self.recipients, &other.recipients, |r| r.address.key());
        if self.recipients.is_empty() {
            env.ehandler.info(
                Some(&env.location_string()),
                "notify action is redundant: all recipients are notified by an earlier notify action",
            );
            return DuplicateCheck::DropNew;
        }
        DuplicateCheck::Independent
    }

    fn print(&self, printer: &mut ResultPrinter, _keep: &mut bool) {
        printer.action("send (deprecated) notification with method 'mailto':");
        printer.raw(&format!("    => importance    : {}\n", self.importance));
        printer.raw(&format!("    => message       : {}\n", self.message));
        if let Some(id) = &self.id {
            printer.raw(&format!("    => id            : {id}\n"));
        }
        printer.raw("    => recipients    :\n");
        if self.recipients.is_empty() {
            printer.raw("       NONE, action has no effect\n");
        }
        for r in &self.recipients {
            printer.raw(&format!("       + To: {}\n", r.full));
        }
        printer.raw("\n");
    }

    fn commit(&mut self, env: &mut ActionExecEnv<'_>) -> std::result::Result<bool, ActionError> {
        if env.message.is_auto_submitted() {
            let from = env
                .message
                .envelope_sender
                .as_deref()
                .map(|s| format!(" from <{s}>"))
                .unwrap_or_default();
            env.log(format!("not sending notification for auto-submitted message{from}"));
            return Ok(false);
        }
        if self.recipients.is_empty() {
            env.warning("notify action specifies no recipients; action has no effect");
            return Ok(false);
        }

        let data = self.compose(&env.config, Local::now());
        let sender = env
            .message
            .envelope_sender
            .as_ref()
            .map(|_| env.config.postmaster_address.clone());
        let rcpts: Vec<String> = self.recipients.iter().map(|r| r.address.to_string()).collect();

        let Some(smtp) = env.smtp.as_deref_mut() else {
            env.warning("notify action has no means to send mail");
            return Ok(false);
        };
        let sent = smtp.send(sender.as_deref(), &rcpts, data.as_bytes());

        let all = self.summary();
        match sent {
            Ok(()) => env.log(format!("sent mail notification to {all}")),
            Err(e) => {
                let kind = if e.temporary { "temporary" } else { "permanent" };
                env.error(format!(
                    "failed to send mail notification to {all}: {} ({kind} failure)",
                    sanitize(&e.message, 512)
                ));
            }
        }
        Ok(false)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
