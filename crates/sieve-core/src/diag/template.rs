use super::{ErrorHandler, Level, Sink};
use regex::{Captures, Regex};
use std::sync::OnceLock;

/// One substitution variable for a template decorator: `%<key>` or
/// `%{<long_key>}` expands to `value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub key: char,
    pub long_key: Option<String>,
    pub value: String,
}

impl Substitution {
    pub fn new(key: char, long_key: Option<&str>, value: impl Into<String>) -> Self {
        Self {
            key,
            long_key: long_key.map(str::to_owned),
            value: value.into(),
        }
    }
}

static VAR_RE: OnceLock<Regex> = OnceLock::new();

fn var_re() -> &'static Regex {
    VAR_RE.get_or_init(|| Regex::new(r"%(?:\{([^}]*)\}|(.))").expect("valid template pattern"))
}

/// Decorator that formats every message through a user-supplied template.
///
/// `%$` is the message and `%l` (or `%{location}`) its location; any
/// caller-supplied [`Substitution`]s follow. `%%` is a literal percent sign
/// and unknown keys expand to nothing.
#[derive(Debug)]
pub struct TemplateSink {
    template: String,
    table: Vec<Substitution>,
}

impl TemplateSink {
    pub fn new(template: &str, table: &[Substitution]) -> Self {
        Self {
            template: template.to_owned(),
            table: table.to_vec(),
        }
    }

    pub fn expand(&self, location: Option<&str>, message: &str) -> String {
        var_re()
            .replace_all(&self.template, |caps: &Captures<'_>| {
                if let Some(long) = caps.get(1) {
                    return self.lookup_long(long.as_str(), location).to_owned();
                }
                let key = caps
                    .get(2)
                    .and_then(|m| m.as_str().chars().next())
                    .unwrap_or('%');
                self.lookup_short(key, location, message).to_owned()
            })
            .into_owned()
    }

    fn lookup_short<'a>(
        &'a self,
        key: char,
        location: Option<&'a str>,
        message: &'a str,
    ) -> &'a str {
        match key {
            '%' => "%",
            '$' => message,
            'l' => location.unwrap_or(""),
            _ => self
                .table
                .iter()
                .find(|s| s.key == key)
                .map(|s| s.value.as_str())
                .unwrap_or(""),
        }
    }

    fn lookup_long<'a>(&'a self, key: &str, location: Option<&'a str>) -> &'a str {
        if key == "location" {
            return location.unwrap_or("");
        }
        self.table
            .iter()
            .find(|s| s.long_key.as_deref() == Some(key))
            .map(|s| s.value.as_str())
            .unwrap_or("")
    }
}

impl Sink for TemplateSink {
    fn emit(
        &mut self,
        parent: Option<&ErrorHandler>,
        level: Level,
        location: Option<&str>,
        message: &str,
    ) {
        let Some(parent) = parent else {
            return;
        };
        let text = self.expand(location, message);
        match level {
            Level::Debug => parent.direct(level, location, &text),
            _ => parent.report(level, location, &text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::SharedBuffer;

    fn table() -> Vec<Substitution> {
        vec![
            Substitution::new('u', Some("user"), "alice"),
            Substitution::new('s', Some("script"), "main.sieve"),
        ]
    }

    #[test]
    fn expands_message_location_and_table() {
        let sink = TemplateSink::new("[%u] %{script} %l: %$ (100%%)", &table());
        assert_eq!(
            sink.expand(Some("line 3"), "boom"),
            "[alice] main.sieve line 3: boom (100%)"
        );
    }

    #[test]
    fn unknown_keys_expand_to_nothing() {
        let sink = TemplateSink::new("<%q%{nope}>%$", &[]);
        assert_eq!(sink.expand(None, "msg"), "<>msg");
    }

    #[test]
    fn long_location_key() {
        let sink = TemplateSink::new("%{location} | %$", &[]);
        assert_eq!(sink.expand(Some("x"), "y"), "x | y");
    }

    #[test]
    fn reemits_into_parent_with_original_location() {
        let buf = SharedBuffer::default();
        let root = ErrorHandler::buffer(&buf, false, 0);
        let templated = ErrorHandler::templated(&root, Some("%u says %$"), &table());
        templated.warning(Some("line 1"), "hi");
        assert_eq!(buf.contents(), "line 1: warning: alice says hi.\n");
        assert_eq!(root.ref_count(), 2);
    }

    #[test]
    fn missing_template_returns_parent() {
        let root = ErrorHandler::buffer(&SharedBuffer::default(), false, 0);
        let same = ErrorHandler::templated(&root, None, &table());
        assert!(same.ptr_eq(&root));
    }
}
