use super::{non_empty, ErrorHandler, Level, Sink};

/// Decorator that re-emits into its parent as `"<prefix>: <location>: <message>"`
/// under a fixed location of its own.
#[derive(Debug, Default)]
pub struct PrefixSink {
    location: Option<String>,
    prefix: Option<String>,
}

impl PrefixSink {
    pub fn new(location: Option<&str>, prefix: Option<&str>) -> Self {
        Self {
            location: location.map(str::to_owned),
            prefix: prefix.map(str::to_owned),
        }
    }

    fn decorate(&self, location: Option<&str>, message: &str) -> String {
        let mut text = String::new();
        for part in [self.prefix.as_deref(), location].into_iter().flatten() {
            if !part.is_empty() {
                text.push_str(part);
                text.push_str(": ");
            }
        }
        text.push_str(message);
        text
    }
}

impl Sink for PrefixSink {
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
        let text = self.decorate(location, message);
        let own_location = non_empty(self.location.as_deref());
        match level {
            Level::Error | Level::Warning => parent.report(level, own_location, &text),
            Level::Info | Level::Debug => parent.direct(level, own_location, &text),
        }
    }
}
