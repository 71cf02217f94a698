//! Diagnostic sink chain.
//!
//! An [`ErrorHandler`] is a reference-counted node that routes `error`,
//! `warning`, `info`, and `debug` reports into a [`Sink`]. Decorator sinks
//! (prefix, template) re-emit into their parent node, so handlers compose
//! into chains:
//!
//! ```text
//! TemplateSink ──► PrefixSink ──► FileSink
//!   (child)                        (root) ──► master (if mirroring)
//! ```
//!
//! Each child holds one strong handle to its parent; parents never hold
//! handles to children. Dropping the last handle to a node runs the sink's
//! teardown hook first and then releases the parent handle.

pub mod buffer;
pub mod file;
pub mod master;
pub mod prefix;
pub mod stderr;
pub mod template;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use buffer::{BufferSink, SharedBuffer};
pub use file::FileSink;
pub use prefix::PrefixSink;
pub use stderr::StderrSink;
pub use template::{Substitution, TemplateSink};

const CRITICAL_MSG: &str = "internal error occurred: refer to server log for more information.";

// ---------------------------------------------------------------------------
// Level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Error,
    Warning,
    Info,
    Debug,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Info => "info",
            Level::Debug => "debug",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// The variant-specific half of a diagnostic node.
///
/// `parent` is the node's parent handle, if any; decorators re-emit into it.
pub trait Sink: Send {
    fn emit(
        &mut self,
        parent: Option<&ErrorHandler>,
        level: Level,
        location: Option<&str>,
        message: &str,
    );

    /// Failures the sink hit while emitting (e.g. a log file that could not
    /// be opened). They are forwarded to the master sink once the node has
    /// released its own lock.
    fn take_failures(&mut self) -> Vec<String> {
        Vec::new()
    }

    /// Release external resources. Called exactly once, when the last
    /// handle to the node is dropped.
    fn teardown(&mut self) {}
}

/// Render one log line: `"<location>: <level>: <message>."` plus terminator.
pub fn format_line(level: Level, location: Option<&str>, message: &str, crlf: bool) -> String {
    let mut line = String::with_capacity(message.len() + 32);
    if let Some(loc) = non_empty(location) {
        line.push_str(loc);
        line.push_str(": ");
    }
    line.push_str(level.as_str());
    line.push_str(": ");
    line.push_str(message);
    line.push_str(if crlf { ".\r\n" } else { ".\n" });
    line
}

pub(crate) fn non_empty(location: Option<&str>) -> Option<&str> {
    location.filter(|l| !l.is_empty())
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
struct Gates {
    max_errors: u32,
    errors: u32,
    warnings: u32,
    log_info: bool,
    log_debug: bool,
    log_master: bool,
}

struct Node {
    sink: Mutex<Box<dyn Sink>>,
    gates: Mutex<Gates>,
    parent: Option<ErrorHandler>,
}

impl Drop for Node {
    fn drop(&mut self) {
        let sink = self.sink.get_mut().unwrap_or_else(PoisonError::into_inner);
        sink.teardown();
        let failures = sink.take_failures();
        if !failures.is_empty() {
            let master = master::current();
            for failure in failures {
                master.report(Level::Error, None, &failure);
            }
        }
        // `parent` is released after this, once teardown has run.
    }
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// ErrorHandler
// ---------------------------------------------------------------------------

/// Strong handle to a diagnostic node. Cloning takes a reference, dropping
/// releases one.
#[derive(Clone)]
pub struct ErrorHandler(Arc<Node>);

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gates = *lock(&self.0.gates);
        f.debug_struct("ErrorHandler")
            .field("errors", &gates.errors)
            .field("max_errors", &gates.max_errors)
            .field("has_parent", &self.0.parent.is_some())
            .finish()
    }
}

impl ErrorHandler {
    /// Create a root node around `sink`. `max_errors == 0` means unlimited.
    pub fn new(sink: impl Sink + 'static, max_errors: u32) -> Self {
        Self(Arc::new(Node {
            sink: Mutex::new(Box::new(sink)),
            gates: Mutex::new(Gates {
                max_errors,
                ..Gates::default()
            }),
            parent: None,
        }))
    }

    /// Create a node that holds a reference to `parent` and starts with a
    /// copy of its gate configuration and error limit.
    pub fn with_parent(parent: &ErrorHandler, sink: impl Sink + 'static) -> Self {
        let inherited = *lock(&parent.0.gates);
        Self(Arc::new(Node {
            sink: Mutex::new(Box::new(sink)),
            gates: Mutex::new(Gates {
                errors: 0,
                warnings: 0,
                ..inherited
            }),
            parent: Some(parent.clone()),
        }))
    }

    /// Root node writing to standard error.
    pub fn stderr(max_errors: u32) -> Self {
        Self::new(StderrSink, max_errors)
    }

    /// Root node appending formatted lines to `buffer`.
    pub fn buffer(buffer: &SharedBuffer, crlf: bool, max_errors: u32) -> Self {
        Self::new(BufferSink::new(buffer.clone(), crlf), max_errors)
    }

    /// Root node writing to a log file that is opened on first use.
    pub fn log_file(path: impl Into<std::path::PathBuf>, max_errors: u32) -> Self {
        Self::new(FileSink::new(path), max_errors)
    }

    /// Decorator re-emitting every message into `parent` with `prefix` and a
    /// fixed `location`.
    pub fn prefixed(parent: &ErrorHandler, location: Option<&str>, prefix: Option<&str>) -> Self {
        Self::with_parent(parent, PrefixSink::new(location, prefix))
    }

    /// Decorator formatting every message through `template`. Without a
    /// template there is nothing to decorate and `parent` itself is returned.
    pub fn templated(
        parent: &ErrorHandler,
        template: Option<&str>,
        table: &[Substitution],
    ) -> Self {
        match template {
            Some(template) => Self::with_parent(parent, TemplateSink::new(template, table)),
            None => parent.clone(),
        }
    }

    /// Location string for a line of a script: `"<script>: line N"`, or just
    /// `"line N"` without a script name.
    pub fn script_location(script: Option<&str>, line: u32) -> String {
        match non_empty(script) {
            Some(script) => format!("{script}: line {line}"),
            None => format!("line {line}"),
        }
    }

    // ---------------------------------------------------------------------------
    // Reporting
    // ---------------------------------------------------------------------------

    pub fn report(&self, level: Level, location: Option<&str>, message: &str) {
        if self.0.parent.is_none() && lock(&self.0.gates).log_master {
            let master = master::current();
            if !master.ptr_eq(self) {
                master.report(level, location, message);
            }
        }
        self.direct(level, location, message);
    }

    /// Emit into this node only: counters and gates apply, but nothing is
    /// copied to the master sink.
    pub fn direct(&self, level: Level, location: Option<&str>, message: &str) {
        let emit = {
            let mut gates = lock(&self.0.gates);
            match level {
                Level::Error => {
                    gates.errors += 1;
                    true
                }
                Level::Warning => {
                    gates.warnings += 1;
                    true
                }
                Level::Info => gates.log_info,
                Level::Debug => gates.log_debug,
            }
        };
        if !emit {
            return;
        }

        let failures = {
            let mut sink = lock(&self.0.sink);
            sink.emit(self.0.parent.as_ref(), level, location, message);
            sink.take_failures()
        };
        if !failures.is_empty() {
            let master = master::current();
            for failure in failures {
                master.report(Level::Error, None, &failure);
            }
        }
    }

    pub fn error(&self, location: Option<&str>, message: impl fmt::Display) {
        self.report(Level::Error, location, &message.to_string());
    }

    pub fn warning(&self, location: Option<&str>, message: impl fmt::Display) {
        self.report(Level::Warning, location, &message.to_string());
    }

    pub fn info(&self, location: Option<&str>, message: impl fmt::Display) {
        self.report(Level::Info, location, &message.to_string());
    }

    pub fn debug(&self, location: Option<&str>, message: impl fmt::Display) {
        self.report(Level::Debug, location, &message.to_string());
    }

    /// Report an internal failure. The details go to the master sink only;
    /// this node receives a generic, timestamped "internal error" message.
    pub fn critical(&self, location: Option<&str>, message: impl fmt::Display) {
        let details = match non_empty(location) {
            Some(loc) => format!("{loc}: {message}"),
            None => message.to_string(),
        };
        master::current().report(Level::Error, None, &details);

        let stamp = chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]");
        self.report(Level::Error, location, &format!("{CRITICAL_MSG} {stamp}"));
    }

    // ---------------------------------------------------------------------------
    // Counters
    // ---------------------------------------------------------------------------

    pub fn errors(&self) -> u32 {
        lock(&self.0.gates).errors
    }

    /// Warnings share the error budget: this reports the error counter.
    pub fn warnings(&self) -> u32 {
        lock(&self.0.gates).errors
    }

    pub fn max_errors(&self) -> u32 {
        lock(&self.0.gates).max_errors
    }

    pub fn errors_more_allowed(&self) -> bool {
        let gates = lock(&self.0.gates);
        gates.max_errors == 0 || gates.errors < gates.max_errors
    }

    pub fn reset(&self) {
        let mut gates = lock(&self.0.gates);
        gates.errors = 0;
        gates.warnings = 0;
    }

    // ---------------------------------------------------------------------------
    // Configuration (propagates to every ancestor)
    // ---------------------------------------------------------------------------

    pub fn set_info_enabled(&self, enable: bool) {
        self.walk(|gates| gates.log_info = enable);
    }

    pub fn set_debug_enabled(&self, enable: bool) {
        self.walk(|gates| gates.log_debug = enable);
    }

    pub fn set_master_mirroring(&self, enable: bool) {
        self.walk(|gates| gates.log_master = enable);
    }

    pub fn info_enabled(&self) -> bool {
        lock(&self.0.gates).log_info
    }

    pub fn debug_enabled(&self) -> bool {
        lock(&self.0.gates).log_debug
    }

    pub fn master_mirroring(&self) -> bool {
        lock(&self.0.gates).log_master
    }

    fn walk(&self, mut apply: impl FnMut(&mut Gates)) {
        let mut node = Some(self);
        while let Some(handler) = node {
            apply(&mut lock(&handler.0.gates));
            node = handler.0.parent.as_ref();
        }
    }

    // ---------------------------------------------------------------------------
    // Handle identity
    // ---------------------------------------------------------------------------

    pub fn parent(&self) -> Option<&ErrorHandler> {
        self.0.parent.as_ref()
    }

    /// Number of live handles to this node, including those held by children.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn ptr_eq(&self, other: &ErrorHandler) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serializes tests that install or read the process-wide master sink.
    pub(crate) static MASTER_LOCK: Mutex<()> = Mutex::new(());

    struct CountingSink {
        teardowns: Arc<AtomicUsize>,
    }

    impl Sink for CountingSink {
        fn emit(&mut self, _: Option<&ErrorHandler>, _: Level, _: Option<&str>, _: &str) {}

        fn teardown(&mut self) {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn error_budget_and_reset() {
        let buf = SharedBuffer::default();
        let handler = ErrorHandler::buffer(&buf, false, 3);
        for i in 0..3 {
            assert!(handler.errors_more_allowed());
            handler.error(None, format!("error {i}"));
        }
        assert!(!handler.errors_more_allowed());
        assert_eq!(handler.errors(), 3);

        handler.reset();
        assert!(handler.errors_more_allowed());
        assert_eq!(handler.errors(), 0);
    }

    #[test]
    fn unlimited_budget_never_exhausts() {
        let handler = ErrorHandler::buffer(&SharedBuffer::default(), false, 0);
        for _ in 0..100 {
            handler.error(None, "boom");
        }
        assert!(handler.errors_more_allowed());
    }

    #[test]
    fn warnings_report_shared_counter() {
        let handler = ErrorHandler::buffer(&SharedBuffer::default(), false, 0);
        handler.warning(None, "w1");
        handler.warning(None, "w2");
        handler.error(None, "e1");
        assert_eq!(handler.errors(), 1);
        assert_eq!(handler.warnings(), 1);
    }

    #[test]
    fn info_and_debug_are_gated() {
        let buf = SharedBuffer::default();
        let handler = ErrorHandler::buffer(&buf, false, 0);
        handler.info(None, "hidden info");
        handler.debug(None, "hidden debug");
        assert!(buf.contents().is_empty());

        handler.set_info_enabled(true);
        handler.info(Some("line 3"), "visible");
        handler.debug(None, "still hidden");
        assert_eq!(buf.contents(), "line 3: info: visible.\n");
    }

    #[test]
    fn child_inherits_gates_at_creation() {
        let root = ErrorHandler::buffer(&SharedBuffer::default(), false, 5);
        root.set_info_enabled(true);
        let child = ErrorHandler::prefixed(&root, None, Some("x"));
        assert!(child.info_enabled());
        assert!(!child.debug_enabled());
        assert_eq!(child.max_errors(), 5);
    }

    #[test]
    fn configuration_propagates_to_ancestors() {
        let root = ErrorHandler::buffer(&SharedBuffer::default(), false, 0);
        let middle = ErrorHandler::prefixed(&root, None, Some("a"));
        let leaf = ErrorHandler::prefixed(&middle, None, Some("b"));

        leaf.set_debug_enabled(true);
        assert!(leaf.debug_enabled());
        assert!(middle.debug_enabled());
        assert!(root.debug_enabled());

        // Turning it off on the root does not reach the children.
        root.set_debug_enabled(false);
        assert!(leaf.debug_enabled());
        assert!(!root.debug_enabled());
    }

    #[test]
    fn dropping_decorator_releases_one_parent_reference() {
        let root = ErrorHandler::buffer(&SharedBuffer::default(), false, 0);
        assert_eq!(root.ref_count(), 1);
        let child = ErrorHandler::prefixed(&root, Some("loc"), Some("pfx"));
        assert_eq!(root.ref_count(), 2);
        drop(child);
        assert_eq!(root.ref_count(), 1);
    }

    #[test]
    fn teardown_runs_once_on_last_release() {
        let teardowns = Arc::new(AtomicUsize::new(0));
        let handler = ErrorHandler::new(
            CountingSink {
                teardowns: teardowns.clone(),
            },
            0,
        );
        let second = handler.clone();
        drop(handler);
        assert_eq!(teardowns.load(Ordering::SeqCst), 0);
        drop(second);
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn teardown_happens_before_parent_release() {
        let teardowns = Arc::new(AtomicUsize::new(0));
        let root = ErrorHandler::new(
            CountingSink {
                teardowns: teardowns.clone(),
            },
            0,
        );
        let child = ErrorHandler::prefixed(&root, None, None);
        drop(root);
        assert_eq!(teardowns.load(Ordering::SeqCst), 0);
        drop(child);
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn critical_hides_details_from_caller_sink() {
        let _guard = MASTER_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let master_buf = SharedBuffer::default();
        master::install(ErrorHandler::buffer(&master_buf, false, 0));

        let buf = SharedBuffer::default();
        let handler = ErrorHandler::buffer(&buf, false, 0);
        handler.critical(Some("msgid=<a@b>"), "mailbox index corrupted");

        master::reset();

        let visible = buf.contents();
        assert!(visible.starts_with("msgid=<a@b>: error: internal error occurred"));
        assert!(!visible.contains("corrupted"));
        assert!(master_buf
            .contents()
            .contains("error: msgid=<a@b>: mailbox index corrupted."));
        assert_eq!(handler.errors(), 1);
    }

    #[test]
    fn root_mirrors_to_master_when_enabled() {
        let _guard = MASTER_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let master_buf = SharedBuffer::default();
        master::install(ErrorHandler::buffer(&master_buf, false, 0));

        let buf = SharedBuffer::default();
        let root = ErrorHandler::buffer(&buf, false, 0);
        root.warning(None, "not mirrored");
        let child = ErrorHandler::prefixed(&root, None, Some("child"));
        child.set_master_mirroring(true);
        child.warning(None, "mirrored");

        master::reset();

        assert!(master_buf.contents().contains("warning: child: mirrored.\n"));
        assert!(!master_buf.contents().contains("not mirrored"));
        assert!(buf.contents().contains("warning: not mirrored."));
        assert!(buf.contents().contains("warning: child: mirrored."));
    }
}
