use super::{format_line, ErrorHandler, Level, Sink};
use std::sync::{Arc, Mutex, PoisonError};

/// Caller-owned text buffer collecting formatted diagnostics, e.g. to hand
/// compile or runtime errors back to a remote client.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<String>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Return the collected text and leave the buffer empty.
    pub fn take(&self) -> String {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn push_str(&self, s: &str) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(s);
    }
}

#[derive(Debug)]
pub struct BufferSink {
    buffer: SharedBuffer,
    crlf: bool,
}

impl BufferSink {
    pub fn new(buffer: SharedBuffer, crlf: bool) -> Self {
        Self { buffer, crlf }
    }
}

impl Sink for BufferSink {
    fn emit(
        &mut self,
        _parent: Option<&ErrorHandler>,
        level: Level,
        location: Option<&str>,
        message: &str,
    ) {
        self.buffer
            .push_str(&format_line(level, location, message, self.crlf));
    }
}
