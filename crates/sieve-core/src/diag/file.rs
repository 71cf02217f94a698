use super::{format_line, ErrorHandler, Level, Sink};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Rotate the log once it reaches this many bytes.
pub const LOGFILE_MAX_SIZE: u64 = 10 * 1024;

enum LogTarget {
    File(BufWriter<File>),
    Stderr,
}

/// Appends diagnostics to a log file.
///
/// The file is not touched until the first message arrives, so handlers
/// that never report anything leave no empty logs behind. An oversized log
/// is moved to `<path>.0` and a fresh one started. If the file cannot be
/// opened, output falls back to standard error.
pub struct FileSink {
    path: PathBuf,
    target: Option<LogTarget>,
    started: bool,
    write_failed: bool,
    failures: Vec<String>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            target: None,
            started: false,
            write_failed: false,
            failures: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn start(&mut self) {
        self.started = true;
        let target = match self.open_rotated() {
            Ok(file) => LogTarget::File(BufWriter::new(file)),
            Err(e) => {
                self.failures.push(format!(
                    "failed to open logfile (LOGGING TO STDERR): open({}) failed: {e}",
                    self.path.display()
                ));
                LogTarget::Stderr
            }
        };
        self.target = Some(target);

        let stamp = chrono::Local::now().format("%b %d %H:%M:%S");
        self.write_line(Level::Info, Some("sieve"), &format!("started log at {stamp}"));
    }

    fn open_rotated(&mut self) -> io::Result<File> {
        let file = open_options(false).open(&self.path)?;
        if file.metadata()?.len() < LOGFILE_MAX_SIZE {
            return Ok(file);
        }
        drop(file);

        let rotated = rotated_path(&self.path);
        if let Err(e) = std::fs::rename(&self.path, &rotated) {
            self.failures.push(format!(
                "failed to rotate logfile: rename({}, {}) failed: {e}",
                self.path.display(),
                rotated.display()
            ));
        }
        // Truncates the old log if the rename above failed.
        open_options(true).open(&self.path)
    }

    fn write_line(&mut self, level: Level, location: Option<&str>, message: &str) {
        let line = format_line(level, location, message, false);
        let result = match self.target.as_mut() {
            Some(LogTarget::File(file)) => file.write_all(line.as_bytes()),
            Some(LogTarget::Stderr) => io::stderr().lock().write_all(line.as_bytes()),
            None => Ok(()),
        };
        if let Err(e) = result {
            if !self.write_failed {
                self.write_failed = true;
                self.failures.push(format!(
                    "write failed on logfile {}: {e}",
                    self.path.display()
                ));
            }
        }
    }
}

fn open_options(truncate: bool) -> OpenOptions {
    let mut opts = OpenOptions::new();
    opts.create(true);
    if truncate {
        opts.write(true).truncate(true);
    } else {
        opts.append(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts
}

fn rotated_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".0");
    PathBuf::from(name)
}

impl Sink for FileSink {
    fn emit(
        &mut self,
        _parent: Option<&ErrorHandler>,
        level: Level,
        location: Option<&str>,
        message: &str,
    ) {
        if !self.started {
            self.start();
        }
        self.write_line(level, location, message);
    }

    fn take_failures(&mut self) -> Vec<String> {
        std::mem::take(&mut self.failures)
    }

    fn teardown(&mut self) {
        if let Some(LogTarget::File(mut file)) = self.target.take() {
            if let Err(e) = file.flush() {
                self.failures.push(format!(
                    "failed to close logfile {}: {e}",
                    self.path.display()
                ));
            }
        }
    }
}
