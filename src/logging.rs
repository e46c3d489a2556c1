//! Logging setup.
//!
//! Events go through a `tracing_subscriber::fmt` subscriber. With the syslog
//! target, each formatted event is handed to `syslog(3)` at a priority
//! derived from its level.

use crate::config::{Config, LogTarget};
use std::ffi::{CStr, CString};
use std::io;
use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// syslog ident; `openlog` keeps the pointer, so it must live in a static.
static IDENT: &CStr = c"packet-log-server";

/// Install the global subscriber described by `config`.
pub fn init(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.log_target {
        LogTarget::Stderr => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(io::stderr)
                .init();
        }
        LogTarget::Syslog => {
            // SAFETY: IDENT is a 'static NUL-terminated string.
            unsafe {
                libc::openlog(IDENT.as_ptr(), libc::LOG_PID | libc::LOG_CONS, libc::LOG_USER);
            }
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .without_time()
                .with_writer(SyslogMakeWriter)
                .init();
        }
    }
}

/// Release logging resources held by the syslog target.
pub fn close(config: &Config) {
    if config.log_target == LogTarget::Syslog {
        // SAFETY: closelog is always safe to call.
        unsafe {
            libc::closelog();
        }
    }
}

/// Map a tracing level onto a syslog priority.
fn priority(level: &Level) -> libc::c_int {
    match *level {
        Level::ERROR => libc::LOG_ERR,
        Level::WARN => libc::LOG_WARNING,
        Level::INFO => libc::LOG_INFO,
        Level::DEBUG | Level::TRACE => libc::LOG_DEBUG,
    }
}

/// Produces one `SyslogWriter` per event.
struct SyslogMakeWriter;

impl<'a> MakeWriter<'a> for SyslogMakeWriter {
    type Writer = SyslogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SyslogWriter::new(libc::LOG_INFO)
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        SyslogWriter::new(priority(meta.level()))
    }
}

/// Buffers one formatted event and submits it to syslog on drop.
struct SyslogWriter {
    priority: libc::c_int,
    line: Vec<u8>,
}

impl SyslogWriter {
    fn new(priority: libc::c_int) -> Self {
        Self {
            priority,
            line: Vec::with_capacity(256),
        }
    }

    fn message(&self) -> Option<CString> {
        let mut line: Vec<u8> = self.line.iter().copied().filter(|&b| b != 0).collect();
        while line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.is_empty() {
            return None;
        }
        CString::new(line).ok()
    }
}

impl io::Write for SyslogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.line.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SyslogWriter {
    fn drop(&mut self) {
        if let Some(message) = self.message() {
            // SAFETY: "%s" consumes exactly one NUL-terminated string argument.
            unsafe {
                libc::syslog(self.priority, c"%s".as_ptr(), message.as_ptr());
            }
        }
    }
}
