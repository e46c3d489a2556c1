//! Background (daemon) mode.
//!
//! Classic double fork: the caller's process and the intermediate session
//! leader both exit with status 0, leaving a grandchild that cannot reacquire
//! a controlling terminal. Call this once, after the listener is bound and
//! before any threads are started.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use tracing::{debug, warn};

/// Detach from the controlling terminal and continue in the background.
///
/// Returns only in the final daemon process. A failed fork or `setsid` is
/// returned as an error in whichever process observed it.
pub fn daemonize() -> io::Result<()> {
    fork_and_exit_parent()?;

    // SAFETY: setsid has no memory-safety preconditions.
    if unsafe { libc::setsid() } < 0 {
        return Err(io::Error::last_os_error());
    }

    fork_and_exit_parent()?;

    // SAFETY: umask cannot fail.
    unsafe {
        libc::umask(0);
    }
    std::env::set_current_dir("/")?;
    redirect_stdio_to_null()?;

    debug!(pid = std::process::id(), "Daemonized");
    Ok(())
}

fn fork_and_exit_parent() -> io::Result<()> {
    // SAFETY: the process is single-threaded at this point, so the child
    // inherits a consistent address space.
    match unsafe { libc::fork() } {
        -1 => Err(io::Error::last_os_error()),
        0 => Ok(()),
        _ => std::process::exit(0),
    }
}

fn redirect_stdio_to_null() -> io::Result<()> {
    let null = OpenOptions::new().read(true).write(true).open("/dev/null")?;
    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: both descriptors are valid; dup2 atomically replaces target.
        if unsafe { libc::dup2(null.as_raw_fd(), target) } < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Write the current pid, newline terminated, to `path`.
pub fn write_pid_file(path: &Path) -> io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "{}", std::process::id())?;
    file.flush()
}

/// Best-effort pid file removal.
pub fn remove_pid_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove pid file"),
    }
}
