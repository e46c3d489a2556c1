//! Signal-driven graceful shutdown.
//!
//! `SIGINT` and `SIGTERM` run a handler that may only touch atomics and make
//! async-signal-safe syscalls. It sets the shutdown flag and calls
//! `shutdown(2)` on the tracked descriptors, which wakes a blocked `accept`
//! or `recv`. Descriptors are never closed here: the owning `TcpListener` or
//! `TcpStream` closes them on drop, so a descriptor number is never closed
//! twice or reused under the handler's feet.
//!
//! The active connection is only shut down for reading, so a response that is
//! already being streamed is allowed to finish.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

/// Sentinel for "no descriptor tracked".
const NO_FD: RawFd = -1;

/// Process-wide controller used by the installed signal handlers.
pub static GLOBAL: ShutdownController = ShutdownController::new();

/// Shutdown flag plus the descriptors a shutdown must unblock.
#[derive(Debug)]
pub struct ShutdownController {
    requested: AtomicBool,
    signal: AtomicI32,
    listener_fd: AtomicI32,
    active_fd: AtomicI32,
}

impl ShutdownController {
    pub const fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            signal: AtomicI32::new(0),
            listener_fd: AtomicI32::new(NO_FD),
            active_fd: AtomicI32::new(NO_FD),
        }
    }

    /// Request shutdown and unblock any pending `accept`/`recv`.
    ///
    /// Async-signal-safe and idempotent.
    pub fn trigger(&self) {
        self.requested.store(true, Ordering::SeqCst);
        unblock(&self.active_fd, libc::SHUT_RD);
        unblock(&self.listener_fd, libc::SHUT_RDWR);
    }

    /// Record which signal caused the shutdown, then trigger it.
    fn trigger_by_signal(&self, signo: libc::c_int) {
        let _ = self
            .signal
            .compare_exchange(0, signo, Ordering::SeqCst, Ordering::SeqCst);
        self.trigger();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Signal number that triggered shutdown, if any.
    pub fn signal(&self) -> Option<i32> {
        match self.signal.load(Ordering::SeqCst) {
            0 => None,
            signo => Some(signo),
        }
    }

    /// Track the listening socket.
    pub fn watch_listener(&self, fd: RawFd) {
        self.listener_fd.store(fd, Ordering::SeqCst);
        if self.is_requested() {
            unblock(&self.listener_fd, libc::SHUT_RDWR);
        }
    }

    /// Stop tracking the listening socket before it is closed.
    pub fn release_listener(&self) {
        self.listener_fd.store(NO_FD, Ordering::SeqCst);
    }

    /// Track the connection currently being handled.
    pub fn set_active(&self, fd: RawFd) {
        self.active_fd.store(fd, Ordering::SeqCst);
        // A trigger that landed before the store must still reach this socket.
        if self.is_requested() {
            unblock(&self.active_fd, libc::SHUT_RD);
        }
    }

    /// Stop tracking the active connection before it is closed.
    pub fn clear_active(&self) {
        self.active_fd.store(NO_FD, Ordering::SeqCst);
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Take the descriptor out of `slot` and shut it down once.
fn unblock(slot: &AtomicI32, how: libc::c_int) {
    let fd = slot.swap(NO_FD, Ordering::SeqCst);
    if fd != NO_FD {
        // SAFETY: shutdown(2) is async-signal-safe and does not release the
        // descriptor; a stale or invalid fd only yields an ignored error.
        unsafe {
            libc::shutdown(fd, how);
        }
    }
}

extern "C" fn handle_signal(signo: libc::c_int) {
    GLOBAL.trigger_by_signal(signo);
}

/// Install the shutdown handler for `SIGINT` and `SIGTERM`.
///
/// `SA_RESTART` is left off so blocking calls see `EINTR`.
pub fn install() -> io::Result<()> {
    for signo in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: the action struct is fully initialised before use and the
        // handler only touches atomics and calls shutdown(2).
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handle_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
            action.sa_flags = 0;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(signo, &action, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::{Ipv4Addr, TcpListener, TcpStream};
    use std::os::unix::io::AsRawFd;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_trigger_is_idempotent() {
        let controller = ShutdownController::new();
        assert!(!controller.is_requested());

        controller.trigger();
        controller.trigger();
        assert!(controller.is_requested());
        assert_eq!(controller.signal(), None);
    }

    #[test]
    fn test_first_signal_is_recorded() {
        let controller = ShutdownController::new();
        controller.trigger_by_signal(libc::SIGTERM);
        controller.trigger_by_signal(libc::SIGINT);
        assert_eq!(controller.signal(), Some(libc::SIGTERM));
    }

    #[test]
    fn test_trigger_unblocks_accept() {
        let controller = ShutdownController::new();
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        controller.watch_listener(listener.as_raw_fd());

        thread::scope(|s| {
            let handle = s.spawn(|| listener.accept());
            thread::sleep(Duration::from_millis(100));
            controller.trigger();
            assert!(handle.join().unwrap().is_err());
        });
    }

    #[test]
    fn test_trigger_unblocks_receive() {
        let controller = ShutdownController::new();
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut stream, _) = listener.accept().unwrap();
        controller.set_active(stream.as_raw_fd());

        thread::scope(|s| {
            let handle = s.spawn(move || {
                let mut buf = [0u8; 16];
                stream.read(&mut buf)
            });
            thread::sleep(Duration::from_millis(100));
            controller.trigger();
            assert_eq!(handle.join().unwrap().unwrap(), 0);
        });
    }

    #[test]
    fn test_set_active_after_trigger_shuts_down_immediately() {
        let controller = ShutdownController::new();
        controller.trigger();

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut stream, _) = listener.accept().unwrap();
        controller.set_active(stream.as_raw_fd());

        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_released_descriptors_are_untouched() {
        let controller = ShutdownController::new();
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        controller.watch_listener(listener.as_raw_fd());
        controller.release_listener();
        controller.trigger();

        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        assert!(listener.accept().is_ok());
    }
}
