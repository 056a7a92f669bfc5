//! Signals and liveness probes for OS processes (Unix)

use std::io;

/// Signals the daemon supervisor sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Graceful shutdown (`SIGTERM`).
    Terminate,
    /// Forced shutdown (`SIGKILL`).
    Kill,
}

impl Signal {
    const fn raw(self) -> libc::c_int {
        match self {
            Self::Terminate => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
        }
    }
}

fn raw_pid(pid: u32) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok().filter(|raw| *raw > 0)
}

/// Collect the exit status of `pid` if it is an exited child of this
/// process. Without this an exited child stays a zombie and still
/// answers the zero-signal probe.
fn reap(pid: libc::pid_t) {
    let mut status: libc::c_int = 0;
    // SAFETY: `status` is a valid out-pointer; WNOHANG never blocks and a
    // pid that is not our child just yields ECHILD.
    unsafe {
        libc::waitpid(pid, &raw mut status, libc::WNOHANG);
    }
}

/// Whether a process with this PID exists.
///
/// Sends signal 0, which checks existence and permissions without
/// affecting the target. `EPERM` means the process exists but belongs to
/// someone else.
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    let Some(raw) = raw_pid(pid) else {
        return false;
    };
    reap(raw);

    // SAFETY: signal 0 performs error checking only.
    let rc = unsafe { libc::kill(raw, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Send `signal` to `pid`.
pub fn send_signal(pid: u32, signal: Signal) -> io::Result<()> {
    let raw = raw_pid(pid)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid PID {pid}")))?;

    // SAFETY: plain kill(2) on a positive PID.
    let rc = unsafe { libc::kill(raw, signal.raw()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Whether `err` says the target process no longer exists.
#[must_use]
pub fn is_no_such_process(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ESRCH)
}
