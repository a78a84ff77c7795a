//! Readiness polling across heterogeneous links.

use std::time::Duration;

use crate::error::Result;
#[cfg(unix)]
use crate::error::TransportError;
use crate::traits::PollHandle;

/// How long a single poll step waits for any link to become readable.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// Poll result for one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Idle,
    Readable,
    /// The device reported hangup or error. Buffered bytes may still be
    /// readable; an empty read after this means the link is gone.
    HungUp,
}

impl Readiness {
    /// Whether the link should be read this tick.
    pub fn is_ready(self) -> bool {
        self != Readiness::Idle
    }
}

/// Wait up to `timeout` for any of `handles` to become readable.
///
/// Returns one entry per handle. [`PollHandle::Always`] entries are always
/// reported readable, and their presence turns the wait into a non-blocking
/// check of the descriptor-backed handles.
#[cfg(unix)]
pub fn wait_readable(handles: &[PollHandle], timeout: Duration) -> Result<Vec<Readiness>> {
    let mut ready: Vec<Readiness> = handles
        .iter()
        .map(|h| match h {
            PollHandle::Always => Readiness::Readable,
            PollHandle::Fd(_) => Readiness::Idle,
        })
        .collect();

    let mut fds: Vec<libc::pollfd> = Vec::new();
    let mut slots: Vec<usize> = Vec::new();
    for (slot, handle) in handles.iter().enumerate() {
        if let PollHandle::Fd(fd) = handle {
            fds.push(libc::pollfd {
                fd: *fd,
                events: libc::POLLIN,
                revents: 0,
            });
            slots.push(slot);
        }
    }

    if fds.is_empty() {
        return Ok(ready);
    }

    let timeout_ms = if ready.iter().any(|r| r.is_ready()) {
        0
    } else {
        timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int
    };

    // SAFETY: `fds` is a valid, initialised slice of `pollfd` whose length is
    // passed alongside it; the kernel only writes the `revents` fields.
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::Interrupted {
            return Ok(ready);
        }
        return Err(TransportError::Poll(err));
    }

    let hangup = libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;
    for (pfd, slot) in fds.iter().zip(slots) {
        ready[slot] = if pfd.revents & hangup != 0 {
            Readiness::HungUp
        } else if pfd.revents & libc::POLLIN != 0 {
            Readiness::Readable
        } else {
            Readiness::Idle
        };
    }

    Ok(ready)
}

/// Without `poll(2)` every link is read on every tick.
#[cfg(not(unix))]
pub fn wait_readable(handles: &[PollHandle], timeout: Duration) -> Result<Vec<Readiness>> {
    let _ = timeout;
    Ok(vec![Readiness::Readable; handles.len()])
}
