use std::io::{ErrorKind, Read, Write};
#[cfg(unix)]
use std::os::fd::{AsRawFd, RawFd};

use crate::error::{Result, TransportError};

/// What the router polls to learn whether a link has bytes waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollHandle {
    /// A file descriptor that `poll(2)` understands.
    #[cfg(unix)]
    Fd(RawFd),
    /// The link cannot be polled; it is read on every tick.
    Always,
}

/// A half-duplex byte link to a neighbouring node.
pub trait Link: Send {
    /// Human-readable name (usually the device path).
    fn name(&self) -> &str;

    /// Read available bytes into `buf`.
    ///
    /// Returns `Ok(0)` when nothing arrived within the link's read timeout.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write a complete frame.
    fn write_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Readiness source for the poll step.
    fn poll_handle(&self) -> PollHandle;
}

impl<L: Link + ?Sized> Link for Box<L> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        (**self).write_frame(frame)
    }

    fn poll_handle(&self) -> PollHandle {
        (**self).poll_handle()
    }
}

/// A link over any readable, writable file descriptor.
///
/// Serial ports are `FdLink<File>`; tests use `FdLink<UnixStream>`.
pub struct FdLink<T> {
    name: String,
    inner: T,
}

impl<T> FdLink<T> {
    /// Wrap a stream under the given name.
    pub fn new(name: impl Into<String>, inner: T) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }

    /// Consume the link and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(unix)]
impl<T> Link for FdLink<T>
where
    T: Read + Write + AsRawFd + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.inner.read(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    return Ok(0)
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < frame.len() {
            match self.inner.write(&frame[offset..]) {
                Ok(0) => return Err(TransportError::Io(ErrorKind::WriteZero.into())),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }

        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    fn poll_handle(&self) -> PollHandle {
        PollHandle::Fd(self.inner.as_raw_fd())
    }
}

impl<T> std::fmt::Debug for FdLink<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdLink").field("name", &self.name).finish()
    }
}
