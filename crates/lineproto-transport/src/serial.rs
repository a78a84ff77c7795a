use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::Duration;

use tracing::info;

use crate::error::{Result, TransportError};
use crate::traits::FdLink;

/// Line speed used by lineproto nodes unless configured otherwise.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Device read timeout. Keeps a single read from stalling the tick.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Serial line settings.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Baud rate (8N1, no flow control).
    pub baud_rate: u32,
    /// Read timeout, rounded up to whole deciseconds for `VTIME`.
    pub read_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Raw-mode serial device opener.
pub struct SerialPort;

impl SerialPort {
    /// Open `path` in raw 8N1 mode with the default configuration.
    pub fn open(path: impl AsRef<Path>) -> Result<FdLink<File>> {
        Self::open_with_config(path, &SerialConfig::default())
    }

    /// Open `path` in raw 8N1 mode.
    pub fn open_with_config(path: impl AsRef<Path>, config: &SerialConfig) -> Result<FdLink<File>> {
        let path = path.as_ref();
        let speed = baud_constant(config.baud_rate)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(path)
            .map_err(|e| TransportError::Open {
                path: path.to_path_buf(),
                source: e,
            })?;

        configure_raw(&file, speed, config.read_timeout).map_err(|e| {
            TransportError::Configure {
                path: path.to_path_buf(),
                source: e,
            }
        })?;

        info!(?path, baud = config.baud_rate, "opened serial link");
        Ok(FdLink::new(path.display().to_string(), file))
    }
}

fn configure_raw(file: &File, speed: libc::speed_t, read_timeout: Duration) -> std::io::Result<()> {
    let fd = file.as_raw_fd();

    // SAFETY: `termios` is a plain C struct for which all-zero is a valid bit
    // pattern; it is fully overwritten by `tcgetattr` before use.
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };

    // SAFETY: `fd` is an open descriptor owned by `file`, and `tio` is a
    // valid writable `termios`.
    if unsafe { libc::tcgetattr(fd, &mut tio) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    // SAFETY: `tio` is a valid, initialised `termios`.
    unsafe { libc::cfmakeraw(&mut tio) };
    tio.c_cflag |= libc::CLOCAL | libc::CREAD;
    tio.c_cflag &= !(libc::CSTOPB | libc::PARENB | libc::CRTSCTS);
    tio.c_cc[libc::VMIN] = 0;
    tio.c_cc[libc::VTIME] = deciseconds(read_timeout);

    // SAFETY: `tio` is a valid `termios` and `speed` is a termios baud constant.
    let rc = unsafe {
        libc::cfsetispeed(&mut tio, speed) | libc::cfsetospeed(&mut tio, speed)
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }

    // SAFETY: `fd` is open and `tio` points to a fully initialised `termios`.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    // SAFETY: `fd` is an open terminal descriptor; flushing has no memory effects.
    unsafe { libc::tcflush(fd, libc::TCIOFLUSH) };
    Ok(())
}

fn deciseconds(timeout: Duration) -> libc::cc_t {
    let tenths = timeout.as_millis().div_ceil(100);
    tenths.min(libc::cc_t::MAX as u128) as libc::cc_t
}

fn baud_constant(baud: u32) -> Result<libc::speed_t> {
    let speed = match baud {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        other => return Err(TransportError::UnsupportedBaudRate(other)),
    };
    Ok(speed)
}
