use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// Raw serial tty transport.
///
/// The device is opened non-blocking and without becoming the controlling
/// terminal, switched to raw 9600 baud with software and hardware flow
/// control disabled, and restored to its previous attributes on drop.
pub struct SerialPort {
    file: File,
    path: PathBuf,
    name: String,
    original: libc::termios,
    wakeup_wanted: AtomicBool,
}

impl SerialPort {
    /// Device directory prepended to bare tty names (`ttyACM0`).
    pub const DEVICE_PREFIX: &'static str = "/dev/";

    /// Open and configure a tty, e.g. `/dev/ttyACM0` or just `ttyACM0`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = device_path(path.as_ref());

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_NOCTTY)
            .open(&path)
            .map_err(|source| TransportError::Open {
                path: path.clone(),
                source,
            })?;
        let fd = file.as_raw_fd();

        // SAFETY: termios is a plain C struct; all-zero is a valid bit pattern
        // and tcgetattr overwrites it before use.
        let mut tios: libc::termios = unsafe { std::mem::zeroed() };
        // SAFETY: `fd` is an open descriptor owned by `file`; `tios` is writable.
        if unsafe { libc::tcgetattr(fd, &mut tios) } < 0 {
            return Err(TransportError::Configure {
                path,
                source: std::io::Error::last_os_error(),
            });
        }
        let original = tios;

        // SAFETY: `tios` was initialized by tcgetattr above.
        unsafe {
            libc::cfmakeraw(&mut tios);
            libc::cfsetispeed(&mut tios, libc::B9600);
            libc::cfsetospeed(&mut tios, libc::B9600);
        }
        tios.c_iflag &= !libc::IXOFF;
        tios.c_cflag &= !libc::CRTSCTS;

        // SAFETY: `fd` is open and `tios` is a fully initialized termios.
        if unsafe { libc::tcsetattr(fd, libc::TCSADRAIN, &tios) } < 0 {
            // Some USB CDC adapters refuse speed changes; the line still works.
            warn!(
                ?path,
                error = %std::io::Error::last_os_error(),
                "cannot apply tty attributes"
            );
        }

        let name = path.display().to_string();
        info!(?path, "opened serial transport");

        Ok(Self {
            file,
            path,
            name,
            original,
            wakeup_wanted: AtomicBool::new(false),
        })
    }

    /// Read whatever bytes are pending without blocking.
    ///
    /// Returns `Ok(0)` when nothing is available and `Err(Closed)` on hangup.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match (&self.file).read(buf) {
                Ok(0) if !buf.is_empty() => return Err(TransportError::Closed),
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    /// Whether the link asked to be woken once more bytes can be written.
    pub fn wakeup_wanted(&self) -> bool {
        self.wakeup_wanted.load(Ordering::Acquire)
    }

    /// The device path in use.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Transport for SerialPort {
    fn write(&self, buf: &[u8]) -> Result<usize> {
        loop {
            match (&self.file).write(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                    return Err(TransportError::Closed)
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    fn set_write_wakeup(&self, wanted: bool) {
        self.wakeup_wanted.store(wanted, Ordering::Release);
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SerialPort {
    fn drop(&mut self) {
        // SAFETY: the descriptor is still open and `original` came from tcgetattr.
        let rc = unsafe { libc::tcsetattr(self.file.as_raw_fd(), libc::TCSADRAIN, &self.original) };
        if rc < 0 {
            debug!(path = ?self.path, "could not restore tty attributes");
        } else {
            debug!(path = ?self.path, "restored tty attributes");
        }
    }
}

impl std::fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPort")
            .field("path", &self.path)
            .finish()
    }
}

fn device_path(path: &Path) -> PathBuf {
    if path.starts_with(SerialPort::DEVICE_PREFIX) {
        path.to_path_buf()
    } else {
        Path::new(SerialPort::DEVICE_PREFIX).join(path)
    }
}
