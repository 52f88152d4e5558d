use crate::error::{Result, SubprocError};
use nix::fcntl::OFlag;
use nix::unistd::{close, pipe2, write};
use std::fs::File;
use std::os::unix::io::{FromRawFd, IntoRawFd, RawFd};

/// Sentinel for a pipe end that is closed or was never opened.
const CLOSED: RawFd = -1;

/// An anonymous unidirectional byte channel with RAII cleanup.
///
/// Both ends are created with close-on-exec set atomically, so a
/// concurrently spawned process can never inherit them before the flag
/// is applied. Ends are tracked with a sentinel after being closed or
/// handed off, which makes every close path idempotent.
#[derive(Debug)]
pub struct PipePair {
    read: RawFd,
    write: RawFd,
}

impl PipePair {
    /// Create a new pipe pair, optionally with both ends non-blocking.
    pub fn new(non_blocking: bool) -> Result<Self> {
        let mut flags = OFlag::O_CLOEXEC;
        if non_blocking {
            flags |= OFlag::O_NONBLOCK;
        }
        let (read, write) = pipe2(flags)
            .map_err(|e| SubprocError::PipeError(format!("pipe2 failed: {}", e)))?;
        Ok(Self {
            read: read.into_raw_fd(),
            write: write.into_raw_fd(),
        })
    }

    /// Create a pipe pre-loaded with a fixed payload.
    ///
    /// The full buffer is written to the write end, which is then closed
    /// so the reader sees EOF after the payload. A failed or partial write
    /// closes both ends before the error is returned; a half-open pipe is
    /// never left behind. The payload must fit the kernel pipe buffer,
    /// since nothing will drain the read end until the child runs.
    pub fn with_bytes(bytes: &[u8], non_blocking: bool) -> Result<Self> {
        let mut pair = Self::new(non_blocking)?;
        if let Err(e) = reliable_write(pair.write, bytes) {
            let _ = pair.close();
            return Err(e);
        }
        let _ = pair.close_write();
        Ok(pair)
    }

    pub fn read_fd(&self) -> RawFd {
        self.read
    }

    pub fn write_fd(&self) -> RawFd {
        self.write
    }

    /// Close the read end. Idempotent.
    pub fn close_read(&mut self) -> Result<()> {
        close_end(&mut self.read)
    }

    /// Close the write end. Idempotent.
    pub fn close_write(&mut self) -> Result<()> {
        close_end(&mut self.write)
    }

    /// Close both ends. Both closes are attempted even if the first
    /// fails; the first error wins.
    pub fn close(&mut self) -> Result<()> {
        let read = self.close_read();
        let write = self.close_write();
        read.and(write)
    }

    /// Convert into a buffered stream on the write end, for feeding a
    /// child's stdin. The read end is closed best-effort.
    pub fn into_writer(mut self) -> Result<File> {
        let _ = self.close_read();
        let fd = self.take_write()?;
        Ok(unsafe { File::from_raw_fd(fd) })
    }

    /// Convert into a buffered stream on the read end, for consuming a
    /// child's stdout or stderr. The write end is closed best-effort.
    pub fn into_reader(mut self) -> Result<File> {
        let _ = self.close_write();
        let fd = self.take_read()?;
        Ok(unsafe { File::from_raw_fd(fd) })
    }

    fn take_read(&mut self) -> Result<RawFd> {
        take_end(&mut self.read)
    }

    fn take_write(&mut self) -> Result<RawFd> {
        take_end(&mut self.write)
    }
}

impl Drop for PipePair {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn close_end(fd: &mut RawFd) -> Result<()> {
    if *fd == CLOSED {
        return Ok(());
    }
    let result = close(*fd);
    *fd = CLOSED;
    result.map_err(SubprocError::SystemError)
}

fn take_end(fd: &mut RawFd) -> Result<RawFd> {
    if *fd == CLOSED {
        return Err(SubprocError::PipeError(
            "pipe end already closed".to_string(),
        ));
    }
    let taken = *fd;
    *fd = CLOSED;
    Ok(taken)
}

/// Write all of `data` to `fd`, retrying on partial writes and EINTR.
pub fn reliable_write(fd: RawFd, data: &[u8]) -> Result<()> {
    let mut written = 0;
    while written < data.len() {
        match write(fd, &data[written..]) {
            Ok(0) => {
                return Err(SubprocError::PipeError(
                    "write returned 0 bytes".to_string(),
                ));
            }
            Ok(n) => written += n,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => {
                return Err(SubprocError::PipeError(format!(
                    "write failed after {} bytes: {}",
                    written, e
                )));
            }
        }
    }
    Ok(())
}
