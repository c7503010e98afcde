//! Anonymous byte pipe used to forward launch errors from the forked child
//! to the tracer, and by tests to capture inferior stdout.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use nix::fcntl::OFlag;
use nix::unistd::pipe2;

use crate::errors::{DebuggerError, Result};

const BUF_SIZE: usize = 1024;

/// An anonymous pipe with individually closable ends.
///
/// Both ends are owned; dropping the [`Pipe`] closes whatever is still open.
#[derive(Debug)]
pub struct Pipe {
    read: Option<OwnedFd>,
    write: Option<OwnedFd>,
}

impl Pipe {
    pub fn new(close_on_exec: bool) -> Result<Self> {
        let flags = if close_on_exec {
            OFlag::O_CLOEXEC
        } else {
            OFlag::empty()
        };
        let (read, write) = pipe2(flags).map_err(DebuggerError::kernel_call("pipe failed"))?;
        Ok(Self {
            read: Some(read),
            write: Some(write),
        })
    }

    pub fn read_fd(&self) -> Option<BorrowedFd<'_>> {
        self.read.as_ref().map(AsFd::as_fd)
    }

    pub fn write_fd(&self) -> Option<BorrowedFd<'_>> {
        self.write.as_ref().map(AsFd::as_fd)
    }

    /// Takes ownership of the read end away from the pipe.
    pub fn release_read(&mut self) -> Option<OwnedFd> {
        self.read.take()
    }

    /// Takes ownership of the write end away from the pipe.
    pub fn release_write(&mut self) -> Option<OwnedFd> {
        self.write.take()
    }

    pub fn close_read(&mut self) {
        self.read = None;
    }

    pub fn close_write(&mut self) {
        self.write = None;
    }

    /// Performs one blocking read on the read end.
    ///
    /// Returns an empty buffer when the write end has been closed (EOF).
    pub fn read(&self) -> Result<Vec<u8>> {
        let fd = self
            .read
            .as_ref()
            .ok_or_else(|| DebuggerError::InvalidArgument("pipe read end is closed".into()))?;
        let mut buf = [0u8; BUF_SIZE];
        let n = nix::unistd::read(fd.as_fd(), &mut buf)
            .map_err(DebuggerError::kernel_call("could not read from pipe"))?;
        Ok(buf[..n].to_vec())
    }

    /// Writes the whole buffer to the write end.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let fd = self
            .write
            .as_ref()
            .ok_or_else(|| DebuggerError::InvalidArgument("pipe write end is closed".into()))?;
        let mut written = 0;
        while written < data.len() {
            written += nix::unistd::write(fd.as_fd(), &data[written..])
                .map_err(DebuggerError::kernel_call("could not write to pipe"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pipe_round_trip() {
        let pipe = Pipe::new(false).unwrap();
        pipe.write(b"hello").unwrap();
        assert_eq!(pipe.read().unwrap(), b"hello");
    }

    #[test]
    fn test_pipe_eof_after_write_close() {
        let mut pipe = Pipe::new(false).unwrap();
        pipe.write(b"x").unwrap();
        pipe.close_write();
        assert_eq!(pipe.read().unwrap(), b"x");
        assert!(pipe.read().unwrap().is_empty());
    }
}
