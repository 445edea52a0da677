//! Log-capture stream sinks (§4.4 "Log capture streams"). The driver's
//! public interface accepts a `&dyn StreamSink` wherever a child's
//! stdout/stderr needs wiring; each implementation hands back a fresh,
//! `O_CLOEXEC`-clear duplicate of its underlying write-side fd so the same
//! sink can back more than one spawned child.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::io::{FromRawFd, IntoRawFd, RawFd};

use common::{EngineError, Result};
use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
use nix::sys::socket::{self, AddressFamily, SockFlag, SockType, UnixAddr};
use nix::unistd::dup;

/// Cap on the memfd-backed log buffer (§4.4): the reader's view is resized
/// to the actual byte count written, never beyond this.
pub const MEMFD_CAP: u64 = 1024 * 1024;

/// A sink the runtime driver dup's a spawned child's stdout/stderr onto.
pub trait StreamSink: Send + Sync {
    /// Returns a fresh fd suitable for `dup2`'ing over a child's stdio
    /// slot. `close_exec` mirrors the original's `dupWriteFD(newFd,
    /// closeExec)` signature: true keeps the returned fd `O_CLOEXEC` (safe
    /// to hold across an unrelated `exec`), false clears it (the flag this
    /// driver needs before handing the fd to a child's `pre_exec`, which
    /// itself repeats the `dup2`-then-clear-`CLOEXEC` dance per §4.4).
    fn dup_write_fd(&self, close_exec: bool) -> Result<RawFd>;
}

fn set_cloexec(fd: RawFd, close_exec: bool) -> Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    let mut flags = FdFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFD).map_err(EngineError::from)?);
    flags.set(FdFlag::FD_CLOEXEC, close_exec);
    fcntl(fd, FcntlArg::F_SETFD(flags)).map_err(EngineError::from)?;
    Ok(())
}

/// Discards everything written to it.
pub struct DevNullStream;

impl StreamSink for DevNullStream {
    fn dup_write_fd(&self, close_exec: bool) -> Result<RawFd> {
        let file = File::options()
            .write(true)
            .open("/dev/null")
            .map_err(EngineError::from)?;
        let fd = file.into_raw_fd();
        set_cloexec(fd, close_exec)?;
        Ok(fd)
    }
}

/// An in-memory anonymous file (`memfd_create`), capped at `MEMFD_CAP`
/// bytes. Outlives every child it backed until dropped.
pub struct MemfdStream {
    fd: RawFd,
}

impl MemfdStream {
    pub fn new(name: &str) -> Result<Self> {
        let cname = std::ffi::CString::new(name).map_err(|_| {
            EngineError::config_invalid("stream name", "must not contain an interior NUL")
        })?;
        let fd = memfd_create(&cname, MemFdCreateFlag::empty()).map_err(EngineError::from)?;
        Ok(Self { fd })
    }

    /// Reads back everything written so far, bounded by `MEMFD_CAP` and
    /// resized to the actual byte count rather than the cap.
    pub fn read_to_end(&self) -> Result<Vec<u8>> {
        let reader_fd = dup(self.fd).map_err(EngineError::from)?;
        let mut file = unsafe { File::from_raw_fd(reader_fd) };
        file.seek(SeekFrom::Start(0)).map_err(EngineError::from)?;
        let mut buf = Vec::new();
        file.take(MEMFD_CAP).read_to_end(&mut buf).map_err(EngineError::from)?;
        Ok(buf)
    }
}

impl StreamSink for MemfdStream {
    fn dup_write_fd(&self, close_exec: bool) -> Result<RawFd> {
        let fd = dup(self.fd).map_err(EngineError::from)?;
        set_cloexec(fd, close_exec)?;
        Ok(fd)
    }
}

impl Drop for MemfdStream {
    fn drop(&mut self) {
        let _ = nix::unistd::close(self.fd);
    }
}

/// Relays to an abstract (Linux-namespace, no filesystem entry) Unix domain
/// socket for live log consumption by an external sink outside this core.
pub struct SocketStream {
    fd: RawFd,
}

impl SocketStream {
    pub fn connect(abstract_name: &str) -> Result<Self> {
        let fd = socket::socket(AddressFamily::Unix, SockType::Stream, SockFlag::empty(), None)
            .map_err(EngineError::from)?;
        let addr = UnixAddr::new_abstract(abstract_name.as_bytes()).map_err(EngineError::from)?;
        socket::connect(fd, &addr).map_err(EngineError::from)?;
        Ok(Self { fd })
    }
}

impl StreamSink for SocketStream {
    fn dup_write_fd(&self, close_exec: bool) -> Result<RawFd> {
        let fd = dup(self.fd).map_err(EngineError::from)?;
        set_cloexec(fd, close_exec)?;
        Ok(fd)
    }
}

impl Drop for SocketStream {
    fn drop(&mut self) {
        let _ = nix::unistd::close(self.fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn devnull_yields_writable_fd() {
        let sink = DevNullStream;
        let fd = sink.dup_write_fd(false).unwrap();
        assert!(fd >= 0);
        let _ = nix::unistd::close(fd);
    }

    #[test]
    fn memfd_round_trips_written_bytes() {
        let stream = MemfdStream::new("dobby-test").unwrap();
        let fd = stream.dup_write_fd(false).unwrap();
        {
            use std::io::Write;
            let mut file = unsafe { File::from_raw_fd(fd) };
            file.write_all(b"hello").unwrap();
        }
        let read = stream.read_to_end().unwrap();
        assert_eq!(read, b"hello");
    }
}
