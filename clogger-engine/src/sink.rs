//! Where rendered lines go.

use clogger_core::{Env, LogWriter, StderrWriter};
use crossbeam_channel::{Sender, bounded};
use std::any::Any;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

/// Write all of `buf` to `fd`.
///
/// Short writes are resumed, `EINTR` retried, `EAGAIN` waits for the
/// descriptor to become writable, and a write that makes no progress without
/// an error is reported as `ENOSPC`.
pub fn write_full(fd: RawFd, buf: &[u8]) -> io::Result<()> {
    write_all_with(buf, |chunk| sys_write(fd, chunk), || wait_writable(fd))
}

fn write_all_with(
    mut buf: &[u8],
    mut write: impl FnMut(&[u8]) -> io::Result<usize>,
    mut wait: impl FnMut() -> io::Result<()>,
) -> io::Result<()> {
    while !buf.is_empty() {
        match write(buf) {
            Ok(0) => return Err(io::Error::from_raw_os_error(libc::ENOSPC)),
            Ok(n) => buf = &buf[n.min(buf.len())..],
            Err(err) => match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EAGAIN) => wait()?,
                _ => return Err(err),
            },
        }
    }
    Ok(())
}

fn sys_write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    // SAFETY: `buf` is a valid readable region of `buf.len()` bytes.
    let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
    usize::try_from(n).map_err(|_| io::Error::last_os_error())
}

fn wait_writable(fd: RawFd) -> io::Result<()> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    loop {
        // SAFETY: one valid pollfd.
        let rc = unsafe { libc::poll(&mut pfd, 1, -1) };
        if rc >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(err);
        }
    }
}

/// `Some(fd)` if `fd` is in blocking mode, `None` if it is non-blocking.
pub fn blocking_fd(fd: RawFd) -> io::Result<Option<RawFd>> {
    // SAFETY: F_GETFL only reads descriptor flags.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((flags & libc::O_NONBLOCK == 0).then_some(fd))
}

/// Open `path` for appending, creating it and its parent directories.
pub fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    info!(path = %path.display(), "access log file opened");
    Ok(file)
}

/// A blocking descriptor plus whatever keeps it open.
#[derive(Clone)]
pub struct FdSink {
    fd: RawFd,
    _keepalive: Arc<dyn Any + Send + Sync>,
}

impl FdSink {
    pub fn from_file(file: File) -> Self {
        Self {
            fd: file.as_raw_fd(),
            _keepalive: Arc::new(file),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

/// The configured destination.
#[derive(Clone)]
pub enum Sink {
    /// Raw blocking descriptor, written with [`write_full`].
    Fd(FdSink),
    /// A logger object.
    Writer(Arc<dyn LogWriter>),
    /// The request's own error stream, or stderr when it has none.
    Ambient,
}

impl Sink {
    /// Use `writer`'s descriptor directly when it has a blocking one.
    pub fn for_writer(writer: Arc<dyn LogWriter>) -> io::Result<Self> {
        match writer.fileno() {
            Some(fd) => Ok(match blocking_fd(fd)? {
                Some(fd) => Sink::Fd(FdSink {
                    fd,
                    _keepalive: Arc::new(writer),
                }),
                None => Sink::Writer(writer),
            }),
            None => Ok(Sink::Writer(writer)),
        }
    }

    pub fn for_path(path: &Path) -> io::Result<Self> {
        Ok(Sink::Fd(FdSink::from_file(open_append(path)?)))
    }

    pub fn fileno(&self) -> Option<RawFd> {
        match self {
            Sink::Fd(sink) => Some(sink.fd()),
            _ => None,
        }
    }

    pub fn write(&self, env: &Env, line: &[u8]) -> io::Result<()> {
        match self {
            Sink::Fd(sink) => write_full(sink.fd, line),
            Sink::Writer(writer) => writer.append(line),
            Sink::Ambient => match env.errors() {
                Some(errors) => errors.append(line),
                None => StderrWriter.append(line),
            },
        }
    }
}

/// A [`LogWriter`] that moves the actual write onto a dedicated thread, so
/// callers on a cooperative scheduler never block on disk.
///
/// The queue is bounded; a full queue applies back-pressure to the caller.
/// Write failures on the worker are reported through `tracing`.
pub struct OffloadWriter {
    tx: Option<Sender<Vec<u8>>>,
    worker: Option<JoinHandle<()>>,
}

impl OffloadWriter {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new(inner: Arc<dyn LogWriter>) -> io::Result<Self> {
        Self::with_capacity(inner, Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(inner: Arc<dyn LogWriter>, capacity: usize) -> io::Result<Self> {
        let (tx, rx) = bounded::<Vec<u8>>(capacity);
        let worker = thread::Builder::new()
            .name("clogger-writer".into())
            .spawn(move || {
                for line in rx {
                    if let Err(e) = inner.append(&line) {
                        error!(error = %e, "offloaded access log write failed");
                    }
                }
            })?;
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }
}

impl LogWriter for OffloadWriter {
    fn append(&self, line: &[u8]) -> io::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "log writer shut down"))?;
        tx.send(line.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "log writer thread exited"))
    }
}

impl Drop for OffloadWriter {
    /// Flush: close the queue and wait for the worker to drain it.
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("offloaded access log writer panicked");
            }
        }
    }
}
