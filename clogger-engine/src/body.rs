//! Streaming body wrapper.
//!
//! [`LoggedBody`] proxies a response body, counts the bytes that pass
//! through it and writes the access log line exactly once: on the first
//! `close`, or on drop if the host never closes it.

use crate::clogger::Inner;
use crate::render::{LogState, RequestContext, ResponseContext};
use crate::timing::RequestStart;
use bytes::Bytes;
use clogger_core::{Body, ClogError, Env, Headers, Status};
use std::fs;
use std::io;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::error;

/// Render state used by a wrapped body: the logger's own (non-reentrant) or
/// a private copy (reentrant).
pub(crate) enum StateHandle {
    Shared(Arc<Mutex<LogState>>),
    Owned(Box<LogState>),
}

impl StateHandle {
    pub(crate) fn with<R>(&mut self, f: impl FnOnce(&mut LogState) -> R) -> io::Result<R> {
        match self {
            StateHandle::Shared(shared) => {
                let mut state = shared
                    .lock()
                    .map_err(|_| io::Error::other("log state lock poisoned"))?;
                Ok(f(&mut state))
            }
            StateHandle::Owned(state) => Ok(f(state)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Streaming,
    Closed,
}

/// A response body that logs when it is done.
pub struct LoggedBody {
    inner: Box<dyn Body>,
    phase: Phase,
    state: StateHandle,
    logger: Arc<Inner>,
    env: Env,
    start: RequestStart,
    status: Status,
    headers: Headers,
}

impl LoggedBody {
    pub(crate) fn new(
        inner: Box<dyn Body>,
        state: StateHandle,
        logger: Arc<Inner>,
        env: Env,
        start: RequestStart,
        status: Status,
        headers: Headers,
    ) -> Self {
        Self {
            inner,
            phase: Phase::Idle,
            state,
            logger,
            env,
            start,
            status,
            headers,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Bytes counted so far.
    pub fn bytes_sent(&mut self) -> u64 {
        self.state.with(|s| s.body_bytes_sent()).unwrap_or(0)
    }

    /// Close the inner body and write the log line.
    ///
    /// The line is written even when the inner close fails; that failure is
    /// returned afterwards as [`ClogError::Body`]. Later calls are no-ops.
    pub fn finish(&mut self) -> clogger_core::Result<()> {
        if self.phase == Phase::Closed {
            return Ok(());
        }
        self.phase = Phase::Closed;
        let closed = self.inner.close();
        let logged = self.log();
        closed.map_err(ClogError::Body)?;
        logged.map_err(ClogError::Io)
    }

    fn log(&mut self) -> io::Result<()> {
        let logger = Arc::clone(&self.logger);
        let req = RequestContext {
            env: &self.env,
            start: self.start,
            clock: logger.clock,
            evaluator: logger.evaluator.as_deref(),
        };
        let resp = ResponseContext {
            status: &self.status,
            headers: &self.headers,
        };
        let program = &logger.program;
        match &mut self.state {
            StateHandle::Owned(state) => {
                state.reset_cookies();
                let line = state.render(program, &req, &resp);
                logger.sink.write(&self.env, line)
            }
            // copy the line out so the shared lock is released before the write
            StateHandle::Shared(shared) => {
                let line = {
                    let mut state = shared
                        .lock()
                        .map_err(|_| io::Error::other("log state lock poisoned"))?;
                    state.reset_cookies();
                    state.render(program, &req, &resp).to_vec()
                };
                logger.sink.write(&self.env, &line)
            }
        }
    }
}

impl Body for LoggedBody {
    fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        match self.phase {
            Phase::Closed => return None,
            Phase::Idle => {
                if let Err(e) = self.state.with(LogState::reset_body_bytes) {
                    return Some(Err(e));
                }
                self.phase = Phase::Streaming;
            }
            Phase::Streaming => {}
        }
        let chunk = self.inner.next_chunk()?;
        if let Ok(bytes) = &chunk {
            let n = bytes.len() as u64;
            if let Err(e) = self.state.with(|s| s.add_body_bytes(n)) {
                return Some(Err(e));
            }
        }
        Some(chunk)
    }

    fn close(&mut self) -> io::Result<()> {
        self.finish().map_err(|e| match e {
            ClogError::Body(e) | ClogError::Io(e) => e,
            other => io::Error::other(other),
        })
    }

    /// Delegates; when the inner body is a file the byte count becomes its
    /// size, since the host will send it without iterating.
    fn to_path(&mut self) -> Option<PathBuf> {
        let path = self.inner.to_path()?;
        let size = file_size(self.inner.as_raw_fd(), &path);
        if let Err(e) = self.state.with(|s| s.set_body_bytes(size)) {
            error!(error = %e, "failed to record body size");
        }
        Some(path)
    }

    fn as_raw_fd(&self) -> Option<RawFd> {
        self.inner.as_raw_fd()
    }
}

impl Drop for LoggedBody {
    fn drop(&mut self) {
        if self.phase != Phase::Closed {
            if let Err(e) = self.finish() {
                error!(error = %e, "access log finalization on drop failed");
            }
        }
    }
}

/// Size of the file behind a body, preferring the open descriptor over a
/// second path lookup. Any failure counts as zero.
pub fn file_size(fd: Option<RawFd>, path: &Path) -> u64 {
    if let Some(size) = fd.and_then(fstat_size) {
        return size;
    }
    if let Some(fd) = dev_fd(path) {
        return fstat_size(fd).unwrap_or(0);
    }
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// `/dev/fd/N` → `N`
fn dev_fd(path: &Path) -> Option<RawFd> {
    path.to_str()?.strip_prefix("/dev/fd/")?.parse().ok()
}

fn fstat_size(fd: RawFd) -> Option<u64> {
    // SAFETY: zeroed `stat` is a valid out-parameter.
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    // SAFETY: `st` is valid and writable; fstat only inspects `fd`.
    if unsafe { libc::fstat(fd, &mut st) } != 0 {
        return None;
    }
    u64::try_from(st.st_size).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::os::fd::AsRawFd;

    #[test]
    fn file_size_prefers_descriptor() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"12345").unwrap();
        tmp.flush().unwrap();
        let fd = tmp.as_file().as_raw_fd();
        assert_eq!(file_size(Some(fd), Path::new("/nonexistent")), 5);
        assert_eq!(file_size(None, tmp.path()), 5);
        let dev = PathBuf::from(format!("/dev/fd/{fd}"));
        assert_eq!(file_size(None, &dev), 5);
    }

    #[test]
    fn failed_size_queries_yield_zero() {
        assert_eq!(file_size(None, Path::new("/definitely/not/here")), 0);
        assert_eq!(file_size(Some(-1), Path::new("/definitely/not/here")), 0);
        assert_eq!(file_size(None, Path::new("/dev/fd/99999")), 0);
    }

    struct FailingClose;

    impl Body for FailingClose {
        fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
            Some(Ok(Bytes::from_static(b"abc")))
        }

        fn close(&mut self) -> io::Result<()> {
            Err(io::Error::other("boom"))
        }
    }

    fn wrapped(inner: impl Body + 'static, log: Arc<clogger_core::MemoryWriter>) -> LoggedBody {
        let program = crate::format::compile("%B", &Default::default()).unwrap();
        let clock = crate::timing::Clock::detect().unwrap();
        let state = StateHandle::Owned(Box::new(LogState::new(&program)));
        let logger = Arc::new(Inner {
            program,
            sink: crate::sink::Sink::Writer(log),
            evaluator: None,
            clock,
            pool: crate::render::StatePool::new(),
        });
        LoggedBody::new(
            Box::new(inner),
            state,
            logger,
            Env::new(),
            RequestStart::now(&clock),
            Status::Code(200),
            Headers::new(),
        )
    }

    #[test]
    fn finish_logs_before_reporting_close_failure() {
        let log = Arc::new(clogger_core::MemoryWriter::new());
        let mut body = wrapped(FailingClose, log.clone());
        assert_eq!(body.phase(), Phase::Idle);
        body.next_chunk().unwrap().unwrap();
        assert_eq!(body.phase(), Phase::Streaming);
        assert_eq!(body.bytes_sent(), 3);

        let err = body.finish().unwrap_err();
        assert!(matches!(err, ClogError::Body(_)));
        assert_eq!(log.lines(), vec!["3"]);
        assert_eq!(body.phase(), Phase::Closed);

        assert!(body.finish().is_ok());
        assert!(body.next_chunk().is_none());
        drop(body);
        assert_eq!(log.lines().len(), 1);
    }

    #[test]
    fn streaming_restarts_the_counter() {
        let log = Arc::new(clogger_core::MemoryWriter::new());
        let mut body = wrapped(VecDeque::from([Bytes::from_static(b"xy")]), log.clone());
        body.state.with(|s| s.set_body_bytes(99)).unwrap();
        body.next_chunk().unwrap().unwrap();
        assert_eq!(body.bytes_sent(), 2);
    }

    #[test]
    fn dev_fd_paths() {
        assert_eq!(dev_fd(Path::new("/dev/fd/7")), Some(7));
        assert_eq!(dev_fd(Path::new("/dev/fd/x")), None);
        assert_eq!(dev_fd(Path::new("/tmp/7")), None);
    }
}
