use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Mutex;
use tracing::info;

/// A logger-like destination for rendered lines.
///
/// `append` receives one complete rendered record. Writers backed by a plain
/// descriptor may expose it through `fileno`, which lets the engine write to
/// it directly.
pub trait LogWriter: Send + Sync {
    fn append(&self, line: &[u8]) -> io::Result<()>;

    fn fileno(&self) -> Option<RawFd> {
        None
    }
}

/// Process standard error.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrWriter;

impl LogWriter for StderrWriter {
    fn append(&self, line: &[u8]) -> io::Result<()> {
        let mut err = io::stderr().lock();
        err.write_all(line)?;
        err.flush()
    }

    fn fileno(&self) -> Option<RawFd> {
        Some(libc::STDERR_FILENO)
    }
}

impl LogWriter for File {
    fn append(&self, line: &[u8]) -> io::Result<()> {
        let mut f: &File = self;
        f.write_all(line)
    }

    fn fileno(&self) -> Option<RawFd> {
        Some(self.as_raw_fd())
    }
}

/// In-memory capture of every appended line.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    buf: Mutex<Vec<u8>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        match self.buf.lock() {
            Ok(buf) => buf.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn contents_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents_lossy().lines().map(str::to_owned).collect()
    }
}

impl LogWriter for MemoryWriter {
    fn append(&self, line: &[u8]) -> io::Result<()> {
        let mut buf = self
            .buf
            .lock()
            .map_err(|_| io::Error::other("memory writer lock poisoned"))?;
        buf.extend_from_slice(line);
        Ok(())
    }
}

/// Emits each line as a `tracing` event under the `access_log` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWriter;

impl LogWriter for TracingWriter {
    fn append(&self, line: &[u8]) -> io::Result<()> {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        info!(target: "access_log", "{}", String::from_utf8_lossy(line));
        Ok(())
    }
}
