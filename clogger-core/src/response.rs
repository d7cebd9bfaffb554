use crate::env::Env;
use crate::error::AppError;
use crate::headers::Headers;
use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::os::fd::RawFd;
use std::path::PathBuf;

/// Response status as produced by the handler.
///
/// Handlers usually return an integer, but some hand back text such as
/// `"302 Found"`; the logger coerces it when rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Code(i64),
    Text(String),
}

impl Status {
    /// Integer value of the status, using a leading-integer conversion for
    /// text (`"302 Found"` → 302). `None` when text carries no number.
    pub fn coerce(&self) -> Option<i64> {
        match self {
            Status::Code(code) => Some(*code),
            Status::Text(text) => leading_integer(text),
        }
    }
}

impl From<u16> for Status {
    fn from(code: u16) -> Self {
        Status::Code(code.into())
    }
}

impl From<i64> for Status {
    fn from(code: i64) -> Self {
        Status::Code(code)
    }
}

impl From<&str> for Status {
    fn from(text: &str) -> Self {
        Status::Text(text.to_string())
    }
}

impl From<String> for Status {
    fn from(text: String) -> Self {
        Status::Text(text)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Code(code) => write!(f, "{code}"),
            Status::Text(text) => f.write_str(text),
        }
    }
}

fn leading_integer(text: &str) -> Option<i64> {
    let s = text.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    // Saturate rather than fail: anything this large is not a status anyway.
    let value = digits[..end].parse::<i64>().unwrap_or(i64::MAX);
    Some(if negative { -value } else { value })
}

/// A response body: a producer of byte chunks.
///
/// `close` is optional; the default does nothing. Bodies backed by a file may
/// expose its path and descriptor so servers can send it without iterating.
pub trait Body: Send {
    /// Pull the next chunk. `None` once the body is exhausted.
    fn next_chunk(&mut self) -> Option<io::Result<Bytes>>;

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Path of the file backing this body, if any.
    fn to_path(&mut self) -> Option<PathBuf> {
        None
    }

    /// Open descriptor of the file backing this body, if any.
    fn as_raw_fd(&self) -> Option<RawFd> {
        None
    }
}

impl Body for VecDeque<Bytes> {
    fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        self.pop_front().map(Ok)
    }
}

impl Body for std::vec::IntoIter<Bytes> {
    fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        self.next().map(Ok)
    }
}

/// Body with no chunks.
#[derive(Debug, Default, Clone, Copy)]
pub struct Empty;

impl Body for Empty {
    fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        None
    }
}

/// The status/headers/body triple.
pub struct Response {
    pub status: Status,
    pub headers: Headers,
    pub body: Box<dyn Body>,
}

impl Response {
    pub fn new(status: impl Into<Status>, headers: Headers, body: impl Body + 'static) -> Self {
        Self {
            status: status.into(),
            headers,
            body: Box::new(body),
        }
    }

    /// Convenience for in-memory bodies.
    pub fn from_chunks<I, B>(status: impl Into<Status>, headers: Headers, chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let chunks: Vec<Bytes> = chunks.into_iter().map(Into::into).collect();
        Self::new(status, headers, chunks.into_iter())
    }

    /// Drain the body into one buffer and close it.
    pub fn collect_body(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.body.next_chunk() {
            out.extend_from_slice(&chunk?);
        }
        self.body.close()?;
        Ok(out)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// The wrapped request handler.
pub trait App: Send + Sync {
    fn call(&self, env: &mut Env) -> Result<Response, AppError>;
}

impl<F> App for F
where
    F: Fn(&mut Env) -> Result<Response, AppError> + Send + Sync,
{
    fn call(&self, env: &mut Env) -> Result<Response, AppError> {
        self(env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_text_statuses() {
        assert_eq!(Status::from("302 Found").coerce(), Some(302));
        assert_eq!(Status::from("  404").coerce(), Some(404));
        assert_eq!(Status::from("-5").coerce(), Some(-5));
        assert_eq!(Status::from("not-a-number").coerce(), None);
        assert_eq!(Status::from("").coerce(), None);
        assert_eq!(Status::from(200u16).coerce(), Some(200));
    }

    #[test]
    fn huge_text_status_saturates() {
        assert_eq!(
            Status::from("99999999999999999999999").coerce(),
            Some(i64::MAX)
        );
    }

    #[test]
    fn collect_body_drains_chunks() {
        let mut resp = Response::from_chunks(200u16, Headers::new(), ["ab", "", "c"]);
        assert_eq!(resp.collect_body().unwrap(), b"abc");
        assert!(resp.body.next_chunk().is_none());
    }

    #[test]
    fn queued_chunks_drain_in_order() {
        let mut body: VecDeque<Bytes> = (0..10_000u32)
            .map(|i| Bytes::from(i.to_string()))
            .collect();
        let mut seen = 0u32;
        while let Some(chunk) = body.next_chunk() {
            assert_eq!(chunk.unwrap(), Bytes::from(seen.to_string()));
            seen += 1;
        }
        assert_eq!(seen, 10_000);
        assert!(body.is_empty());
    }

    #[test]
    fn closures_are_apps() {
        let app = |env: &mut Env| -> Result<Response, AppError> {
            env.insert("X_SEEN", "1");
            Ok(Response::new(204u16, Headers::new(), Empty))
        };
        let mut env = Env::new();
        let resp = app.call(&mut env).unwrap();
        assert_eq!(resp.status, Status::Code(204));
        assert!(env.contains("X_SEEN"));
    }
}
