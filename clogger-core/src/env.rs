use crate::writer::LogWriter;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Well-known request environment keys (CGI / Rack names).
///
/// These are process-wide constants; nothing mutates them after start-up.
pub mod keys {
    pub const REMOTE_ADDR: &str = "REMOTE_ADDR";
    pub const REMOTE_IDENT: &str = "REMOTE_IDENT";
    pub const REMOTE_USER: &str = "REMOTE_USER";
    pub const REQUEST_METHOD: &str = "REQUEST_METHOD";
    pub const REQUEST_URI: &str = "REQUEST_URI";
    pub const PATH_INFO: &str = "PATH_INFO";
    pub const QUERY_STRING: &str = "QUERY_STRING";
    pub const SCRIPT_NAME: &str = "SCRIPT_NAME";
    pub const SERVER_NAME: &str = "SERVER_NAME";
    pub const SERVER_PORT: &str = "SERVER_PORT";
    pub const HTTP_VERSION: &str = "HTTP_VERSION";
    pub const HTTP_X_FORWARDED_FOR: &str = "HTTP_X_FORWARDED_FOR";
    pub const HTTP_COOKIE: &str = "HTTP_COOKIE";
    pub const CONTENT_TYPE: &str = "CONTENT_TYPE";
    pub const CONTENT_LENGTH: &str = "CONTENT_LENGTH";
}

/// Host-parsed cookies (`rack.request.cookie_hash`).
pub type CookieMap = HashMap<String, Bytes>;

/// The inbound request's key-value environment.
///
/// Values are raw bytes: clients can send anything, and nothing here assumes
/// a particular encoding. Besides the string variables the environment
/// carries a few typed slots that hosts fill in when they have them.
#[derive(Clone, Default)]
pub struct Env {
    vars: HashMap<String, Bytes>,
    input_length: Option<u64>,
    cookies: Option<Arc<CookieMap>>,
    errors: Option<Arc<dyn LogWriter>>,
    multithread: Option<bool>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Bytes>) -> Option<Bytes> {
        self.vars.insert(key.into(), value.into())
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&Bytes> {
        self.vars.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Bytes> {
        self.vars.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Size of the request body, if the host knows it.
    pub fn input_length(&self) -> Option<u64> {
        self.input_length
    }

    pub fn set_input_length(&mut self, len: u64) {
        self.input_length = Some(len);
    }

    /// Cookies the host has already parsed, if any.
    pub fn cookies(&self) -> Option<&Arc<CookieMap>> {
        self.cookies.as_ref()
    }

    pub fn set_cookies(&mut self, cookies: CookieMap) {
        self.cookies = Some(Arc::new(cookies));
    }

    /// Per-request error stream supplied by the host.
    pub fn errors(&self) -> Option<&Arc<dyn LogWriter>> {
        self.errors.as_ref()
    }

    pub fn set_errors(&mut self, errors: Arc<dyn LogWriter>) {
        self.errors = Some(errors);
    }

    /// Whether the host may run requests concurrently. `None` when the host
    /// did not say.
    pub fn multithread(&self) -> Option<bool> {
        self.multithread
    }

    pub fn set_multithread(&mut self, multithread: bool) {
        self.multithread = Some(multithread);
    }
}

impl<K, V> FromIterator<(K, V)> for Env
where
    K: Into<String>,
    V: Into<Bytes>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut env = Env::new();
        for (k, v) in iter {
            env.insert(k, v);
        }
        env
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("vars", &self.vars)
            .field("input_length", &self.input_length)
            .field("cookies", &self.cookies)
            .field("errors", &self.errors.is_some())
            .field("multithread", &self.multithread)
            .finish()
    }
}
