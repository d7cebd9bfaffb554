//! The op interpreter.
//!
//! [`LogState`] owns everything a render mutates: the line buffer (cleared,
//! never reallocated, between requests), the strftime scratch table keyed by
//! op index, the body byte counter and the per-request cookie cache. The
//! [`Program`] itself is only ever read.

use crate::cookies::CookieCache;
use crate::escape::escape_into;
use crate::eval::Evaluator;
use crate::program::{Op, Program, SecondsFormat, Special, TimeAnchor, TimeFormat};
use crate::timing::{Clock, RequestStart, Timestamp, wall_now};
use chrono::{DateTime, Local, Utc};
use clogger_core::{Env, Headers, Status, keys};
use std::fmt::{self, Write as _};
use std::io::Write as _;
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

const DASH: &[u8] = b"-";
const INITIAL_LINE_CAPACITY: usize = 256;
const POOL_MAX_IDLE: usize = 64;

const TIME_LOCAL_FIXED: &str = "%d/%b/%Y:%H:%M:%S %z";
const TIME_UTC_FIXED: &str = "%d/%b/%Y:%H:%M:%S +0000";
const TIME_ISO8601: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// Request-side inputs to a render.
pub struct RequestContext<'a> {
    pub env: &'a Env,
    pub start: RequestStart,
    pub clock: Clock,
    pub evaluator: Option<&'a dyn Evaluator>,
}

/// Response-side inputs to a render.
#[derive(Debug, Clone, Copy)]
pub struct ResponseContext<'a> {
    pub status: &'a Status,
    pub headers: &'a Headers,
}

/// Mutable per-instance render state.
#[derive(Debug, Clone)]
pub struct LogState {
    buf: Vec<u8>,
    scratch: Vec<Option<Vec<u8>>>,
    body_bytes_sent: u64,
    cookies: CookieCache,
}

/// Idle render states. Each log call checks one out, renders and writes
/// without holding any lock, then hands it back so its buffers are reused.
#[derive(Debug, Default)]
pub struct StatePool {
    idle: Mutex<Vec<LogState>>,
}

impl StatePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// A state ready for a new request.
    pub fn checkout(&self, program: &Program) -> LogState {
        let idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop();
        let mut state = idle.unwrap_or_else(|| LogState::new(program));
        state.begin_request();
        state
    }

    pub fn checkin(&self, state: LogState) {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < POOL_MAX_IDLE {
            idle.push(state);
        }
    }

    pub fn idle(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl LogState {
    pub fn new(program: &Program) -> Self {
        let scratch = program
            .ops()
            .iter()
            .map(|op| op.scratch_len().map(Vec::with_capacity))
            .collect();
        Self {
            buf: Vec::with_capacity(INITIAL_LINE_CAPACITY),
            scratch,
            body_bytes_sent: 0,
            cookies: CookieCache::default(),
        }
    }

    /// Forget everything tied to the previous request.
    pub fn begin_request(&mut self) {
        self.body_bytes_sent = 0;
        self.cookies.reset();
    }

    pub fn reset_cookies(&mut self) {
        self.cookies.reset();
    }

    #[inline]
    pub fn body_bytes_sent(&self) -> u64 {
        self.body_bytes_sent
    }

    pub fn reset_body_bytes(&mut self) {
        self.body_bytes_sent = 0;
    }

    #[inline]
    pub fn add_body_bytes(&mut self, n: u64) {
        self.body_bytes_sent = self.body_bytes_sent.saturating_add(n);
    }

    pub fn set_body_bytes(&mut self, n: u64) {
        self.body_bytes_sent = n;
    }

    /// The most recently rendered line.
    pub fn line(&self) -> &[u8] {
        &self.buf
    }

    /// Execute `program` left to right. Never fails: anything that cannot be
    /// rendered becomes `-`.
    pub fn render(
        &mut self,
        program: &Program,
        req: &RequestContext<'_>,
        resp: &ResponseContext<'_>,
    ) -> &[u8] {
        let LogState {
            buf,
            scratch,
            body_bytes_sent,
            cookies,
        } = self;
        buf.clear();
        if scratch.len() != program.len() {
            // state built for another program; rebuild the table
            *scratch = program
                .ops()
                .iter()
                .map(|op| op.scratch_len().map(Vec::with_capacity))
                .collect();
        }

        for (op, slot) in program.ops().iter().zip(scratch.iter_mut()) {
            match op {
                Op::Literal(text) => buf.extend_from_slice(text),
                Op::RequestField(key) => append_escaped_or_dash(buf, req.env.get(key)),
                Op::ResponseHeader(name) => append_escaped_or_dash(buf, resp.headers.get(name)),
                Op::Special(sp) => special(buf, *sp, *body_bytes_sent, req, resp),
                Op::Eval(expr) => match req.evaluator.map(|ev| ev.eval(expr, req.env)) {
                    Some(Ok(value)) => buf.extend_from_slice(value.as_bytes()),
                    _ => buf.extend_from_slice(DASH),
                },
                Op::TimeLocal(tf) => {
                    let t = DateTime::<Local>::from(instant(tf, req));
                    strftime_bounded(buf, slot, tf, |w| write!(w, "{}", t.format(&tf.pattern)));
                }
                Op::TimeUtc(tf) => {
                    let t = DateTime::<Utc>::from(instant(tf, req));
                    strftime_bounded(buf, slot, tf, |w| write!(w, "{}", t.format(&tf.pattern)));
                }
                Op::RequestElapsed(sf) => {
                    let elapsed = req.clock.now().since(req.start.clock);
                    append_seconds(buf, elapsed, *sf);
                }
                Op::TimeNow(sf) => append_seconds(buf, wall_now(), *sf),
                Op::Cookie(name) => append_escaped_or_dash(buf, cookies.lookup(req.env, name)),
            }
        }
        buf
    }
}

fn instant(tf: &TimeFormat, req: &RequestContext<'_>) -> SystemTime {
    match tf.anchor {
        TimeAnchor::Begin => req.start.wall,
        TimeAnchor::End => SystemTime::now(),
    }
}

#[inline]
fn append_escaped_or_dash(buf: &mut Vec<u8>, value: Option<&bytes::Bytes>) {
    match value {
        Some(v) => escape_into(buf, v),
        None => buf.extend_from_slice(DASH),
    }
}

fn special(
    buf: &mut Vec<u8>,
    sp: Special,
    body_bytes_sent: u64,
    req: &RequestContext<'_>,
    resp: &ResponseContext<'_>,
) {
    let env = req.env;
    match sp {
        Special::BodyBytesSent => append_u64(buf, body_bytes_sent),
        Special::ResponseLength if body_bytes_sent == 0 => buf.extend_from_slice(DASH),
        Special::ResponseLength => append_u64(buf, body_bytes_sent),
        Special::Status => append_status(buf, resp.status),
        Special::RequestLine => {
            // REQUEST_METHOD is host-validated, not client-controlled
            if let Some(method) = env.get(keys::REQUEST_METHOD) {
                buf.extend_from_slice(method);
            }
            buf.push(b' ');
            append_request_uri(buf, env);
            if let Some(version) = env.get(keys::HTTP_VERSION) {
                buf.push(b' ');
                escape_into(buf, version);
            }
        }
        Special::RequestUri => append_request_uri(buf, env),
        Special::RequestLength => match env.input_length() {
            Some(len) => append_u64(buf, len),
            None => buf.extend_from_slice(DASH),
        },
        Special::ClientIp => match env.get(keys::HTTP_X_FORWARDED_FOR) {
            Some(xff) => escape_into(buf, xff),
            // set by the server itself, never escaped
            None => match env.get(keys::REMOTE_ADDR) {
                Some(addr) => buf.extend_from_slice(addr),
                None => buf.extend_from_slice(DASH),
            },
        },
        Special::Pid => append_u64(buf, u64::from(std::process::id())),
        Special::TimeIso8601 => {
            let now = Local::now();
            fixed_time(buf, |w| write!(w, "{}", now.format(TIME_ISO8601)));
        }
        Special::TimeLocalFixed => {
            let now = Local::now();
            fixed_time(buf, |w| write!(w, "{}", now.format(TIME_LOCAL_FIXED)));
        }
        Special::TimeUtcFixed => {
            let now = Utc::now();
            fixed_time(buf, |w| write!(w, "{}", now.format(TIME_UTC_FIXED)));
        }
    }
}

fn append_status(buf: &mut Vec<u8>, status: &Status) {
    match status.coerce() {
        Some(code @ 100..=999) => append_u64(buf, code as u64),
        _ => buf.extend_from_slice(DASH),
    }
}

fn append_request_uri(buf: &mut Vec<u8>, env: &Env) {
    if let Some(uri) = env.get(keys::REQUEST_URI) {
        escape_into(buf, uri);
        return;
    }
    if let Some(path) = env.get(keys::PATH_INFO) {
        escape_into(buf, path);
    }
    if let Some(query) = env.get(keys::QUERY_STRING).filter(|q| !q.is_empty()) {
        buf.push(b'?');
        escape_into(buf, query);
    }
}

#[inline]
fn append_u64(buf: &mut Vec<u8>, n: u64) {
    let mut num = itoa::Buffer::new();
    buf.extend_from_slice(num.format(n).as_bytes());
}

/// `sec` or `sec.frac`, the fraction zero-padded to `precision` digits.
fn append_seconds(buf: &mut Vec<u8>, t: Timestamp, sf: SecondsFormat) {
    let mut num = itoa::Buffer::new();
    buf.extend_from_slice(num.format(t.sec).as_bytes());
    if sf.precision == 0 {
        return;
    }
    buf.push(b'.');
    let frac = num.format(t.usec / i64::from(sf.divisor));
    for _ in frac.len()..usize::from(sf.precision) {
        buf.push(b'0');
    }
    buf.extend_from_slice(frac.as_bytes());
}

/// `fmt::Write` into a byte buffer that refuses to grow past `limit`.
struct Bounded<'a> {
    buf: &'a mut Vec<u8>,
    limit: usize,
}

impl fmt::Write for Bounded<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.buf.len() + s.len() > self.limit {
            return Err(fmt::Error);
        }
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

/// Render into the op's scratch slot; empty or oversized output is `-`.
fn strftime_bounded<F>(buf: &mut Vec<u8>, slot: &mut Option<Vec<u8>>, tf: &TimeFormat, f: F)
where
    F: FnOnce(&mut Bounded<'_>) -> fmt::Result,
{
    let scratch = slot.get_or_insert_with(|| Vec::with_capacity(tf.scratch_len));
    scratch.clear();
    let mut w = Bounded {
        buf: scratch,
        limit: tf.scratch_len,
    };
    match f(&mut w) {
        Ok(()) if !scratch.is_empty() => buf.extend_from_slice(scratch),
        _ => buf.extend_from_slice(DASH),
    }
}

/// Fixed layouts can't overflow, but a formatting error still degrades to `-`.
fn fixed_time<F>(buf: &mut Vec<u8>, f: F)
where
    F: FnOnce(&mut Vec<u8>) -> std::io::Result<()>,
{
    let mark = buf.len();
    if f(buf).is_err() {
        buf.truncate(mark);
        buf.extend_from_slice(DASH);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{CompileOptions, compile};
    use crate::program::TimeFormat;
    use clogger_core::{CookieMap, Syntax};

    struct Fixture {
        env: Env,
        status: Status,
        headers: Headers,
        clock: Clock,
        start: RequestStart,
    }

    impl Fixture {
        fn new(env: Env) -> Self {
            let clock = Clock::detect().unwrap();
            Self {
                env,
                status: Status::Code(200),
                headers: Headers::new(),
                clock,
                start: RequestStart::now(&clock),
            }
        }

        fn render_with(&self, fmt: &str, syntax: Syntax, evaluator: Option<&dyn Evaluator>) -> String {
            let opts = CompileOptions {
                syntax,
                append_newline: false,
            };
            let program = compile(fmt, &opts).unwrap();
            let mut state = LogState::new(&program);
            let req = RequestContext {
                env: &self.env,
                start: self.start,
                clock: self.clock,
                evaluator,
            };
            let resp = ResponseContext {
                status: &self.status,
                headers: &self.headers,
            };
            String::from_utf8(state.render(&program, &req, &resp).to_vec()).unwrap()
        }

        fn render(&self, fmt: &str) -> String {
            self.render_with(fmt, Syntax::Apache, None)
        }
    }

    fn request() -> Env {
        Env::new()
            .with(keys::REMOTE_ADDR, "10.0.0.1")
            .with(keys::REQUEST_METHOD, "GET")
            .with(keys::PATH_INFO, "/p")
            .with(keys::QUERY_STRING, "a=1")
            .with(keys::HTTP_VERSION, "HTTP/1.1")
    }

    #[test]
    fn request_line_rebuilds_uri_without_request_uri() {
        let fx = Fixture::new(request());
        assert_eq!(fx.render("%r"), "GET /p?a=1 HTTP/1.1");
        assert_eq!(fx.render("%U"), "/p?a=1");
    }

    #[test]
    fn request_line_prefers_request_uri_and_escapes_version() {
        let env = request()
            .with(keys::REQUEST_URI, "/x y\"")
            .with(keys::HTTP_VERSION, "HTTP/1.1\n");
        let fx = Fixture::new(env);
        assert_eq!(fx.render("%r"), r"GET /x y\x22 HTTP/1.1\x0A");
    }

    #[test]
    fn empty_query_is_omitted() {
        let fx = Fixture::new(request().with(keys::QUERY_STRING, ""));
        assert_eq!(fx.render("%U"), "/p");
    }

    #[test]
    fn status_rendering() {
        let mut fx = Fixture::new(Env::new());
        for (status, want) in [
            (Status::Code(200), "200"),
            (Status::Code(99), "-"),
            (Status::Code(1000), "-"),
            (Status::from("302 Found"), "302"),
            (Status::from("not-a-number"), "-"),
        ] {
            fx.status = status;
            assert_eq!(fx.render("%s"), want);
        }
    }

    #[test]
    fn client_ip_escapes_forwarded_for_only() {
        let fx = Fixture::new(Env::new().with(keys::REMOTE_ADDR, "10.0.0.1\x01"));
        assert_eq!(fx.render("%h"), "10.0.0.1\x01");

        let fx = Fixture::new(
            Env::new()
                .with(keys::REMOTE_ADDR, "10.0.0.1")
                .with(keys::HTTP_X_FORWARDED_FOR, "1.2.3.4\x01"),
        );
        assert_eq!(fx.render("%h"), r"1.2.3.4\x01");

        assert_eq!(Fixture::new(Env::new()).render("%h"), "-");
    }

    #[test]
    fn fields_headers_and_cookies() {
        let mut env = request().with("HTTP_USER_AGENT", "curl'7");
        let mut jar = CookieMap::new();
        jar.insert("sid".into(), bytes::Bytes::from_static(b"s\x7f"));
        env.set_cookies(jar);
        let mut fx = Fixture::new(env);
        fx.headers = Headers::new().with("Content-Type", "text/plain");

        assert_eq!(
            fx.render("%{User-Agent}i %{content-type}o %{sid}C %{nope}C %{X-Missing}o"),
            r"curl\x277 text/plain s\x7F - -"
        );
    }

    #[test]
    fn response_length_vs_body_bytes() {
        let fx = Fixture::new(Env::new());
        let program = compile("%b %B", &CompileOptions { syntax: Syntax::Apache, append_newline: false }).unwrap();
        let mut state = LogState::new(&program);
        let req = RequestContext {
            env: &fx.env,
            start: fx.start,
            clock: fx.clock,
            evaluator: None,
        };
        let resp = ResponseContext {
            status: &fx.status,
            headers: &fx.headers,
        };
        assert_eq!(state.render(&program, &req, &resp), b"- 0");
        state.add_body_bytes(12);
        assert_eq!(state.render(&program, &req, &resp), b"12 12");
    }

    #[test]
    fn request_length_and_pid() {
        let mut env = Env::new();
        assert_eq!(Fixture::new(env.clone()).render("%I"), "-");
        env.set_input_length(512);
        let fx = Fixture::new(env);
        assert_eq!(fx.render("%I"), "512");
        assert_eq!(fx.render("%P"), std::process::id().to_string());
    }

    #[test]
    fn eval_degrades_to_dash() {
        let fx = Fixture::new(Env::new());
        assert_eq!(fx.render("%{x}E"), "-");

        let ev = |expr: &str, _: &Env| -> Result<String, crate::eval::EvalError> {
            match expr {
                "ok" => Ok("fine".into()),
                _ => Err(crate::eval::EvalError::Unknown(expr.into())),
            }
        };
        assert_eq!(fx.render_with("%{ok}E %{bad}E", Syntax::Apache, Some(&ev)), "fine -");
    }

    #[test]
    fn elapsed_and_now_shapes() {
        let fx = Fixture::new(Env::new());
        let t = fx.render("%{3}T");
        let (sec, frac) = t.split_once('.').unwrap();
        assert!(sec.parse::<u64>().is_ok());
        assert_eq!(frac.len(), 3);

        assert!(!fx.render("%T").contains('.'));
        let now = fx.render("%{usec}t");
        assert_eq!(now.split_once('.').unwrap().1.len(), 6);
    }

    #[test]
    fn seconds_zero_padding() {
        let mut buf = Vec::new();
        append_seconds(&mut buf, Timestamp { sec: 3, usec: 4_500 }, SecondsFormat::new(3).unwrap());
        assert_eq!(buf, b"3.004");
        buf.clear();
        append_seconds(&mut buf, Timestamp { sec: 0, usec: 7 }, SecondsFormat::new(6).unwrap());
        assert_eq!(buf, b"0.000007");
    }

    #[test]
    fn strftime_overflow_and_empty_output_render_dash() {
        let tf = TimeFormat {
            pattern: "%Y-%m-%d".into(),
            anchor: TimeAnchor::End,
            scratch_len: 4,
        };
        let mut buf = Vec::new();
        let mut slot = None;
        let t = Utc::now();
        strftime_bounded(&mut buf, &mut slot, &tf, |w| write!(w, "{}", t.format(&tf.pattern)));
        assert_eq!(buf, b"-");

        buf.clear();
        strftime_bounded(&mut buf, &mut slot, &tf, |_| Ok(()));
        assert_eq!(buf, b"-");
    }

    #[test]
    fn fixed_time_layouts() {
        let fx = Fixture::new(Env::new());
        let utc = fx.render("%{utc}t");
        assert!(utc.ends_with(" +0000"), "{utc}");
        assert_eq!(utc.len(), "01/Jan/2024:00:00:00 +0000".len());
        let iso = fx.render("%{iso8601}t");
        assert_eq!(&iso[4..5], "-");
        assert_eq!(&iso[10..11], "T");
        assert_eq!(fx.render("%{begin:%Y}t").len(), 4);
    }

    #[test]
    fn buffer_is_reused_between_renders() {
        let fx = Fixture::new(request());
        let program = compile("%h %r", &CompileOptions::default()).unwrap();
        let mut state = LogState::new(&program);
        let req = RequestContext {
            env: &fx.env,
            start: fx.start,
            clock: fx.clock,
            evaluator: None,
        };
        let resp = ResponseContext {
            status: &fx.status,
            headers: &fx.headers,
        };
        let first = state.render(&program, &req, &resp).to_vec();
        let cap = state.buf.capacity();
        let second = state.render(&program, &req, &resp).to_vec();
        assert_eq!(first, second);
        assert_eq!(state.buf.capacity(), cap);
    }

    #[test]
    fn pooled_states_start_clean_and_are_reused() {
        let program = compile("%B", &CompileOptions::default()).unwrap();
        let pool = StatePool::new();
        let mut state = pool.checkout(&program);
        state.add_body_bytes(42);
        pool.checkin(state);
        assert_eq!(pool.idle(), 1);

        let again = pool.checkout(&program);
        assert_eq!(again.body_bytes_sent(), 0);
        assert_eq!(pool.idle(), 0);
        let other = pool.checkout(&program);
        pool.checkin(again);
        pool.checkin(other);
        assert_eq!(pool.idle(), 2);
    }
}
