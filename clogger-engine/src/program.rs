//! Compiled log-line programs.

use bytes::Bytes;

/// Values computed by the logger itself rather than looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Special {
    BodyBytesSent,
    Status,
    RequestLine,
    RequestLength,
    /// Like `BodyBytesSent`, but `-` instead of `0`.
    ResponseLength,
    ClientIp,
    Pid,
    RequestUri,
    TimeIso8601,
    /// `%d/%b/%Y:%H:%M:%S %z` in local time.
    TimeLocalFixed,
    /// `%d/%b/%Y:%H:%M:%S +0000`.
    TimeUtcFixed,
}

/// Which instant a strftime directive formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeAnchor {
    /// Request entry.
    Begin,
    /// Render time.
    #[default]
    End,
}

/// A validated strftime pattern plus the scratch length needed to render it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeFormat {
    pub pattern: String,
    pub anchor: TimeAnchor,
    pub scratch_len: usize,
}

/// `seconds[.fraction]` rendering of a microsecond-resolution instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecondsFormat {
    /// Fractional digits, 0..=6.
    pub precision: u8,
    /// Microseconds are divided by this before printing the fraction.
    pub divisor: u32,
}

impl SecondsFormat {
    pub const MAX_PRECISION: u8 = 6;

    /// `None` when `precision` exceeds microsecond resolution.
    pub fn new(precision: u8) -> Option<Self> {
        if precision > Self::MAX_PRECISION {
            return None;
        }
        Some(Self {
            precision,
            divisor: 10u32.pow(u32::from(Self::MAX_PRECISION - precision)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Literal(Bytes),
    RequestField(String),
    /// Lowercased header name.
    ResponseHeader(String),
    Special(Special),
    Eval(String),
    TimeLocal(TimeFormat),
    TimeUtc(TimeFormat),
    RequestElapsed(SecondsFormat),
    TimeNow(SecondsFormat),
    Cookie(String),
}

impl Op {
    /// Scratch bytes this op needs at render time, if any.
    pub fn scratch_len(&self) -> Option<usize> {
        match self {
            Op::TimeLocal(tf) | Op::TimeUtc(tf) => Some(tf.scratch_len),
            _ => None,
        }
    }
}

/// An immutable, ordered list of ops. Shared read-only by every clone of a
/// logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    ops: Box<[Op]>,
    needs_response_headers: bool,
    needs_body_wrap: bool,
    uses_eval: bool,
}

impl Program {
    pub fn new(ops: Vec<Op>) -> Self {
        let needs_response_headers = ops.iter().any(|op| matches!(op, Op::ResponseHeader(_)));
        let needs_body_wrap = ops.iter().any(|op| {
            matches!(
                op,
                Op::Special(Special::BodyBytesSent) | Op::Special(Special::ResponseLength)
            )
        });
        let uses_eval = ops.iter().any(|op| matches!(op, Op::Eval(_)));
        Self {
            ops: ops.into_boxed_slice(),
            needs_response_headers,
            needs_body_wrap,
            uses_eval,
        }
    }

    #[inline]
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Any op looks at response headers.
    #[inline]
    pub fn needs_response_headers(&self) -> bool {
        self.needs_response_headers
    }

    /// Any op reports bytes sent, so the body has to be counted.
    #[inline]
    pub fn needs_body_wrap(&self) -> bool {
        self.needs_body_wrap
    }

    pub fn uses_eval(&self) -> bool {
        self.uses_eval
    }
}

pub fn needs_response_headers(program: &Program) -> bool {
    program.needs_response_headers()
}

pub fn needs_body_wrap(program: &Program) -> bool {
    program.needs_body_wrap()
}
