//! Access logging for HTTP middleware chains.
//!
//! A format string is compiled once into a [`Program`]; every request is
//! rendered by interpreting it against the request environment and the
//! response. Responses whose line needs the body size are handed back with a
//! [`LoggedBody`] that counts bytes and logs on close.

pub mod body;
pub mod clogger;
pub mod cookies;
pub mod escape;
pub mod eval;
pub mod format;
pub mod program;
pub mod render;
pub mod sink;
pub mod timing;

pub use body::{LoggedBody, Phase};
pub use clogger::{Clogger, Options};
pub use escape::{escape, escape_into};
pub use eval::{EvalError, Evaluator, ProcessEvaluator};
pub use format::{CompileOptions, Preset, compile};
pub use program::{Op, Program, SecondsFormat, Special, TimeAnchor, TimeFormat, needs_body_wrap, needs_response_headers};
pub use render::{LogState, RequestContext, ResponseContext, StatePool};
pub use sink::{OffloadWriter, Sink};
pub use timing::{Clock, ClockSource, RequestStart, Timestamp};
