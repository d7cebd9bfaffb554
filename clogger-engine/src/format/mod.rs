//! Format string compiler.
//!
//! Two grammars compile to the same [`Program`]: Apache-style `%` directives
//! and nginx-style `$` variables. Compilation is pure; every malformed
//! directive is reported here so nothing can fail later at request time.

mod apache;
mod nginx;
pub mod presets;

pub use presets::Preset;

use crate::program::{Op, Program, SecondsFormat, TimeAnchor, TimeFormat};
use bytes::Bytes;
use chrono::format::{Item, StrftimeItems};
use clogger_core::{ClogError, Result, Syntax, keys};

/// Upper bound for one rendered non-literal strftime item.
const STRFTIME_FIELD_MAX: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    pub syntax: Syntax,
    /// End the program with a newline literal unless it already ends in one.
    pub append_newline: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            syntax: Syntax::Apache,
            append_newline: true,
        }
    }
}

impl CompileOptions {
    pub fn new(syntax: Syntax) -> Self {
        Self {
            syntax,
            ..Self::default()
        }
    }
}

/// Compile `format` into a program.
pub fn compile(format: &str, options: &CompileOptions) -> Result<Program> {
    let mut builder = OpsBuilder::default();
    match options.syntax {
        Syntax::Apache => apache::compile_into(format, &mut builder)?,
        Syntax::Nginx => nginx::compile_into(format, &mut builder)?,
    }
    Ok(builder.finish(options.append_newline))
}

/// Accumulates ops, merging adjacent literals.
#[derive(Default)]
pub(crate) struct OpsBuilder {
    ops: Vec<Op>,
    pending: Vec<u8>,
}

impl OpsBuilder {
    pub(crate) fn literal(&mut self, text: &[u8]) {
        self.pending.extend_from_slice(text);
    }

    pub(crate) fn push(&mut self, op: Op) {
        self.flush();
        self.ops.push(op);
    }

    fn flush(&mut self) {
        if !self.pending.is_empty() {
            let text = std::mem::take(&mut self.pending);
            self.ops.push(Op::Literal(Bytes::from(text)));
        }
    }

    fn finish(mut self, append_newline: bool) -> Program {
        if append_newline {
            let ends_in_newline = match (self.pending.last(), self.ops.last()) {
                (Some(&b), _) => b == b'\n',
                (None, Some(Op::Literal(text))) => text.ends_with(b"\n"),
                (None, Some(_)) => false,
                // nothing to terminate
                (None, None) => true,
            };
            if !ends_in_newline {
                self.pending.push(b'\n');
            }
        }
        self.flush();
        Program::new(self.ops)
    }
}

/// Validate a strftime pattern and compute the scratch length it needs.
pub(crate) fn time_format(directive: &str, pattern: &str, anchor: TimeAnchor) -> Result<TimeFormat> {
    let mut scratch_len = 0usize;
    for item in StrftimeItems::new(pattern) {
        scratch_len += match item {
            Item::Error => {
                return Err(ClogError::format(
                    directive,
                    format!("invalid strftime pattern {pattern:?}"),
                ));
            }
            Item::Literal(s) | Item::Space(s) => s.len(),
            _ => STRFTIME_FIELD_MAX,
        };
    }
    Ok(TimeFormat {
        pattern: pattern.to_string(),
        anchor,
        scratch_len,
    })
}

pub(crate) fn seconds_format(directive: &str, precision: &str) -> Result<SecondsFormat> {
    let digits: u8 = precision
        .parse()
        .map_err(|_| ClogError::format(directive, format!("bad precision {precision:?}")))?;
    SecondsFormat::new(digits).ok_or_else(|| {
        ClogError::format(
            directive,
            format!(
                "too high precision: {digits} (max={})",
                SecondsFormat::MAX_PRECISION
            ),
        )
    })
}

/// Map a request header name to its environment key.
///
/// `User-Agent` → `HTTP_USER_AGENT`; `Content-Type`/`Content-Length` keep
/// their CGI names; names already in `UPPER_SNAKE` form are used as given.
pub(crate) fn header_env_key(name: &str) -> String {
    if name.eq_ignore_ascii_case("content-type") {
        return keys::CONTENT_TYPE.to_string();
    }
    if name.eq_ignore_ascii_case("content-length") {
        return keys::CONTENT_LENGTH.to_string();
    }
    let env_form = name.contains('_')
        && name
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_');
    if env_form {
        return name.to_string();
    }
    let mut key = String::with_capacity(5 + name.len());
    key.push_str("HTTP_");
    key.extend(
        name.chars()
            .map(|c| if c == '-' { '_' } else { c.to_ascii_uppercase() }),
    );
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_names_map_to_env_keys() {
        assert_eq!(header_env_key("User-Agent"), "HTTP_USER_AGENT");
        assert_eq!(header_env_key("referer"), "HTTP_REFERER");
        assert_eq!(header_env_key("Content-Type"), "CONTENT_TYPE");
        assert_eq!(header_env_key("HTTP_X_REAL_IP"), "HTTP_X_REAL_IP");
        assert_eq!(header_env_key("REMOTE_USER"), "REMOTE_USER");
    }

    #[test]
    fn strftime_patterns_are_validated() {
        let tf = time_format("%{%Y}t", "%Y-%m", TimeAnchor::End).unwrap();
        assert_eq!(tf.scratch_len, STRFTIME_FIELD_MAX * 2 + 1);
        assert!(time_format("%{%Q}t", "%Q", TimeAnchor::End).is_err());
    }

    #[test]
    fn precision_is_capped_at_microseconds() {
        assert_eq!(seconds_format("x", "3").unwrap().precision, 3);
        assert!(seconds_format("x", "7").is_err());
        assert!(seconds_format("x", "abc").is_err());
    }

    #[test]
    fn empty_format_compiles_to_empty_program() {
        let p = compile("", &CompileOptions::default()).unwrap();
        assert!(p.is_empty());
    }

    #[test]
    fn newline_is_appended_once() {
        let opts = CompileOptions::default();
        let p = compile("x", &opts).unwrap();
        assert_eq!(p.ops(), &[Op::Literal(Bytes::from_static(b"x\n"))]);
        let p = compile("x\n", &opts).unwrap();
        assert_eq!(p.ops(), &[Op::Literal(Bytes::from_static(b"x\n"))]);

        let raw = CompileOptions {
            append_newline: false,
            ..opts
        };
        let p = compile("x", &raw).unwrap();
        assert_eq!(p.ops(), &[Op::Literal(Bytes::from_static(b"x"))]);
    }

    #[test]
    fn syntaxes_agree_on_equivalent_formats() {
        let a = compile("%h %r %>s %b", &CompileOptions::new(Syntax::Apache)).unwrap();
        let n = compile("$ip $request $status $response_length", &CompileOptions::new(Syntax::Nginx))
            .unwrap();
        assert_eq!(a, n);
    }
}
