//! nginx-style `$variable` formats.

use super::{OpsBuilder, seconds_format, time_format};
use crate::program::{Op, Special, TimeAnchor};
use clogger_core::{ClogError, Result};
use regex::Regex;
use std::sync::LazyLock;

/// literal prefix, optional `$token`, literal suffix
static SCAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ([^$]*)
        (\$+(?:
            env\{[A-Za-z0-9_]+(?:\.[A-Za-z0-9_.]+)?\}
          | e\{[^}]+\}
          | (?:request_)?time\{[0-9]+\}
          | time_(?:utc|local)\{[^}]+\}
          | [A-Za-z0-9_]*
        ))?
        ([^$]*)",
    )
    .expect("format scanner regex is valid")
});

/// Variables that map straight onto CGI environment keys.
const CGI_VARS: &[&str] = &[
    "remote_addr",
    "remote_ident",
    "remote_user",
    "path_info",
    "query_string",
    "script_name",
    "server_name",
    "server_port",
];

/// Shorthands kept for nginx compatibility.
fn alias(token: &str) -> &str {
    match token {
        "$request_time" => "$request_time{3}",
        "$msec" => "$time{3}",
        "$usec" => "$time{6}",
        other => other,
    }
}

fn special(name: &str) -> Option<Special> {
    Some(match name {
        "body_bytes_sent" => Special::BodyBytesSent,
        "status" => Special::Status,
        "request" => Special::RequestLine,
        "request_length" => Special::RequestLength,
        "response_length" => Special::ResponseLength,
        "ip" => Special::ClientIp,
        "pid" => Special::Pid,
        "request_uri" => Special::RequestUri,
        "time_iso8601" => Special::TimeIso8601,
        "time_local" => Special::TimeLocalFixed,
        "time_utc" => Special::TimeUtcFixed,
        _ => return None,
    })
}

pub(crate) fn compile_into(format: &str, out: &mut OpsBuilder) -> Result<()> {
    for caps in SCAN.captures_iter(format) {
        if let Some(pre) = caps.get(1) {
            out.literal(pre.as_str().as_bytes());
        }
        if let Some(tok) = caps.get(2) {
            token_ops(tok.as_str(), out)?;
        }
        if let Some(post) = caps.get(3) {
            out.literal(post.as_str().as_bytes());
        }
    }
    Ok(())
}

fn token_ops(raw: &str, out: &mut OpsBuilder) -> Result<()> {
    // "$$$pid" → literal "$$" then "$pid"
    let dollars = raw.bytes().take_while(|&b| b == b'$').count();
    let mut tok = raw;
    if dollars > 1 && dollars < raw.len() {
        out.literal(&raw.as_bytes()[..dollars - 1]);
        tok = &raw[dollars - 1..];
    }
    if dollars == tok.len() {
        out.literal(tok.as_bytes());
        return Ok(());
    }

    let tok = alias(tok);
    let name = &tok[1..];

    if let Some(inner) = braced(name, "env") {
        out.push(Op::RequestField(inner.to_string()));
    } else if let Some(expr) = braced(name, "e") {
        out.push(Op::Eval(expr.to_string()));
    } else if let Some(cookie) = name.strip_prefix("cookie_").filter(|c| !c.is_empty()) {
        out.push(Op::Cookie(cookie.to_string()));
    } else if CGI_VARS.contains(&name) {
        out.push(Op::RequestField(name.to_ascii_uppercase()));
    } else if let Some(header) = name.strip_prefix("sent_http_").filter(|h| !h.is_empty()) {
        out.push(Op::ResponseHeader(header.to_ascii_lowercase().replace('_', "-")));
    } else if name.starts_with("http_") && name.len() > "http_".len() {
        out.push(Op::RequestField(name.to_ascii_uppercase()));
    } else if let Some(pattern) = braced(name, "time_local") {
        out.push(Op::TimeLocal(time_format(tok, pattern, TimeAnchor::End)?));
    } else if let Some(pattern) = braced(name, "time_utc") {
        out.push(Op::TimeUtc(time_format(tok, pattern, TimeAnchor::End)?));
    } else if let Some(precision) = braced(name, "time") {
        out.push(Op::TimeNow(seconds_format(tok, precision)?));
    } else if let Some(precision) = braced(name, "request_time") {
        out.push(Op::RequestElapsed(seconds_format(tok, precision)?));
    } else if let Some(sp) = special(name) {
        out.push(Op::Special(sp));
    } else {
        return Err(ClogError::format(tok, "unable to make sense of token"));
    }
    Ok(())
}

/// `prefix{inner}` → `inner`
fn braced<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    name.strip_prefix(prefix)?
        .strip_prefix('{')?
        .strip_suffix('}')
}
