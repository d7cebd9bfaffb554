//! Apache `mod_log_config`-style directives (`%h %l %u %t "%r" %>s %b`).

use super::{OpsBuilder, header_env_key, seconds_format, time_format};
use crate::program::{Op, SecondsFormat, Special, TimeAnchor};
use clogger_core::{ClogError, Result, keys};

pub(crate) fn compile_into(format: &str, out: &mut OpsBuilder) -> Result<()> {
    let bytes = format.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let Some(offset) = bytes[i..].iter().position(|&b| b == b'%') else {
            out.literal(&bytes[i..]);
            break;
        };
        out.literal(&bytes[i..i + offset]);
        let start = i + offset;
        let mut j = start + 1;

        if bytes.get(j) == Some(&b'%') {
            out.literal(b"%");
            i = j + 1;
            continue;
        }

        let mut arg = None;
        if bytes.get(j) == Some(&b'{') {
            let Some(close) = bytes[j + 1..].iter().position(|&b| b == b'}') else {
                return Err(ClogError::format(&format[start..], "missing closing brace"));
            };
            let close = j + 1 + close;
            arg = Some(&format[j + 1..close]);
            j = close + 1;
        }

        // `%>s` / `%<s`: original vs final request; both are the same here.
        while matches!(bytes.get(j), Some(b'<') | Some(b'>')) {
            j += 1;
        }

        let Some(&letter) = bytes.get(j) else {
            return Err(ClogError::format(&format[start..], "directive has no conversion letter"));
        };
        if !letter.is_ascii_alphabetic() {
            let directive = format.get(start..=j).unwrap_or(&format[start..]);
            return Err(ClogError::format(directive, "directive has no conversion letter"));
        }
        let directive = &format[start..=j];
        directive_ops(directive, letter, arg, out)?;
        i = j + 1;
    }
    Ok(())
}

fn directive_ops(directive: &str, letter: u8, arg: Option<&str>, out: &mut OpsBuilder) -> Result<()> {
    if arg == Some("") {
        return Err(ClogError::format(directive, "empty argument"));
    }
    match (letter, arg) {
        (b'h', None) => out.push(Op::Special(Special::ClientIp)),
        (b'a', None) => out.push(Op::RequestField(keys::REMOTE_ADDR.into())),
        (b'l', None) => out.push(Op::RequestField(keys::REMOTE_IDENT.into())),
        (b'u', None) => out.push(Op::RequestField(keys::REMOTE_USER.into())),
        (b't', None) => {
            out.literal(b"[");
            out.push(Op::Special(Special::TimeLocalFixed));
            out.literal(b"]");
        }
        (b't', Some(arg)) => out.push(time_op(directive, arg)?),
        (b'r', None) => out.push(Op::Special(Special::RequestLine)),
        (b's', None) => out.push(Op::Special(Special::Status)),
        (b'b', None) => out.push(Op::Special(Special::ResponseLength)),
        (b'B', None) => out.push(Op::Special(Special::BodyBytesSent)),
        (b'I', None) => out.push(Op::Special(Special::RequestLength)),
        (b'U', None) => out.push(Op::Special(Special::RequestUri)),
        (b'P', None) => out.push(Op::Special(Special::Pid)),
        (b'T', None) => out.push(Op::RequestElapsed(elapsed(0))),
        (b'T', Some(unit)) => {
            let precision = match unit {
                "s" => "0",
                "ms" => "3",
                "us" => "6",
                digits => digits,
            };
            out.push(Op::RequestElapsed(seconds_format(directive, precision)?));
        }
        (b'D', None) => out.push(Op::RequestElapsed(elapsed(SecondsFormat::MAX_PRECISION))),
        (b'i', Some(name)) => out.push(Op::RequestField(header_env_key(name))),
        (b'o', Some(name)) => out.push(Op::ResponseHeader(name.to_ascii_lowercase())),
        (b'e' | b'C', Some(name)) => out.push(Op::Cookie(name.to_string())),
        (b'x', Some(key)) => out.push(Op::RequestField(key.to_string())),
        (b'E', Some(expr)) => out.push(Op::Eval(expr.to_string())),
        (b'i' | b'o' | b'e' | b'C' | b'x' | b'E', None) => {
            return Err(ClogError::format(directive, "requires a {name} argument"));
        }
        (_, Some(_)) if b"halutrsbBIUPD".contains(&letter) => {
            return Err(ClogError::format(directive, "does not take an argument"));
        }
        _ => return Err(ClogError::format(directive, "unknown directive")),
    }
    Ok(())
}

fn time_op(directive: &str, arg: &str) -> Result<Op> {
    let now = |precision| Op::TimeNow(elapsed(precision));
    match arg {
        "iso8601" => return Ok(Op::Special(Special::TimeIso8601)),
        "utc" => return Ok(Op::Special(Special::TimeUtcFixed)),
        "sec" => return Ok(now(0)),
        "msec" => return Ok(now(3)),
        "usec" => return Ok(now(6)),
        _ => {}
    }

    let mut anchor = TimeAnchor::End;
    let mut utc = false;
    let mut pattern = arg;
    loop {
        if let Some(rest) = pattern.strip_prefix("begin:") {
            anchor = TimeAnchor::Begin;
            pattern = rest;
        } else if let Some(rest) = pattern.strip_prefix("end:") {
            anchor = TimeAnchor::End;
            pattern = rest;
        } else if let Some(rest) = pattern.strip_prefix("utc:") {
            utc = true;
            pattern = rest;
        } else {
            break;
        }
    }
    if pattern.is_empty() {
        return Err(ClogError::format(directive, "empty time pattern"));
    }
    let tf = time_format(directive, pattern, anchor)?;
    Ok(if utc { Op::TimeUtc(tf) } else { Op::TimeLocal(tf) })
}

fn elapsed(precision: u8) -> SecondsFormat {
    // precision is a constant in range
    SecondsFormat::new(precision).unwrap_or(SecondsFormat {
        precision: 0,
        divisor: 1_000_000,
    })
}
