//! Byte-level escaping for untrusted values.
//!
//! Quotes, control bytes and anything outside printable ASCII become `\xHH`
//! with uppercase hex digits, so a value can never break out of its field or
//! span more than one line.

use std::borrow::Cow;

const HEX: &[u8; 16] = b"0123456789ABCDEF";

#[inline]
pub fn needs_escape(b: u8) -> bool {
    b == b'\'' || b == b'"' || b <= 0x1f || b >= 0x7f
}

/// Escape `src`. Returns the input unchanged (borrowed, no allocation) when no
/// byte needs escaping.
pub fn escape(src: &[u8]) -> Cow<'_, [u8]> {
    let extra = src.iter().filter(|&&b| needs_escape(b)).count();
    if extra == 0 {
        return Cow::Borrowed(src);
    }
    let mut out = Vec::with_capacity(src.len() + 3 * extra);
    push_escaped(&mut out, src);
    Cow::Owned(out)
}

/// Append `src` to `dst`, escaping as needed.
pub fn escape_into(dst: &mut Vec<u8>, src: &[u8]) {
    if !src.iter().any(|&b| needs_escape(b)) {
        dst.extend_from_slice(src);
        return;
    }
    push_escaped(dst, src);
}

fn push_escaped(dst: &mut Vec<u8>, src: &[u8]) {
    let mut rest = src;
    while let Some(pos) = rest.iter().position(|&b| needs_escape(b)) {
        dst.extend_from_slice(&rest[..pos]);
        let b = rest[pos];
        dst.extend_from_slice(&[b'\\', b'x', HEX[(b >> 4) as usize], HEX[(b & 0xf) as usize]]);
        rest = &rest[pos + 1..];
    }
    dst.extend_from_slice(rest);
}
