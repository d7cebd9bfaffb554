//! Per-request cookie lookup, resolved at most once per request.

use bytes::Bytes;
use clogger_core::{CookieMap, Env, keys};
use percent_encoding::percent_decode;
use std::sync::Arc;

/// Memoized cookie map for the request being logged.
#[derive(Debug, Clone, Default)]
pub enum CookieCache {
    #[default]
    Unresolved,
    Present(Arc<CookieMap>),
    /// Resolution ran and found nothing; don't try again.
    Absent,
}

impl CookieCache {
    /// Look up `name`, resolving the map on first use.
    pub fn lookup(&mut self, env: &Env, name: &str) -> Option<&Bytes> {
        if matches!(self, CookieCache::Unresolved) {
            *self = resolve(env);
        }
        match self {
            CookieCache::Present(map) => map.get(name),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, CookieCache::Unresolved)
    }

    pub fn reset(&mut self) {
        *self = CookieCache::Unresolved;
    }
}

fn resolve(env: &Env) -> CookieCache {
    if let Some(map) = env.cookies() {
        return CookieCache::Present(Arc::clone(map));
    }
    match env.get(keys::HTTP_COOKIE) {
        Some(raw) => CookieCache::Present(Arc::new(parse_cookie_header(raw))),
        None => CookieCache::Absent,
    }
}

/// Parse a `Cookie:` header value. The first occurrence of a name wins and
/// both names and values are percent-decoded.
pub fn parse_cookie_header(raw: &[u8]) -> CookieMap {
    let mut map = CookieMap::new();
    for pair in raw.split(|&b| b == b';') {
        let pair = pair.trim_ascii();
        if pair.is_empty() {
            continue;
        }
        let (name, value) = match pair.iter().position(|&b| b == b'=') {
            Some(eq) => (&pair[..eq], &pair[eq + 1..]),
            None => (pair, &b""[..]),
        };
        let name = percent_decode(name.trim_ascii()).decode_utf8_lossy();
        if name.is_empty() || map.contains_key(&*name) {
            continue;
        }
        let value: Vec<u8> = percent_decode(value.trim_ascii()).collect();
        map.insert(name.into_owned(), Bytes::from(value));
    }
    map
}
