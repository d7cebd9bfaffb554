use bytes::Bytes;
use clogger_core::{
    AppError, ClogError, Env, Headers, LogWriter, MemoryWriter, Response, Status, keys,
};
use std::sync::Arc;

// =============================================================================
// Error Tests
// =============================================================================

#[test]
fn test_error_display() {
    let err = ClogError::format("%{x", "missing closing brace");
    assert_eq!(err.to_string(), "Format error in \"%{x\": missing closing brace");

    let err = ClogError::BadAppResponse(AppError::malformed("[200, {}]"));
    assert_eq!(err.to_string(), "app response not a 3 element response: [200, {}]");
}

#[test]
fn test_construction_errors_are_classified() {
    assert!(ClogError::Config("both".into()).is_construction_error());
    assert!(ClogError::ClockUnavailable.is_construction_error());
    assert!(!ClogError::Io(std::io::Error::other("x")).is_construction_error());
    assert!(!ClogError::BadAppResponse(AppError::malformed("x")).is_construction_error());
}

#[test]
fn test_bad_app_response_keeps_source() {
    use std::error::Error;
    let err = ClogError::BadAppResponse(AppError::malformed("two elements"));
    assert_eq!(err.source().unwrap().to_string(), "two elements");
}

// =============================================================================
// Headers Tests
// =============================================================================

#[test]
fn test_headers_lookup_before_and_after_normalize() {
    let mut headers = Headers::new()
        .with("Set-Cookie", "a=1")
        .with("Content-Length", "10")
        .with("set-cookie", "b=2");
    assert_eq!(headers.get("SET-COOKIE").unwrap().as_ref(), b"a=1");

    headers.normalize();
    assert!(headers.is_normalized());
    assert_eq!(headers.len(), 3);
    assert_eq!(headers.get("set-cookie").unwrap().as_ref(), b"a=1, b=2");
    assert_eq!(headers.get("content-length").unwrap().as_ref(), b"10");
    assert!(headers.get("etag").is_none());
}

// =============================================================================
// Response Tests
// =============================================================================

#[test]
fn test_response_collects_body() {
    let mut resp = Response::from_chunks(Status::from("201 Created"), Headers::new(), [
        Bytes::from_static(b"a"),
        Bytes::from_static(b"bc"),
    ]);
    assert_eq!(resp.status.coerce(), Some(201));
    assert_eq!(resp.collect_body().unwrap(), b"abc");
}

// =============================================================================
// Env Tests
// =============================================================================

#[test]
fn test_env_error_stream_slot() {
    let errors = Arc::new(MemoryWriter::new());
    let mut env = Env::new().with(keys::REQUEST_METHOD, "GET");
    env.set_errors(errors.clone());

    env.errors().unwrap().append(b"oops\n").unwrap();
    assert_eq!(errors.lines(), vec!["oops"]);

    let copy = env.clone();
    assert_eq!(copy.get(keys::REQUEST_METHOD).unwrap().as_ref(), b"GET");
    assert!(copy.errors().is_some());
}
