pub mod config;
pub mod env;
pub mod error;
pub mod headers;
pub mod response;
pub mod writer;

pub use config::{LoggerConfig, Syntax};
pub use env::{CookieMap, Env, keys};
pub use error::{AppError, ClogError, Result};
pub use headers::Headers;
pub use response::{App, Body, Empty, Response, Status};
pub use writer::{LogWriter, MemoryWriter, StderrWriter, TracingWriter};
