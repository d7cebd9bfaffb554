//! The access-logging middleware.

use crate::body::{LoggedBody, StateHandle};
use crate::eval::Evaluator;
use crate::format::{CompileOptions, compile, presets};
use crate::program::Program;
use crate::render::{LogState, RequestContext, ResponseContext, StatePool};
use crate::sink::Sink;
use crate::timing::{Clock, RequestStart};
use clogger_core::{
    App, AppError, ClogError, Empty, Env, Headers, LogWriter, LoggerConfig, Response, Result,
    Status, Syntax,
};
use std::fmt;
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, warn};

/// Runtime options: the serializable [`LoggerConfig`] fields plus the
/// objects that can't come from a file.
#[derive(Clone)]
pub struct Options {
    pub format: String,
    pub syntax: Syntax,
    pub path: Option<PathBuf>,
    pub reentrant: Option<bool>,
    pub append_newline: bool,
    /// Logger object. Mutually exclusive with `path`; when neither is set
    /// lines go to the request's error stream.
    pub logger: Option<Arc<dyn LogWriter>>,
    pub evaluator: Option<Arc<dyn Evaluator>>,
}

impl Default for Options {
    fn default() -> Self {
        LoggerConfig::default().into()
    }
}

impl From<LoggerConfig> for Options {
    fn from(cfg: LoggerConfig) -> Self {
        Self {
            format: cfg.format,
            syntax: cfg.syntax,
            path: cfg.path,
            reentrant: cfg.reentrant,
            append_newline: cfg.append_newline,
            logger: None,
            evaluator: None,
        }
    }
}

impl Options {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            ..Self::default()
        }
    }

    pub fn syntax(mut self, syntax: Syntax) -> Self {
        self.syntax = syntax;
        self
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn logger(mut self, logger: Arc<dyn LogWriter>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn reentrant(mut self, reentrant: bool) -> Self {
        self.reentrant = Some(reentrant);
        self
    }

    pub fn append_newline(mut self, append: bool) -> Self {
        self.append_newline = append;
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }
}

/// Read-only pieces shared by a logger, its clones and every body it wraps.
pub(crate) struct Inner {
    pub(crate) program: Program,
    pub(crate) sink: Sink,
    pub(crate) evaluator: Option<Arc<dyn Evaluator>>,
    pub(crate) clock: Clock,
    pub(crate) pool: StatePool,
}

/// Wraps an [`App`] and writes one access log line per request.
///
/// Lines logged from `call` and reentrant bodies render into pooled state,
/// so a slow sink never holds up other requests. `state` only backs bodies
/// of a logger forced non-reentrant.
pub struct Clogger {
    app: Arc<dyn App>,
    inner: Arc<Inner>,
    state: Arc<Mutex<LogState>>,
    reentrant: Option<bool>,
    detected: Arc<OnceLock<bool>>,
}

impl Clogger {
    pub fn new(app: impl App + 'static, options: Options) -> Result<Self> {
        let Options {
            format,
            syntax,
            path,
            reentrant,
            append_newline,
            logger,
            evaluator,
        } = options;

        let sink = match (logger, path) {
            (Some(_), Some(_)) => {
                return Err(ClogError::Config(
                    "logger and path are mutually exclusive".into(),
                ));
            }
            (Some(logger), None) => Sink::for_writer(logger)?,
            (None, Some(path)) => Sink::for_path(&path)?,
            (None, None) => Sink::Ambient,
        };

        let format = presets::resolve(&format, syntax);
        let program = compile(
            format,
            &CompileOptions {
                syntax,
                append_newline,
            },
        )?;
        if program.uses_eval() && evaluator.is_none() {
            warn!(format, "format uses eval directives but no evaluator is installed");
        }
        let clock = Clock::detect()?;

        let state = LogState::new(&program);
        Ok(Self {
            app: Arc::new(app),
            inner: Arc::new(Inner {
                program,
                sink,
                evaluator,
                clock,
                pool: StatePool::new(),
            }),
            state: Arc::new(Mutex::new(state)),
            reentrant,
            detected: Arc::new(OnceLock::new()),
        })
    }

    /// Run the request through the wrapped app.
    ///
    /// Responses that need byte counting come back with their body wrapped;
    /// the line is written when that body is closed (or dropped). Everything
    /// else is logged before this returns.
    pub fn call(&self, mut env: Env) -> Result<Response> {
        let start = RequestStart::now(&self.inner.clock);
        let reentrant = self.resolve_reentrant(&env);

        let mut resp = match self.app.call(&mut env) {
            Ok(resp) => resp,
            Err(e) => {
                self.log_now(&env, start, &Status::Code(500), &Headers::new())?;
                return Err(ClogError::BadAppResponse(e));
            }
        };

        let program = &self.inner.program;
        if program.needs_response_headers() {
            resp.headers.normalize();
        }
        if !program.needs_body_wrap() {
            self.log_now(&env, start, &resp.status, &resp.headers)?;
            return Ok(resp);
        }

        let state = if reentrant {
            StateHandle::Owned(Box::new(self.private_state()))
        } else {
            StateHandle::Shared(Arc::clone(&self.state))
        };
        let body = std::mem::replace(&mut resp.body, Box::new(Empty));
        let status = resp.status.clone();
        let headers = resp.headers.clone();
        resp.body = Box::new(LoggedBody::new(
            body,
            state,
            Arc::clone(&self.inner),
            env,
            start,
            status,
            headers,
        ));
        Ok(resp)
    }

    /// A logger sharing this one's app, program and sink but owning its own
    /// render state.
    pub fn clone_for_request(&self) -> Self {
        Self {
            app: Arc::clone(&self.app),
            inner: Arc::clone(&self.inner),
            state: Arc::new(Mutex::new(self.private_state())),
            reentrant: self.reentrant,
            detected: Arc::clone(&self.detected),
        }
    }

    /// Whether responses get their body wrapped for byte counting.
    pub fn wrap_body(&self) -> bool {
        self.inner.program.needs_body_wrap()
    }

    /// Configured mode, or the detected one once a request has been seen.
    pub fn reentrant(&self) -> Option<bool> {
        self.reentrant.or_else(|| self.detected.get().copied())
    }

    /// Descriptor the logger writes to directly, if any.
    pub fn fileno(&self) -> Option<RawFd> {
        self.inner.sink.fileno()
    }

    pub fn program(&self) -> &Program {
        &self.inner.program
    }

    fn resolve_reentrant(&self, env: &Env) -> bool {
        if let Some(reentrant) = self.reentrant {
            return reentrant;
        }
        *self.detected.get_or_init(|| {
            let reentrant = env.multithread().unwrap_or(false);
            debug!(reentrant, "reentrancy auto-detected from host");
            reentrant
        })
    }

    fn private_state(&self) -> LogState {
        self.inner.pool.checkout(&self.inner.program)
    }

    fn log_now(&self, env: &Env, start: RequestStart, status: &Status, headers: &Headers) -> Result<()> {
        let inner = &self.inner;
        let req = RequestContext {
            env,
            start,
            clock: inner.clock,
            evaluator: inner.evaluator.as_deref(),
        };
        let resp = ResponseContext { status, headers };
        let mut state = inner.pool.checkout(&inner.program);
        let written = inner.sink.write(env, state.render(&inner.program, &req, &resp));
        inner.pool.checkin(state);
        written?;
        Ok(())
    }
}

/// Loggers nest: a `Clogger` is itself an app.
impl App for Clogger {
    fn call(&self, env: &mut Env) -> std::result::Result<Response, AppError> {
        Clogger::call(self, env.clone()).map_err(|e| AppError::Failed(Box::new(e)))
    }
}

impl fmt::Debug for Clogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clogger")
            .field("program", &self.inner.program)
            .field("fileno", &self.fileno())
            .field("reentrant", &self.reentrant())
            .finish_non_exhaustive()
    }
}
