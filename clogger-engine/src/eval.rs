//! Host-side evaluation of `%{EXPR}E` / `$e{EXPR}` directives.

use clogger_core::Env;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("unknown expression: {0}")]
    Unknown(String),

    #[error("evaluation failed: {0}")]
    Failed(String),
}

/// Evaluates an embedded expression in the host environment.
///
/// Errors never reach the request path: the directive renders as `-`.
pub trait Evaluator: Send + Sync {
    fn eval(&self, expr: &str, env: &Env) -> Result<String, EvalError>;
}

impl<F> Evaluator for F
where
    F: Fn(&str, &Env) -> Result<String, EvalError> + Send + Sync,
{
    fn eval(&self, expr: &str, env: &Env) -> Result<String, EvalError> {
        self(expr, env)
    }
}

/// A small evaluator covering process-level values.
///
/// `pid`, `thread` (current thread name or id) and `env.KEY` (a lossy view of
/// a request variable).
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEvaluator;

impl Evaluator for ProcessEvaluator {
    fn eval(&self, expr: &str, env: &Env) -> Result<String, EvalError> {
        match expr.trim() {
            "pid" => Ok(std::process::id().to_string()),
            "thread" => {
                let current = std::thread::current();
                Ok(current
                    .name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{:?}", current.id())))
            }
            other => match other.strip_prefix("env.") {
                Some(key) => env
                    .get(key)
                    .map(|v| String::from_utf8_lossy(v).into_owned())
                    .ok_or_else(|| EvalError::Failed(format!("{key} is not set"))),
                None => Err(EvalError::Unknown(other.to_string())),
            },
        }
    }
}
