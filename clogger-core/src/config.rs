use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Serializable logger settings.
///
/// The runtime-only pieces (a logger object, an eval hook) cannot come from a
/// file; they are attached by the engine's `Options`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// A format string, or the name of a preset (`common`, `combined`,
    /// `nginx_combined`, `rack_1_0`).
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub syntax: Syntax,
    /// Append-mode log file. Mutually exclusive with a logger object.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// `None` → decide from the host's concurrency flag on first request.
    #[serde(default)]
    pub reentrant: Option<bool>,
    /// Terminate every record with a newline unless the format already does.
    #[serde(default = "default_true")]
    pub append_newline: bool,
}

/// Directive grammar of a format string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Syntax {
    /// `%h %r %>s %b` style.
    #[default]
    Apache,
    /// `$remote_addr $request $status` style.
    Nginx,
}

// ── Defaults ──────────────────────────────────────────────────

fn default_format() -> String { "combined".into() }
fn default_true() -> bool { true }

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            syntax: Syntax::default(),
            path: None,
            reentrant: None,
            append_newline: true,
        }
    }
}

impl LoggerConfig {
    /// Load configuration from YAML file + env overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config: LoggerConfig = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("CLOGGER_"))
            .extract()?;
        Ok(config)
    }
}
