//! Tracing setup for the `pm` binary and anything embedding the engine.
//!
//! Events go to stderr (pretty or JSON lines) and, when configured, are
//! mirrored to an append-only log file in the same format without colour.
//! `RUST_LOG` wins over the configured level.
//!
//! Spans opened through [`pm_span!`](crate::pm_span) use these field names:
//! `run_id`, `session_id`, `space_id`, `bill_id` and `question_count`.
//! Answers are opinions, so estimates and scores are only emitted at `debug`.

pub use crate::config::LogFormat;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

static INSTALLED: AtomicBool = AtomicBool::new(false);

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// `[logging]` table of `pm.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive, usually a bare level such as `info`.
    pub level: String,
    pub format: LogFormat,
    /// Mirror events into this file as well as stderr.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn.as_str().to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("failed to create log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("failed to install tracing subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the process-wide subscriber described by `config`.
///
/// Only the first successful call has an effect; later calls report
/// [`LogError::AlreadyInitialized`].
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if is_logging_initialized() {
        return Err(LogError::AlreadyInitialized);
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let mut layers: Vec<BoxedLayer> = vec![stderr_layer(config.format)];
    if let Some(path) = &config.file {
        layers.push(file_layer(config.format, append_to(path)?));
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()?;
    INSTALLED.store(true, Ordering::SeqCst);

    tracing::debug!(
        level = %config.level,
        format = %config.format,
        file = ?config.file,
        "tracing installed"
    );
    Ok(())
}

pub fn is_logging_initialized() -> bool {
    INSTALLED.load(Ordering::SeqCst)
}

fn stderr_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .with_ansi(true)
            .boxed(),
        LogFormat::Json => json_layer().with_writer(io::stderr).boxed(),
    }
}

fn file_layer(format: LogFormat, file: File) -> BoxedLayer {
    let file = Arc::new(file);
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(file)
            .with_target(true)
            .with_ansi(false)
            .boxed(),
        LogFormat::Json => json_layer().with_writer(file).boxed(),
    }
}

/// One flat JSON object per event, tagged with the innermost span's fields.
fn json_layer<S>() -> fmt::Layer<
    S,
    fmt::format::JsonFields,
    fmt::format::Format<fmt::format::Json, SystemTime>,
> {
    fmt::layer()
        .json()
        .with_timer(SystemTime)
        .with_target(true)
        .with_current_span(true)
        .with_span_list(false)
        .flatten_event(true)
}

fn append_to(path: &Path) -> io::Result<File> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)?,
        _ => {}
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// `info`-level span for engine operations.
///
/// ```ignore
/// let span = polimatch_core::pm_span!("service_answer", session_id = %id);
/// let _entered = span.enter();
/// ```
#[macro_export]
macro_rules! pm_span {
    ($name:expr $(, $($field:tt)+)?) => {
        tracing::info_span!($name $(, $($field)+)?)
    };
}

/// Level names accepted in `pm.toml` and produced by `-v` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    const NAMES: [(Self, &'static str); 5] = [
        (Self::Trace, "trace"),
        (Self::Debug, "debug"),
        (Self::Info, "info"),
        (Self::Warn, "warn"),
        (Self::Error, "error"),
    ];

    /// Each `-v` lowers the threshold one step from `warn`, bottoming out at `trace`.
    #[must_use]
    pub fn from_verbosity(count: u8) -> Self {
        let warn = Self::Warn as usize;
        let index = warn.saturating_sub(usize::from(count));
        Self::NAMES[index].0
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        Self::NAMES[self as usize].1
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        let wanted = if wanted == "warning" { "warn" } else { wanted.as_str() };
        Self::NAMES
            .iter()
            .find(|(_, name)| *name == wanted)
            .map(|(level, _)| *level)
            .ok_or_else(|| {
                format!("unknown log level `{s}` (use trace, debug, info, warn or error)")
            })
    }
}
