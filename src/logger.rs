//! Diagnostics for the bridge.
//!
//! stdout carries the streamed answer, so log lines never go there: they
//! are written to stderr, or appended to `[bridge] log_file` when set.
//! [`init`] installs the global subscriber once, after config is resolved.

use std::fs::OpenOptions;
use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::error::AppError;

/// Install the global subscriber.
///
/// `level` is a level name or a full filter directive such as
/// `"ragflow_bridge=trace,reqwest=warn"`. A `-v` flag on the command line
/// sets `prefer_level`, which puts `level` ahead of `RUST_LOG`; otherwise
/// `RUST_LOG` wins and the configured level is the fallback.
pub fn init(level: &str, prefer_level: bool, log_file: Option<&Path>) -> Result<(), AppError> {
    let filter = build_filter(level, prefer_level)?;
    let writer = make_writer(log_file)?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))
}

fn build_filter(level: &str, prefer_level: bool) -> Result<EnvFilter, AppError> {
    if !prefer_level {
        return EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .map_err(|e| AppError::Logger(format!("invalid log level '{level}': {e}")));
    }
    EnvFilter::try_new(level).or_else(|level_err| {
        EnvFilter::try_from_default_env().map_err(|env_err| {
            AppError::Logger(format!(
                "invalid log level '{level}': {level_err}; RUST_LOG parse failed: {env_err}"
            ))
        })
    })
}

/// stderr, or `log_file` opened for append so restarts keep earlier runs.
fn make_writer(log_file: Option<&Path>) -> Result<BoxMakeWriter, AppError> {
    let Some(path) = log_file else {
        return Ok(BoxMakeWriter::new(std::io::stderr));
    };
    let file = OpenOptions::new().create(true).append(true).open(path).map_err(|e| {
        AppError::Logger(format!("failed to open log file '{}': {e}", path.display()))
    })?;
    Ok(BoxMakeWriter::new(file))
}

/// Check a bare level name (`error` … `trace`, or `off`).
pub fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}
