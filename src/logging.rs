//! Tracing subscriber setup
//!
//! Events go to a rolling file under `log_dir` (JSON or text) and, in text
//! mode, to stdout as well. Every orchestrator operation runs in an
//! `#[instrument]` span; its close event carries the busy and idle time, so
//! lock waits show up in the log without extra timing code.

use anyhow::{Context, bail};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;

/// Map the `rotation` config value to an appender rotation
fn rotation(name: &str) -> anyhow::Result<Rotation> {
    match name.to_ascii_lowercase().as_str() {
        "minutely" => Ok(Rotation::MINUTELY),
        "hourly" => Ok(Rotation::HOURLY),
        "daily" => Ok(Rotation::DAILY),
        "never" | "" => Ok(Rotation::NEVER),
        other => bail!("unknown log rotation `{}`", other),
    }
}

/// Default filter directives. sqlx logs every statement at info, which
/// drowns the transfer events under load.
fn directives(config: &AppConfig) -> String {
    format!("{},sqlx=warn", config.log_level)
}

/// `RUST_LOG` wins over the configured level when set
fn build_filter(config: &AppConfig) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(directives(config))
            .with_context(|| format!("Invalid log_level `{}`", config.log_level)),
    }
}

/// Install the global subscriber. Keep the returned guard alive for the
/// whole process or buffered file output is lost.
pub fn init_logging(config: &AppConfig) -> anyhow::Result<WorkerGuard> {
    let appender = RollingFileAppender::builder()
        .rotation(rotation(&config.rotation)?)
        .filename_prefix(&config.log_file)
        .build(&config.log_dir)
        .with_context(|| format!("Failed to open log directory {}", config.log_dir))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let registry = tracing_subscriber::registry().with(build_filter(config)?);

    if config.use_json {
        let file_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(writer)
            .with_ansi(false);
        registry
            .with(file_layer)
            .try_init()
            .context("Global subscriber already set")?;
    } else {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(writer)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).compact();
        registry
            .with(file_layer)
            .with(stdout_layer)
            .try_init()
            .context("Global subscriber already set")?;
    }

    Ok(guard)
}
