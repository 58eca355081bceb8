//! Structured logging setup.
//!
//! Console output goes to stderr, human-readable or JSON depending on configuration; an
//! optional JSON file layer is added when a log directory is configured.
//! `RUST_LOG` overrides the default `info` filter.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSection};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn env_filter(verbose: bool) -> EnvFilter {
    let fallback = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Install the global subscriber. The returned guard must be held for the
/// lifetime of the process so buffered file output gets flushed.
pub fn init(settings: &LoggingSection, verbose: bool) -> Result<Option<WorkerGuard>> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    let console: BoxedLayer = match settings.format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(env_filter(verbose))
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(false)
            .with_filter(env_filter(verbose))
            .boxed(),
    };
    layers.push(console);

    let mut guard = None;
    if let Some(dir) = &settings.directory {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        let appender = tracing_appender::rolling::daily(dir, "devagent.log");
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(env_filter(verbose))
                .boxed(),
        );
        guard = Some(file_guard);
    }

    if tracing_subscriber::registry().with(layers).try_init().is_err() {
        tracing::debug!("global tracing subscriber already installed");
    }

    Ok(guard)
}
