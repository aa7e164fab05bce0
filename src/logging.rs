//! tracing-subscriber wiring for `init_logging`: a file appender plus a
//! stderr layer, both governed by `RUST_LOG`.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

/// Log output shape. `Pretty` is for interactive CLI use, `Json` for
/// production deployments feeding a log aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Must be kept alive for the lifetime of the process when logging to a
/// file; dropping it flushes and stops the background writer thread.
pub struct LoggingGuard(#[allow(dead_code)] Option<WorkerGuard>);

pub fn init_logging(
    log_file: Option<&Path>,
    format: LogFormat,
) -> anyhow::Result<LoggingGuard> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let (writer, guard) = match log_file {
        Some(p) => {
            if let Some(parent) = p.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .context("creating log directory")?;
                }
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(p)
                .with_context(|| format!("opening log file {p:?}"))?;
            let (nb, guard) = tracing_appender::non_blocking(file);
            (nb, Some(guard))
        }
        None => {
            let (nb, guard) = tracing_appender::non_blocking(std::io::stderr());
            (nb, Some(guard))
        }
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_span_events(FmtSpan::CLOSE);

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer.json())
                .init();
        }
    }

    Ok(LoggingGuard(guard))
}
