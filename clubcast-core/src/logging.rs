//! Process logging bootstrap.
//!
//! clubcast logs are line-oriented tracing events carrying structured fields
//! (`session`, `room`, `bucket`, ...) that the session and room loops attach
//! at each lifecycle step. The bootstrap installs one global subscriber:
//! compact text for terminals, flattened JSON when the logs are shipped.

use crate::config::{LogFormat, LoggingConfig};
use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when present; otherwise the configured filter directive
/// applies. Events go to stdout, or are appended to `file_path` when one is
/// configured.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(from_env) => from_env,
        Err(_) => EnvFilter::try_new(&config.filter)
            .with_context(|| format!("invalid log filter '{}'", config.filter))?,
    };

    let writer = match &config.file_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file '{}'", path.display()))?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_target(true)
                    .with_writer(writer),
            )
            .try_init()
            .context("logging already initialized")?,
        LogFormat::Text => registry
            .with(fmt::layer().compact().with_target(false).with_writer(writer))
            .try_init()
            .context("logging already initialized")?,
    }

    Ok(())
}
