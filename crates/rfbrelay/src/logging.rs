//! Process-wide `tracing` subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::error::{Result, ServerError};

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `level` (default `info`) applies.
pub fn init(level: Option<&str>, json: bool) -> Result<()> {
    let filter = filter(level)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_writer(std::io::stderr);
    let installed = if json {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|error| ServerError::Logging {
        message: error.to_string(),
    })
}

fn filter(level: Option<&str>) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = level.unwrap_or("info");
    EnvFilter::try_new(directive)
        .map_err(|error| ServerError::invalid(format!("log level {directive:?}: {error}")))
}
