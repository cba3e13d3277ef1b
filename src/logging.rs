use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LogConfig;

/// Install the global subscriber. `RUST_LOG` wins over the configured filter.
///
/// When logging to a file the returned guard must be held until exit so
/// buffered lines get flushed.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&config.filter))
    .map_err(|e| eyre!("Invalid log filter '{}': {}", config.filter, e))?;

  let registry = tracing_subscriber::registry().with(filter);

  match &config.file {
    Some(path) => {
      let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => std::path::Path::new("."),
      };
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Log file path has no file name: {}", path.display()))?;
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

      let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(
        dir, file_name,
      ));
      registry
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .map_err(|e| eyre!("Failed to init logging: {}", e))?;
      Ok(Some(guard))
    }
    None => {
      registry
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| eyre!("Failed to init logging: {}", e))?;
      Ok(None)
    }
  }
}
