//! Logging setup for linkbroker using tracing.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize console logging and, when configured, a daily-rolling file.
///
/// `RUST_LOG` wins over the configured level. Keep the returned guard alive
/// for as long as file logging should be flushed.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::Logging(format!("Invalid log filter '{}': {}", config.level, e)))?;

    let mut layers: Vec<BoxedLayer> = Vec::new();

    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
    if config.json {
        layers.push(console_layer.json().boxed());
    } else {
        layers.push(console_layer.with_ansi(true).boxed());
    }

    let mut guard = None;
    let mut log_dir = None;
    if config.file {
        let dir = match &config.log_dir {
            Some(dir) => dir.clone(),
            None => get_log_dir()?,
        };
        std::fs::create_dir_all(&dir)?;

        let file_appender = tracing_appender::rolling::daily(&dir, "linkbroker.log");
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        if config.json {
            layers.push(file_layer.json().boxed());
        } else {
            layers.push(file_layer.boxed());
        }

        guard = Some(file_guard);
        log_dir = Some(dir);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    if let Some(dir) = log_dir {
        tracing::info!("Log directory: {}", dir.display());
    }

    Ok(guard)
}

/// Get the default log directory path.
fn get_log_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("com", "linkbroker", "linkbroker")
        .ok_or_else(|| Error::Logging("Could not determine home directory".to_string()))?;

    Ok(dirs.data_dir().join("logs"))
}
