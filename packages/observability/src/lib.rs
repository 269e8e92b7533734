//! # Observability
//!
//! Logging setup shared by every telemetry delivery crate.
//!
//! Library code only ever uses the `tracing` macros. Whoever embeds the
//! delivery pipeline calls [`init_with_config`] once to decide where those
//! events end up:
//!
//! - an append-only JSONL file (one object per line, flushed per line) when
//!   [`LogConfig::log_path`] is set
//! - compact human-readable lines on stderr when [`LogConfig::also_stderr`]
//!   is set, or when no file is configured at all
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "embrace-delivery".into(),
//!     default_level: "debug".into(),
//!     log_path: Some("/tmp/delivery.jsonl".into()),
//!     also_stderr: false,
//! });
//! tracing::info!(endpoint = "sessions", "payload delivered");
//! ```
//!
//! The level filter honours `RUST_LOG` and falls back to
//! [`LogConfig::default_level`].

mod file_sink;
mod json_layer;

pub use file_sink::{JsonlFileWriter, JsonlMakeWriter};
pub use json_layer::{JsonLayer, LogEntry};

use std::io;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name written into every JSONL entry.
    pub service_name: String,

    /// Filter used when `RUST_LOG` is unset (e.g. "info", "debug").
    pub default_level: String,

    /// JSONL destination. `None` disables the file layer.
    pub log_path: Option<PathBuf>,

    /// Mirror events to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize logging with defaults for the given service name.
pub fn init(service_name: &str) -> bool {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Install the global subscriber described by `config`.
///
/// Returns `false` when a global subscriber was already installed; the
/// existing one keeps running untouched. A log file that cannot be opened
/// downgrades to stderr output instead of failing.
pub fn init_with_config(config: LogConfig) -> bool {
    let mut open_error = None;
    let file_layer = match config.log_path.as_ref() {
        Some(path) => match JsonlFileWriter::open(path) {
            Ok(writer) => Some(
                JsonLayer::new(config.service_name.clone(), JsonlMakeWriter::new(writer))
                    .with_filter(env_filter(&config.default_level)),
            ),
            Err(err) => {
                open_error = Some((path.clone(), err));
                None
            }
        },
        None => None,
    };

    let wants_stderr = config.also_stderr || file_layer.is_none();
    let stderr_layer = wants_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    let installed = tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if let Some((path, err)) = open_error {
        tracing::warn!(
            log_path = %path.display(),
            error = %err,
            "Could not open log file, logging to stderr only"
        );
    }
    if installed {
        tracing::debug!(service = %config.service_name, "Logging initialized");
    }
    installed
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

pub use tracing::{debug, error, info, trace, warn, Level};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(!config.also_stderr);
    }

    #[test]
    fn test_second_init_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("first.jsonl");

        let first = init_with_config(LogConfig {
            service_name: "first".into(),
            log_path: Some(path.clone()),
            ..Default::default()
        });
        let second = init("second");

        assert!(first);
        assert!(!second);
        assert!(path.exists());
    }
}
