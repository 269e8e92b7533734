//! Logging initialization for embedders of the delivery pipeline.

use crate::Paths;
use std::path::PathBuf;

/// Environment variable naming the JSONL log file.
pub const LOG_FILE_ENV: &str = "EMBRACE_DELIVERY_LOG_FILE";
/// Environment variable enabling stderr output ("1" or "true").
pub const LOG_STDERR_ENV: &str = "EMBRACE_DELIVERY_LOG_STDERR";

/// Service name written into every log line.
const SERVICE_NAME: &str = "embrace-delivery";

/// Initialize logging at `level`.
///
/// The JSONL file is taken from `EMBRACE_DELIVERY_LOG_FILE`, falling back to
/// `paths.log_file()` when `paths` is given. Calling this after a subscriber
/// is installed does nothing and returns `false`.
pub fn init_logging(level: &str, paths: Option<&Paths>) -> bool {
    let log_path = std::env::var(LOG_FILE_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| paths.map(Paths::log_file));
    let also_stderr = std::env::var(LOG_STDERR_ENV)
        .map(|v| is_truthy(&v))
        .unwrap_or(false);

    observability::init_with_config(observability::LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: level.into(),
        log_path,
        also_stderr,
    })
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
