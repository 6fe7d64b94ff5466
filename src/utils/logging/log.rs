//! Logging utilities
//!
//! Standardized messages for file operations and accumulated failures.

use std::fmt::Display;
use std::path::Path;
use std::time::Duration;

/// Log the start of a file operation
pub fn log_operation_start(operation: &str, path: &Path) {
    log::info!("{} {}", operation, path.display());
}

/// Log the completion of a file operation
///
/// # Arguments
/// * `operation` - Past-tense verb, e.g. "read" or "wrote"
/// * `path` - File operated on
/// * `items` - Number of rows handled
/// * `elapsed` - Optional elapsed time
pub fn log_operation_complete(operation: &str, path: &Path, items: usize, elapsed: Option<Duration>) {
    match elapsed {
        Some(duration) => log::info!(
            "Successfully {operation} {items} rows at {} in {duration:?}",
            path.display()
        ),
        None => log::info!("Successfully {operation} {items} rows at {}", path.display()),
    }
}

/// Log a warning, optionally tied to a path
pub fn log_warning(message: &str, path: Option<&Path>) {
    if let Some(path) = path {
        log::warn!("{}: {}", message, path.display());
    } else {
        log::warn!("{message}");
    }
}

/// Log accumulated non-fatal failures, listing at most `limit` of them
///
/// The full list stays with the caller; this only keeps the log readable.
pub fn log_failures<T: Display>(what: &str, failures: &[T], limit: usize) {
    if failures.is_empty() {
        return;
    }
    log::warn!("{} {what}", failures.len());
    for failure in failures.iter().take(limit) {
        log::warn!("  {failure}");
    }
    if failures.len() > limit {
        log::warn!("  ... and {} more", failures.len() - limit);
    }
}
