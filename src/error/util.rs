//! Utility functions for error handling
//!
//! Small wrappers around file access that attach the path and purpose to
//! the error, so configuration and ledger failures are traceable.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::{Result, StudyError};

/// Safely open a file with rich error information
///
/// # Arguments
/// * `path` - The path to the file to open
/// * `purpose` - Why the file is being opened (for error context)
pub fn safe_open_file(path: &Path, purpose: &str) -> Result<fs::File> {
    if !path.exists() {
        return Err(StudyError::io_with_path(
            io::Error::new(io::ErrorKind::NotFound, format!("file not found, needed for {purpose}")),
            path,
        ));
    }

    if !path.is_file() {
        return Err(StudyError::io_with_path(
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path is not a file, expected a file for {purpose}"),
            ),
            path,
        ));
    }

    fs::File::open(path).map_err(|e| {
        let context = match e.kind() {
            io::ErrorKind::PermissionDenied => "permission denied - check file permissions".to_string(),
            _ => format!("failed to open file for {purpose}"),
        };
        StudyError::io_with_path(io::Error::new(e.kind(), format!("{context}: {e}")), path)
    })
}

/// Safely read a file to string with rich error information
pub fn safe_read_to_string(path: &Path, purpose: &str) -> Result<String> {
    let mut file = safe_open_file(path, purpose)?;

    let mut content = String::new();
    match io::Read::read_to_string(&mut file, &mut content) {
        Ok(_) => Ok(content),
        Err(e) => {
            let context = match e.kind() {
                io::ErrorKind::InvalidData => {
                    "file contains invalid UTF-8 data - cannot read as text".to_string()
                }
                _ => format!("failed to read file content for {purpose}"),
            };
            Err(StudyError::io_with_path(
                io::Error::new(e.kind(), format!("{context}: {e}")),
                path,
            ))
        }
    }
}

/// Check if a directory exists, creating it when asked to
pub fn ensure_directory(path: &Path, purpose: &str) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    if path.exists() {
        return Err(StudyError::io_with_path(
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path is not a directory, expected a directory for {purpose}"),
            ),
            path,
        ));
    }
    fs::create_dir_all(path).map_err(|e| StudyError::io_with_path(e, path))
}

/// Replace `path` with `data` without ever exposing a partially written file
///
/// Data goes to a sibling temp file first and is then renamed over the
/// target, which is atomic on the same filesystem.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = path.to_path_buf();
    let tmp_name = format!(
        ".{}.{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("write"),
        std::process::id()
    );
    tmp.set_file_name(tmp_name);
    fs::write(&tmp, data).map_err(|e| StudyError::io_with_path(e, &tmp))?;
    fs::rename(&tmp, path).map_err(|e| StudyError::io_with_path(e, path))
}
