//! Core types for value adaptation.

use serde::{Deserialize, Serialize};

/// Configuration for date format handling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DateFormatConfig {
    /// List of date format strings to try when parsing dates
    pub date_formats: Vec<String>,
    /// Date-time formats tried for timestamp columns
    pub datetime_formats: Vec<String>,
    /// Default date format to use when converting dates to strings
    pub default_format: String,
    /// Enable heuristic format detection
    pub enable_format_detection: bool,
    /// Interpret bare 7/8 digit responses (`6062000`, `20000606`)
    pub enable_numeric_dates: bool,
}

impl Default for DateFormatConfig {
    fn default() -> Self {
        Self {
            date_formats: vec![
                "%Y-%m-%d".to_string(), // ISO format: 2023-01-15
                "%m/%d/%Y".to_string(), // US: 01/15/2023
                "%m-%d-%Y".to_string(), // US with dashes: 01-15-2023
                "%Y/%m/%d".to_string(), // 2023/01/15
                "%d %b %Y".to_string(), // 15 Jan 2023
                "%B %d %Y".to_string(), // January 15 2023
                "%B %d, %Y".to_string(), // January 15, 2023
            ],
            datetime_formats: vec![
                "%Y-%m-%d %H:%M:%S".to_string(),
                "%Y-%m-%dT%H:%M:%S".to_string(),
                "%Y-%m-%d %H:%M".to_string(),
                "%m/%d/%Y %H:%M".to_string(),
                "%m/%d/%Y %H:%M:%S".to_string(),
            ],
            default_format: "%Y-%m-%d".to_string(),
            enable_format_detection: true,
            enable_numeric_dates: true,
        }
    }
}
