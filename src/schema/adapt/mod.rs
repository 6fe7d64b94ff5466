//! Value adaptation shared by the normalizer and the mapper.

pub mod date_utils;
pub mod types;

// Re-export the main types and functions for easier access
pub use date_utils::{
    add_months, age_in_months, detect_date_format, parse_date_string, parse_datetime_string,
    parse_numeric_date,
};
pub use types::DateFormatConfig;
