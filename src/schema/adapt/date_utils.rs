//! Module for handling date parsing and formatting.

use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};

use crate::schema::adapt::types::DateFormatConfig;

/// Parse a date string with multiple format attempts
///
/// Tries the configured formats in order, then pattern detection, then the
/// bare-digit forms survey respondents type into free date boxes.
#[must_use]
pub fn parse_date_string(s: &str, config: &DateFormatConfig) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    // Try all the provided formats
    for format in &config.date_formats {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Some(date);
        }
    }

    // Timestamps are accepted where a date is expected
    if let Some(datetime) = parse_datetime_only(s, config) {
        return Some(datetime.date());
    }

    // If enabled, try to detect the format based on string patterns
    if config.enable_format_detection {
        if let Some(detected_format) = detect_date_format(s) {
            if let Ok(date) = NaiveDate::parse_from_str(s, &detected_format) {
                return Some(date);
            }
        }
    }

    if config.enable_numeric_dates {
        return parse_numeric_date(s);
    }

    None
}

/// Parse a collection timestamp, falling back to midnight of a plain date
#[must_use]
pub fn parse_datetime_string(s: &str, config: &DateFormatConfig) -> Option<NaiveDateTime> {
    let s = s.trim();
    parse_datetime_only(s, config).or_else(|| {
        parse_date_string(s, config).and_then(|d| d.and_hms_opt(0, 0, 0))
    })
}

fn parse_datetime_only(s: &str, config: &DateFormatConfig) -> Option<NaiveDateTime> {
    config
        .datetime_formats
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
}

/// Try to detect the date format based on string patterns
#[must_use]
pub fn detect_date_format(s: &str) -> Option<String> {
    // Check for ISO-like format with dashes (YYYY-MM-DD)
    if s.len() == 10 && s.chars().nth(4) == Some('-') && s.chars().nth(7) == Some('-') {
        return Some("%Y-%m-%d".to_string());
    }

    // Check for slashes
    if s.contains('/') {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() == 3 {
            if parts[0].len() == 4 {
                return Some("%Y/%m/%d".to_string()); // YYYY/MM/DD
            } else if parts[2].len() == 4 {
                if let Ok(first_num) = parts[0].parse::<u8>() {
                    if first_num > 12 {
                        return Some("%d/%m/%Y".to_string()); // DD/MM/YYYY
                    }
                    // Respondents are US based
                    return Some("%m/%d/%Y".to_string());
                }
            } else if parts[2].len() == 2 {
                return Some("%m/%d/%y".to_string());
            }
        }
    }

    // Check for dots (DD.MM.YYYY)
    if s.contains('.') {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() == 3 && parts[2].len() == 4 {
            return Some("%d.%m.%Y".to_string());
        }
    }

    // Check for compact format (YYYYMMDD)
    if s.len() == 8 && s.starts_with(['1', '2']) && s.chars().all(|c| c.is_ascii_digit()) {
        return Some("%Y%m%d".to_string());
    }

    // No recognized format
    None
}

/// Interpret a 7 or 8 digit date typed without separators
///
/// Accepts `YYYYMMDD`, `MMDDYYYY` and `MDDYYYY`. A leading component above
/// 12 is taken as the day (`DDMMYYYY`).
#[must_use]
pub fn parse_numeric_date(s: &str) -> Option<NaiveDate> {
    if !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let num = |range: std::ops::Range<usize>| s.get(range)?.parse::<u32>().ok();

    match s.len() {
        8 => {
            let year_first = num(0..4)
                .zip(num(4..6))
                .zip(num(6..8))
                .and_then(|((y, m), d)| NaiveDate::from_ymd_opt(y as i32, m, d));
            if let Some(date) = year_first.filter(|d| (1900..2100).contains(&d.year())) {
                return Some(date);
            }
            let (first, second, year) = (num(0..2)?, num(2..4)?, num(4..8)?);
            month_day(first, second, year)
        }
        7 => {
            let (month, day, year) = (num(0..1)?, num(1..3)?, num(3..7)?);
            NaiveDate::from_ymd_opt(year as i32, month, day)
        }
        _ => None,
    }
}

fn month_day(first: u32, second: u32, year: u32) -> Option<NaiveDate> {
    if first > 12 {
        NaiveDate::from_ymd_opt(year as i32, second, first)
    } else {
        NaiveDate::from_ymd_opt(year as i32, first, second)
    }
}

/// Shift a date by whole calendar months
///
/// Days past the end of the target month are clamped to its last day
/// (Jan 31 + 1 month = Feb 28/29).
#[must_use]
pub fn add_months(date: NaiveDate, months: u32) -> Option<NaiveDate> {
    date.checked_add_months(Months::new(months))
}

/// Age in whole months at `at` for someone born on `birth`
///
/// A trailing partial month counts once it reaches 15 days.
#[must_use]
pub fn age_in_months(birth: NaiveDate, at: NaiveDate) -> i64 {
    let mut years = i64::from(at.year()) - i64::from(birth.year());
    let mut months = i64::from(at.month()) - i64::from(birth.month());
    let mut days = i64::from(at.day()) - i64::from(birth.day());

    if days < 0 {
        days += 30;
        months -= 1;
    }
    while months < 0 {
        months += 12;
        years -= 1;
    }
    if days >= 15 {
        months += 1;
    }
    years * 12 + months
}
