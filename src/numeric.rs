use chrono::{NaiveDate, NaiveDateTime};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref NUMBER_REGEX: Regex = Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?$").unwrap();
    static ref CURRENCY_SUFFIX_REGEX: Regex = Regex::new(r"(?i)\s*(đ|vnd|vnđ)$").unwrap();
}

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const ORDER_ID_FORMAT: &str = "%Y%m%d%H%M%S";

/// Parse a loosely-typed cell into a number.
///
/// Thousands separators and a trailing currency marker are removed; anything
/// that still isn't a number counts as 0.
pub fn parse_number(raw: &str) -> f64 {
    let trimmed = raw.trim();
    let without_currency = CURRENCY_SUFFIX_REGEX.replace(trimmed, "");
    let cleaned: String = without_currency
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();

    if !NUMBER_REGEX.is_match(&cleaned) {
        return 0.0;
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Sales timestamp, either `YYYY-MM-DD HH:MM:SS` or a bare date
pub fn parse_date_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT) {
        return Some(ts);
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M") {
        return Some(ts);
    }
    parse_date(raw).and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// `YYYY-MM-DD` or `DD/MM/YYYY`
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d/%m/%Y"))
        .ok()
}

/// Render a number for a cell: integral values carry no fraction
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// `12,000 đ`
pub fn format_currency(amount: f64) -> String {
    let rounded = amount.round() as i64;
    let digits = rounded.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if rounded < 0 {
        format!("-{} đ", grouped)
    } else {
        format!("{} đ", grouped)
    }
}
