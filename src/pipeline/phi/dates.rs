use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

/// Accepted input layouts, tried in order. First successful parse wins.
const DATE_FORMATS: &[&str] = &[
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%Y-%m-%d",
    "%d-%m-%Y",
    "%d/%m/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
];

/// Layout used for every date written to a billing row.
pub const OUTPUT_DATE_FORMAT: &str = "%d-%m-%Y";

static CLOCK_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,2}:\d{2}").expect("valid regex"));

/// Parse a date string against the accepted layouts.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
}

/// Render a date as `DD-MM-YYYY`, or return the input verbatim (trimmed)
/// when no layout matches.
pub fn format_date(value: &str) -> String {
    match parse_date(value) {
        Some(date) => date.format(OUTPUT_DATE_FORMAT).to_string(),
        None => value.trim().to_string(),
    }
}

/// Split a "Date and Time" value into a formatted date and a raw time part.
///
/// The split happens at the first clock token (`H:MM`), so long-form dates
/// such as "March 14, 2024 10:00 AM" survive intact. Without a clock token
/// the value is split at its first space. The time part may be empty.
pub fn split_date_time(value: &str) -> (String, String) {
    let value = value.trim();

    if let Some(m) = CLOCK_TOKEN.find(value) {
        if m.start() > 0 {
            let (date, time) = value.split_at(m.start());
            return (format_date(date), time.trim().to_string());
        }
    }

    match value.split_once(' ') {
        Some((date, time)) => (format_date(date), time.trim().to_string()),
        None => (format_date(value), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_us_slash_date() {
        assert_eq!(format_date("03/14/2024"), "14-03-2024");
    }

    #[test]
    fn formats_iso_date() {
        assert_eq!(format_date("2024-03-14"), "14-03-2024");
    }

    #[test]
    fn month_first_wins_when_ambiguous() {
        // 04/05 parses as April 5th because %m/%d/%Y is tried first
        assert_eq!(format_date("04/05/2024"), "05-04-2024");
    }

    #[test]
    fn day_first_used_when_month_first_fails() {
        assert_eq!(format_date("25/12/2023"), "25-12-2023");
    }

    #[test]
    fn formats_long_month_names() {
        assert_eq!(format_date("March 14, 2024"), "14-03-2024");
        assert_eq!(format_date("Mar 14, 2024"), "14-03-2024");
    }

    #[test]
    fn unparseable_passes_through() {
        assert_eq!(format_date("  sometime last spring "), "sometime last spring");
    }

    #[test]
    fn split_numeric_date_and_time() {
        let (date, time) = split_date_time("03/14/2024 10:00 AM");
        assert_eq!(date, "14-03-2024");
        assert_eq!(time, "10:00 AM");
    }

    #[test]
    fn split_long_form_date_and_time() {
        let (date, time) = split_date_time("March 14, 2024 10:00 AM");
        assert_eq!(date, "14-03-2024");
        assert_eq!(time, "10:00 AM");
    }

    #[test]
    fn split_without_time() {
        let (date, time) = split_date_time("03/14/2024");
        assert_eq!(date, "14-03-2024");
        assert!(time.is_empty());
    }

    #[test]
    fn split_falls_back_to_first_space() {
        let (date, time) = split_date_time("2024-03-14 morning");
        assert_eq!(date, "14-03-2024");
        assert_eq!(time, "morning");
    }
}
