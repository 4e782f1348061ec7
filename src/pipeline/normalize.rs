//! De-identification of extracted note text.
//!
//! Drops every line that carries a name label, a date or clock token, a
//! facility keyword, or a licensing/URL/pagination footer. What survives is
//! the clinical narrative the model stages work on.

use std::sync::LazyLock;

use regex::Regex;

static LINE_FILTERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        // Name labels
        Regex::new(r"(?i)(?:Patient|Clinician|Participants|Supervisor?):").expect("valid regex"),
        Regex::new(r"(?i)DOB|Date and Time:").expect("valid regex"),
        // Dates and clock times
        Regex::new(r"\d{1,2}[/-]\d{1,2}[/-]\d{2,4}").expect("valid regex"),
        Regex::new(r"\d{1,2}:\d{2}\s?(?:AM|PM|am|pm)").expect("valid regex"),
        // Facility names (case-sensitive: "PC" and "LLC" are suffixes, not words)
        Regex::new(r"Location|Clinic|Hospital|Center|LLC|LLP|PC").expect("valid regex"),
        // Footers
        Regex::new(r"License|http|www|Page \d+ of \d+").expect("valid regex"),
    ]
});

/// Strip identifying lines from raw note text.
///
/// Lines are trimmed; blank lines and lines matching any identifying pattern
/// are dropped. Surviving lines keep their original order.
pub fn normalize(raw_text: &str) -> String {
    raw_text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !is_identifying(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whether a (trimmed) line carries identifying information.
pub fn is_identifying(line: &str) -> bool {
    LINE_FILTERS.iter().any(|re| re.is_match(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_note() -> &'static str {
        "Progress Note\n\
         Patient: Jane Roe, DOB 04/12/1988\n\
         Clinician: Alex Smith, LPC\n\
         Date and Time: 03/14/2024 10:00 AM\n\
         \n\
         Location: Telehealth\n\
         Interventions Used: CBT, motivational interviewing\n\
         Current Mental Status: alert, oriented\n\
         Session started 9:30 am\n\
         Page 1 of 2\n\
         https://portal.example.com\n\
         Plan: continue weekly sessions"
    }

    #[test]
    fn drops_identifying_lines() {
        let clean = normalize(sample_note());
        assert_eq!(
            clean,
            "Progress Note\n\
             Interventions Used: CBT, motivational interviewing\n\
             Current Mental Status: alert, oriented\n\
             Plan: continue weekly sessions"
        );
    }

    #[test]
    fn trims_and_skips_blank_lines() {
        assert_eq!(normalize("   first  \n\n\n  second\t"), "first\nsecond");
    }

    #[test]
    fn is_idempotent() {
        let once = normalize(sample_note());
        let twice = normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn unmatched_lines_pass_through() {
        let text = "Mood: euthymic\nAffect: congruent";
        assert_eq!(normalize(text), text);
    }

    #[test]
    fn label_match_is_case_insensitive() {
        assert_eq!(normalize("PATIENT: someone\nkept"), "kept");
        assert_eq!(normalize("supervisor: someone\nkept"), "kept");
    }

    #[test]
    fn facility_match_is_case_sensitive() {
        // "center" in lowercase is ordinary narrative
        assert_eq!(normalize("client-centered approach"), "client-centered approach");
        assert_eq!(normalize("Community Health Center"), "");
    }

    #[test]
    fn drops_dashed_dates() {
        assert_eq!(normalize("Seen on 3-14-24\nkept"), "kept");
    }

    #[test]
    fn empty_input_returns_empty() {
        assert_eq!(normalize(""), "");
    }
}
