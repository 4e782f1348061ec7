//! Psychological-testing evaluation path.
//!
//! Notes billed under a testing code skip CPT prediction and ICD ranking.
//! Units come from the total time recorded in the note, and diagnosis codes
//! come straight from the PHI extractor.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::phi;

/// Service codes routed to the evaluation path.
pub const PSYCH_EVAL_CODES: [&str; 4] = ["96130", "96131", "96138", "96139"];

/// Comment attached to every evaluation row.
pub const EVAL_REVIEW_COMMENT: &str = "Check portal for evaluation file";

static TOTAL_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Total Time Spent\s*[:\-]?\s*(\d+)\s*minutes?").expect("valid regex")
});

static PROCEDURES_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)Procedures\s*(.*?)(?:Total Time Spent|Diagnosis|$)").expect("valid regex")
});

static LETTER_DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-zA-Z])(\d+)").expect("valid regex"));

static MINUTES_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b\d+\s*minutes?\b").expect("valid regex"));

static PSYCHOMETRIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:administration by )?psychometrist\b").expect("valid regex")
});

/// True when the service code selects the evaluation path.
pub fn is_psych_eval(service_code: &str) -> bool {
    PSYCH_EVAL_CODES.contains(&service_code)
}

/// Figures pulled from an evaluation note.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PsychEval {
    pub service_code: String,
    /// Minutes from "Total Time Spent", 0 when absent.
    pub total_time: u32,
    /// Timed entries listed under "Procedures".
    pub procedure_count: usize,
    pub diagnosis_codes: Vec<String>,
    pub by_psychometrist: bool,
    pub units: u32,
}

impl PsychEval {
    /// `<code>--<units>X--<dx, dx>`; the unit part is empty at zero units.
    pub fn coding(&self) -> String {
        let units = if self.units > 0 {
            format!("{}X", self.units)
        } else {
            String::new()
        };
        format!(
            "{}--{}--{}",
            self.service_code,
            units,
            self.diagnosis_codes.join(", ")
        )
    }
}

/// Extract evaluation figures from the raw note text.
pub fn extract_eval(raw_text: &str) -> PsychEval {
    let record = phi::extract(raw_text);
    let service_code = record.service_code.unwrap_or_default();
    let total_time = extract_total_time(raw_text);

    PsychEval {
        units: eval_units(&service_code, total_time),
        service_code,
        total_time,
        procedure_count: count_procedures(raw_text),
        diagnosis_codes: record.diagnosis_codes,
        by_psychometrist: by_psychometrist(raw_text),
    }
}

/// First "Total Time Spent: N minutes" value, 0 when absent.
pub fn extract_total_time(text: &str) -> u32 {
    TOTAL_TIME
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

fn procedures_section(text: &str) -> Option<&str> {
    PROCEDURES_SECTION
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Number of "N minutes" entries in the Procedures section.
///
/// PDF extraction often glues a label to its number ("Testing45 minutes"),
/// so a space is put back between a letter and a following digit run first.
pub fn count_procedures(text: &str) -> usize {
    let Some(section) = procedures_section(text) else {
        return 0;
    };
    let spaced = LETTER_DIGITS.replace_all(section, "$1 $2");
    MINUTES_ENTRY.find_iter(&spaced).count()
}

/// Whether the Procedures section mentions a psychometrist.
pub fn by_psychometrist(text: &str) -> bool {
    procedures_section(text).is_some_and(|section| PSYCHOMETRIST.is_match(section))
}

/// Round half down: a fraction above 0.5 rounds up, anything else rounds down.
pub fn custom_round(value: f64) -> i64 {
    let floor = value.floor();
    if value - floor > 0.5 {
        value.ceil() as i64
    } else {
        floor as i64
    }
}

/// Follow-up units for an evaluation code, never negative.
///
/// 96139 bills per 30 minutes; 96131 per hour beyond the first; other codes
/// are a single unit.
pub fn eval_units(service_code: &str, total_minutes: u32) -> u32 {
    let minutes = f64::from(total_minutes);
    let units = match service_code {
        "96139" => custom_round(minutes / 30.0),
        "96131" => custom_round((minutes - 60.0) / 60.0),
        _ => 1,
    };
    u32::try_from(units.max(0)).unwrap_or(0)
}
