//! Structured field extraction from raw note text.
//!
//! Every field is optional and extracted independently: a miss on one field
//! never blocks the others.

pub mod dates;
pub mod diagnosis;

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub use dates::{format_date, split_date_time};
pub use diagnosis::extract_diagnosis_codes;

/// Place of service and modifier for in-person visits.
pub const POS_OFFICE: &str = "11";
/// Place of service for telehealth visits.
pub const POS_TELEHEALTH: &str = "10";
/// Synchronous telemedicine modifier.
pub const MODIFIER_TELEHEALTH: &str = "95";

/// Fields extracted from one note.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhiRecord {
    pub clinician: Option<String>,
    pub supervisor: Option<String>,
    pub patient: Option<String>,
    pub dob: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub duration: Option<String>,
    pub service_code: Option<String>,
    pub diagnosis_codes: Vec<String>,
    pub location: String,
    pub pos: String,
    pub modifier: String,
}

static CLINICIAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Clinician:\s*(.+)").expect("valid regex"));
static SUPERVISOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Supervisor:\s*(.+)").expect("valid regex"));
static PATIENT_DOB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Patient:\s*([^,]+),\s*DOB:?\s*([^\n]+)").expect("valid regex")
});
static DATE_AND_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Date and Time:\s*([^\n]+)").expect("valid regex"));
static DURATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Duration:\s*([^\n]+)").expect("valid regex"));
static SERVICE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Service Code:\s*([A-Z0-9]+)").expect("valid regex"));
static LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:Location|Clinic|Hospital|Center|LLC|LLP|PC)\b[:\-]?\s*(.+)")
        .expect("valid regex")
});
static TELEHEALTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)telehealth|virtual|video").expect("valid regex"));

/// Extract every known field from raw (not de-identified) note text.
pub fn extract(raw_text: &str) -> PhiRecord {
    let mut record = PhiRecord {
        clinician: capture(&CLINICIAN, raw_text),
        supervisor: capture(&SUPERVISOR, raw_text),
        duration: capture(&DURATION, raw_text),
        service_code: capture(&SERVICE_CODE, raw_text),
        diagnosis_codes: extract_diagnosis_codes(raw_text),
        ..Default::default()
    };

    if let Some(caps) = PATIENT_DOB.captures(raw_text) {
        record.patient = Some(caps[1].trim().to_string());
        record.dob = Some(format_date(&caps[2]));
    }

    if let Some(value) = capture(&DATE_AND_TIME, raw_text) {
        let (date, time) = split_date_time(&value);
        record.date = Some(date);
        if !time.is_empty() {
            record.time = Some(time);
        }
    }

    record.location = capture(&LOCATION, raw_text).unwrap_or_default();
    let (pos, modifier) = place_of_service(&record.location);
    record.pos = pos.to_string();
    record.modifier = modifier.to_string();

    record
}

/// Map a location string to its (POS, modifier) pair.
pub fn place_of_service(location: &str) -> (&'static str, &'static str) {
    if TELEHEALTH.is_match(location) {
        (POS_TELEHEALTH, MODIFIER_TELEHEALTH)
    } else {
        (POS_OFFICE, "")
    }
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|value| !value.is_empty())
}
