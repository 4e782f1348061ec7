//! Note completeness checks.
//!
//! Each required section is a named predicate over the de-identified text.
//! A note missing any of them is flagged RED for human review; it is never
//! rejected.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Minimum trimmed length for the Objectives subsection to count as filled in.
const MIN_OBJECTIVES_CHARS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "RED")]
    Red,
}

impl NoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Red => "RED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub status: NoteStatus,
    pub missing_sections: Vec<String>,
}

impl ValidationResult {
    /// Review comment for the billing row, empty when nothing is missing.
    pub fn comment(&self) -> String {
        if self.missing_sections.is_empty() {
            String::new()
        } else {
            format!("Missing: {}", self.missing_sections.join(", "))
        }
    }
}

/// A required section and the predicate that detects it.
pub struct SectionCheck {
    pub name: &'static str,
    pub is_present: fn(&str) -> bool,
}

/// Required sections, in reporting order.
pub const REQUIRED_SECTIONS: &[SectionCheck] = &[
    SectionCheck {
        name: "Interventions Used",
        is_present: has_interventions_used,
    },
    SectionCheck {
        name: "Risk Assessment",
        is_present: has_risk_assessment,
    },
    SectionCheck {
        name: "Current Mental Status",
        is_present: has_current_mental_status,
    },
    SectionCheck {
        name: "Objectives",
        is_present: has_objectives_content,
    },
];

static INTERVENTIONS_USED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bInterventions\s+Used\b").expect("valid regex"));

// Bare "Assessment" (optionally followed by words, slashes or dashes) is
// accepted as a stand-in for "Risk Assessment".
static RISK_ASSESSMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:Risk\s+Assessment|Assessment(?:\s*[/\-\w]+)*)").expect("valid regex")
});

static CURRENT_MENTAL_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bCurrent\s+Mental\s+Status\b").expect("valid regex"));

static OBJECTIVES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)Treatment\s*Plan\s*Progress.*?Objectives(.*?)(?:\n(?:Plan|Assessment|Additional\s*Notes)|$)",
    )
    .expect("valid regex")
});

/// "Interventions Used" appears as a phrase.
pub fn has_interventions_used(text: &str) -> bool {
    INTERVENTIONS_USED.is_match(text)
}

/// "Risk Assessment", or a looser bare "Assessment" heading.
pub fn has_risk_assessment(text: &str) -> bool {
    RISK_ASSESSMENT.is_match(text)
}

/// "Current Mental Status" appears as a phrase.
pub fn has_current_mental_status(text: &str) -> bool {
    CURRENT_MENTAL_STATUS.is_match(text)
}

/// The Objectives subsection under "Treatment Plan Progress" has real content.
///
/// Content runs from "Objectives" to the next line opening with Plan,
/// Assessment or Additional Notes (or end of text) and must exceed ten
/// characters once trimmed.
pub fn has_objectives_content(text: &str) -> bool {
    OBJECTIVES
        .captures(text)
        .and_then(|caps| caps.get(1))
        .is_some_and(|m| m.as_str().trim().chars().count() > MIN_OBJECTIVES_CHARS)
}

/// Check de-identified note text for every required section.
pub fn validate(clean_text: &str) -> ValidationResult {
    let missing_sections: Vec<String> = REQUIRED_SECTIONS
        .iter()
        .filter(|check| !(check.is_present)(clean_text))
        .map(|check| check.name.to_string())
        .collect();

    let status = if missing_sections.is_empty() {
        NoteStatus::Ok
    } else {
        NoteStatus::Red
    };

    ValidationResult {
        status,
        missing_sections,
    }
}
