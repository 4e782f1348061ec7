use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static DIAGNOSIS_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:Diagnosis|Diagnoses|Dx)[:\-]?").expect("valid regex")
});

static STOP_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:Plan|Treatment|Intervention|Procedure|Assessment)[:\-]?")
        .expect("valid regex")
});

/// ICD-10 shape: letter (A-T, V-Z), two digits, optional dot + 1-4 alphanumerics.
static ICD10_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-TV-Z][0-9]{2}(?:\.[0-9A-Z]{1,4})?").expect("valid regex")
});

/// Text between the first diagnosis heading and the next stop heading.
///
/// Returns `None` when the note has no diagnosis heading at all.
pub fn diagnosis_window(text: &str) -> Option<&str> {
    let heading = DIAGNOSIS_HEADING.find(text)?;
    let rest = &text[heading.end()..];
    let window = match STOP_HEADING.find(rest) {
        Some(stop) => &rest[..stop.start()],
        None => rest,
    };
    Some(window)
}

/// ICD-10 codes listed under the note's diagnosis heading.
///
/// Codes are deduplicated in first-seen order. A trailing uppercase letter
/// (placeholder/encounter character) is stripped once, along with a dot
/// left dangling by the strip. A note without a diagnosis heading yields
/// no codes.
pub fn extract_diagnosis_codes(text: &str) -> Vec<String> {
    let Some(window) = diagnosis_window(text) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    ICD10_TOKEN
        .find_iter(window)
        .map(|m| strip_trailing_letter(m.as_str()))
        .filter(|code| seen.insert(code.clone()))
        .collect()
}

fn strip_trailing_letter(code: &str) -> String {
    match code.chars().last() {
        Some(c) if c.is_ascii_uppercase() => {
            let stripped = &code[..code.len() - 1];
            stripped.trim_end_matches('.').to_string()
        }
        _ => code.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_codes_until_stop_heading() {
        let text = "Diagnosis: F32.9, G47.33X\nPlan: follow up in two weeks, Z00.00";
        assert_eq!(extract_diagnosis_codes(text), vec!["F32.9", "G47.33"]);
    }

    #[test]
    fn strips_only_one_trailing_letter() {
        let text = "Dx: S72.001AB";
        // S72.001A is the longest match (4 chars after the dot); the trailing A goes
        assert_eq!(extract_diagnosis_codes(text), vec!["S72.001"]);
    }

    #[test]
    fn deduplicates_after_stripping() {
        let text = "Diagnoses: F41.1 F41.1A F41.1";
        assert_eq!(extract_diagnosis_codes(text), vec!["F41.1"]);
    }

    #[test]
    fn strips_dangling_dot() {
        assert_eq!(extract_diagnosis_codes("Diagnosis: F32.A"), vec!["F32"]);
    }

    #[test]
    fn no_heading_yields_no_codes() {
        let text = "Assessment: client reports F32.9 symptoms\nPlan: continue";
        assert!(extract_diagnosis_codes(text).is_empty());
        assert!(diagnosis_window(text).is_none());
    }

    #[test]
    fn whole_remainder_used_without_stop_heading() {
        let text = "Diagnosis:\nF43.10 Post-traumatic stress disorder\nF33.1 Recurrent MDD";
        assert_eq!(extract_diagnosis_codes(text), vec!["F43.10", "F33.1"]);
    }

    #[test]
    fn stop_heading_is_case_insensitive() {
        let text = "DIAGNOSIS - F90.0\nTREATMENT PLAN: F99";
        assert_eq!(extract_diagnosis_codes(text), vec!["F90.0"]);
    }

    #[test]
    fn u_codes_are_not_icd10_shaped() {
        let text = "Diagnosis: U07.1 F84.0";
        assert_eq!(extract_diagnosis_codes(text), vec!["F84.0"]);
    }

    #[test]
    fn codes_without_decimal() {
        assert_eq!(extract_diagnosis_codes("Dx: Z63 F99"), vec!["Z63", "F99"]);
    }
}
