use super::rerank::RankedIcd;

/// CPT codes the predictor may return, with the descriptions shown to the model.
pub const ALLOWED_CPT_CODES: &[(&str, &str)] = &[
    ("90791", "Psychiatric diagnostic evaluation"),
    ("90832", "Psychotherapy, 30 minutes with patient"),
    ("90834", "Psychotherapy, 45 minutes with patient"),
    ("90837", "Psychotherapy, 60 minutes with patient"),
    ("90839", "Psychotherapy for crisis, first 60 minutes"),
    ("90840", "Psychotherapy for crisis, each additional 30 minutes"),
    ("H0004", "Behavioral health counseling and therapy, per 15 minutes"),
    ("96130", "Psychological testing evaluation services, first hour"),
    ("96131", "Psychological testing evaluation services, each additional hour"),
];

/// Length every CPT/HCPCS code in the allow-list shares.
pub const CPT_CODE_LEN: usize = 5;

/// Upper bound on final ICD-10 codes per note.
pub const MAX_FINAL_ICDS: usize = 4;

pub const CODING_SYSTEM_PROMPT: &str = "You are a medical coding assistant for a behavioral health \
practice. You assign billing codes ONLY from the allowed lists you are given. \
Never invent codes. Output valid JSON only.";

pub fn is_allowed_cpt(code: &str) -> bool {
    ALLOWED_CPT_CODES.iter().any(|(allowed, _)| *allowed == code)
}

/// JSON schema for the CPT prediction response.
pub fn cpt_response_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "CPT": {
                "type": "array",
                "items": {
                    "type": "string",
                    "minLength": CPT_CODE_LEN,
                    "maxLength": CPT_CODE_LEN
                }
            }
        },
        "required": ["CPT"]
    })
}

/// JSON schema for the final ICD-10 selection response.
pub fn icd_response_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "ICD10": {
                "type": "array",
                "items": { "type": "string" },
                "minItems": 1,
                "maxItems": MAX_FINAL_ICDS
            }
        },
        "required": ["ICD10"]
    })
}

/// Prompt asking the model to classify a de-identified note into allowed CPTs.
pub fn build_cpt_prompt(clean_note: &str) -> String {
    let allowed = ALLOWED_CPT_CODES
        .iter()
        .map(|(code, description)| format!("- {code}: {description}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Assign the correct CPT code(s) from the allowed list below, based on the clinical note.
Do not guess codes that are not in the list.

Allowed CPTs:
{allowed}

Examples:
Note: "Patient presented for initial psychiatric diagnostic interview..." -> CPT: 90791
Note: "Session lasted 60 minutes, focused on psychotherapy..." -> CPT: 90837
Note: "Behavioral therapy session lasted 15 minutes..." -> CPT: H0004
Note: "Crisis session, client in acute distress, 90 minutes..." -> CPT: 90839, 90840

<document>
{clean_note}
</document>

Return the result in this JSON format:
{{
  "CPT": ["code1", "code2"]
}}
"#
    )
}

/// Prompt asking the model to pick final ICD-10 codes from the ranked shortlist.
pub fn build_icd_prompt(clean_note: &str, cpts: &[String], shortlist: &[RankedIcd]) -> String {
    let allowed = shortlist
        .iter()
        .map(|r| format!("- {} — {} (score {:.3})", r.code, r.description, r.best_score()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Choose between 1 and {MAX_FINAL_ICDS} ICD-10 codes ONLY from the allowed list.

<document>
{clean_note}
</document>

CPT context: {cpts}

Allowed ICDs:
{allowed}

Return JSON: {{"ICD10": ["code1", "code2"]}}
"#,
        cpts = cpts.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_codes_are_fixed_length() {
        assert!(ALLOWED_CPT_CODES.iter().all(|(c, _)| c.len() == CPT_CODE_LEN));
    }

    #[test]
    fn allow_list_membership() {
        assert!(is_allowed_cpt("H0004"));
        assert!(is_allowed_cpt("90840"));
        assert!(!is_allowed_cpt("99213"));
        assert!(!is_allowed_cpt("h0004"));
    }

    #[test]
    fn cpt_prompt_lists_every_allowed_code() {
        let prompt = build_cpt_prompt("Session lasted 55 minutes.");
        for (code, description) in ALLOWED_CPT_CODES {
            assert!(prompt.contains(&format!("- {code}: {description}")));
        }
        assert!(prompt.contains("Session lasted 55 minutes."));
        assert!(prompt.contains("\"CPT\": [\"code1\", \"code2\"]"));
    }

    #[test]
    fn icd_prompt_renders_shortlist_with_scores() {
        let shortlist = vec![RankedIcd {
            code: "F41.1".into(),
            description: "Generalized anxiety disorder".into(),
            similarity: 0.81234,
            cross_score: None,
        }];
        let prompt = build_icd_prompt("note", &["90837".to_string()], &shortlist);
        assert!(prompt.contains("- F41.1 — Generalized anxiety disorder (score 0.812)"));
        assert!(prompt.contains("CPT context: 90837"));
        assert!(prompt.contains("between 1 and 4"));
    }

    #[test]
    fn schemas_require_their_keys() {
        assert_eq!(cpt_response_schema()["required"][0], "CPT");
        assert_eq!(icd_response_schema()["properties"]["ICD10"]["maxItems"], 4);
    }
}
