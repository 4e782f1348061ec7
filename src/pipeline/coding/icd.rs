use serde::{Deserialize, Serialize};

use super::catalog::{CptCatalog, IcdEntry};
use super::prompt::{build_icd_prompt, icd_response_schema, CODING_SYSTEM_PROMPT, MAX_FINAL_ICDS};
use super::rerank::RankedIcd;
use crate::pipeline::llm::{request_validated, LlmClient, LlmError};

#[derive(Debug, Deserialize)]
struct IcdResponse {
    #[serde(rename = "ICD10")]
    icd10: Vec<String>,
}

/// Final ICD-10 choice for a note, with the shortlist it was drawn from.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IcdSelection {
    /// Codes the model picked, restricted to the shortlist, at most four.
    pub codes: Vec<String>,
    /// Ranked shortlist shown to the model (kept for audit).
    pub ranked: Vec<RankedIcd>,
    /// Codes the model returned that were not on the shortlist.
    pub rejected: Vec<String>,
}

/// ICD entries applicable to any of the predicted CPTs, in catalog order.
/// Duplicates across CPTs are kept; ranking collapses them.
pub fn icd_candidates(cpts: &[String], catalog: &CptCatalog) -> Vec<IcdEntry> {
    cpts.iter()
        .filter_map(|cpt| catalog.get(cpt))
        .flat_map(|entry| entry.applicable_icds.iter().cloned())
        .collect()
}

/// Ask the model to choose the final ICD-10 codes from a ranked shortlist.
///
/// An empty shortlist means there is nothing to choose from: no call is made.
/// An answer with no shortlisted code is a schema violation and is retried.
pub fn select_final_icds(
    llm: &dyn LlmClient,
    model: &str,
    clean_note: &str,
    cpts: &[String],
    ranked: Vec<RankedIcd>,
    max_retries: usize,
) -> Result<IcdSelection, LlmError> {
    if ranked.is_empty() {
        return Ok(IcdSelection::default());
    }

    let prompt = build_icd_prompt(clean_note, cpts, &ranked);
    let (codes, rejected) = request_validated(
        llm,
        model,
        &prompt,
        CODING_SYSTEM_PROMPT,
        &icd_response_schema(),
        max_retries,
        |response: IcdResponse| restrict_to_shortlist(response.icd10, &ranked),
    )?;

    if !rejected.is_empty() {
        tracing::warn!(
            rejected = ?rejected,
            "Model returned ICD-10 codes outside the shortlist"
        );
    }

    Ok(IcdSelection {
        codes,
        ranked,
        rejected,
    })
}

/// Split model codes into (kept, rejected). Kept codes are shortlisted,
/// unique and capped at [`MAX_FINAL_ICDS`]; at least one must remain.
fn restrict_to_shortlist(
    answer: Vec<String>,
    ranked: &[RankedIcd],
) -> Result<(Vec<String>, Vec<String>), LlmError> {
    let mut codes: Vec<String> = Vec::new();
    let mut rejected: Vec<String> = Vec::new();

    for code in answer {
        let code = code.trim().to_uppercase();
        if code.is_empty() || codes.contains(&code) || rejected.contains(&code) {
            continue;
        }
        if !ranked.iter().any(|r| r.code == code) {
            rejected.push(code);
        } else if codes.len() < MAX_FINAL_ICDS {
            codes.push(code);
        }
    }

    if codes.is_empty() {
        return Err(LlmError::SchemaViolation(format!(
            "no ICD-10 code from the shortlist (got: {})",
            if rejected.is_empty() {
                "none".to_string()
            } else {
                rejected.join(", ")
            }
        )));
    }

    Ok((codes, rejected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::coding::catalog::MappingRow;
    use crate::pipeline::llm::MockLlmClient;

    fn catalog() -> CptCatalog {
        let rows = [
            ("90837", "F41.1", "Generalized anxiety disorder"),
            ("90837", "F32.9", "Major depressive disorder"),
            ("H0004", "F41.1", "Generalized anxiety disorder"),
            ("H0004", "F10.20", "Alcohol dependence, uncomplicated"),
        ];
        CptCatalog::from_rows(rows.iter().map(|(cpt, icd, desc)| MappingRow {
            cpt: cpt.to_string(),
            cpt_description: "desc".into(),
            icd_code: icd.to_string(),
            icd_description: desc.to_string(),
        }))
    }

    fn ranked(codes: &[&str]) -> Vec<RankedIcd> {
        codes
            .iter()
            .enumerate()
            .map(|(i, code)| RankedIcd {
                code: code.to_string(),
                description: format!("{code} description"),
                similarity: 0.9 - i as f32 * 0.1,
                cross_score: None,
            })
            .collect()
    }

    #[test]
    fn candidates_union_keeps_duplicates() {
        let cands = icd_candidates(&["90837".into(), "H0004".into()], &catalog());
        let codes: Vec<&str> = cands.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["F41.1", "F32.9", "F41.1", "F10.20"]);
    }

    #[test]
    fn unknown_cpt_yields_no_candidates() {
        assert!(icd_candidates(&["99213".into()], &catalog()).is_empty());
        assert!(icd_candidates(&[], &catalog()).is_empty());
    }

    #[test]
    fn selection_restricted_to_shortlist() {
        let llm = MockLlmClient::new("{\"ICD10\": [\"F41.1\", \"Z99.9\", \"f32.9\"]}");
        let selection = select_final_icds(
            &llm,
            "m",
            "note",
            &["90837".into()],
            ranked(&["F41.1", "F32.9"]),
            0,
        )
        .unwrap();
        assert_eq!(selection.codes, vec!["F41.1", "F32.9"]);
        assert_eq!(selection.rejected, vec!["Z99.9"]);
        assert_eq!(selection.ranked.len(), 2);
    }

    #[test]
    fn selection_capped_at_four() {
        let codes = ["F41.1", "F32.9", "F43.10", "F90.0", "G47.00"];
        let llm = MockLlmClient::new(
            "{\"ICD10\": [\"F41.1\", \"F32.9\", \"F43.10\", \"F90.0\", \"G47.00\"]}",
        );
        let selection =
            select_final_icds(&llm, "m", "note", &["90837".into()], ranked(&codes), 0).unwrap();
        assert_eq!(selection.codes.len(), 4);
        assert!(selection.rejected.is_empty());
    }

    #[test]
    fn empty_shortlist_skips_model_call() {
        let llm = MockLlmClient::new("{\"ICD10\": [\"F41.1\"]}");
        let selection = select_final_icds(&llm, "m", "note", &[], Vec::new(), 0).unwrap();
        assert!(selection.codes.is_empty());
        assert_eq!(llm.call_count(), 0);
    }

    #[test]
    fn prompt_carries_shortlist() {
        let llm = MockLlmClient::new("{\"ICD10\": [\"F41.1\"]}");
        select_final_icds(&llm, "m", "note", &["90837".into()], ranked(&["F41.1"]), 0).unwrap();
        assert!(llm.prompts()[0].contains("- F41.1 — F41.1 description (score 0.900)"));
    }

    #[test]
    fn empty_answer_fails_after_retries() {
        let llm = MockLlmClient::new("{\"ICD10\": []}");
        let err = select_final_icds(&llm, "m", "note", &["90837".into()], ranked(&["F41.1"]), 2)
            .unwrap_err();
        assert!(matches!(err, LlmError::SchemaViolation(_)));
        assert_eq!(llm.call_count(), 3);
    }

    #[test]
    fn answer_entirely_off_shortlist_fails() {
        let llm = MockLlmClient::new("{\"ICD10\": [\"Z00.00\", \"R69\"]}");
        let err = select_final_icds(&llm, "m", "note", &["90837".into()], ranked(&["F41.1"]), 0)
            .unwrap_err();
        match err {
            LlmError::SchemaViolation(msg) => assert!(msg.contains("Z00.00, R69")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_answer_then_valid_answer_succeeds() {
        let llm = MockLlmClient::scripted(vec!["{\"ICD10\": []}", "{\"ICD10\": [\"F32.9\"]}"]);
        let selection = select_final_icds(
            &llm,
            "m",
            "note",
            &["90837".into()],
            ranked(&["F41.1", "F32.9"]),
            1,
        )
        .unwrap();
        assert_eq!(selection.codes, vec!["F32.9"]);
        assert_eq!(llm.call_count(), 2);
    }
}
