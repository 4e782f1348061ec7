use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::prompt::{build_cpt_prompt, cpt_response_schema, is_allowed_cpt, CODING_SYSTEM_PROMPT};
use crate::pipeline::llm::{request_structured, LlmClient, LlmError};

/// Crisis psychotherapy base code.
pub const CRISIS_BASE: &str = "90839";
/// Crisis add-on code, only billable together with [`CRISIS_BASE`].
pub const CRISIS_ADD_ON: &str = "90840";

#[derive(Debug, Deserialize)]
struct CptResponse {
    #[serde(rename = "CPT")]
    cpt: Vec<String>,
}

/// Model-predicted CPT codes after post-processing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CptPrediction {
    /// Allowed, deduplicated codes in model order.
    pub codes: Vec<String>,
    /// Codes the model returned that are not on the allow-list.
    pub rejected: Vec<String>,
    /// Add-on codes dropped because their base code was absent.
    pub orphaned_add_ons: Vec<String>,
}

/// Predict CPT codes for a de-identified note.
pub fn predict_cpt(
    llm: &dyn LlmClient,
    model: &str,
    clean_note: &str,
    max_retries: usize,
) -> Result<CptPrediction, LlmError> {
    let prompt = build_cpt_prompt(clean_note);
    let response: CptResponse = request_structured(
        llm,
        model,
        &prompt,
        CODING_SYSTEM_PROMPT,
        &cpt_response_schema(),
        max_retries,
    )?;

    let prediction = postprocess_cpts(response.cpt);
    if !prediction.rejected.is_empty() {
        tracing::warn!(
            rejected = ?prediction.rejected,
            "Model returned CPT codes outside the allow-list"
        );
    }
    Ok(prediction)
}

/// Business rules applied to raw model output.
///
/// Codes are trimmed and upper-cased; duplicates are dropped (first wins);
/// codes outside the allow-list are moved to `rejected`; 90840 without
/// 90839 is dropped as an orphaned add-on.
pub fn postprocess_cpts(raw: Vec<String>) -> CptPrediction {
    let mut prediction = CptPrediction::default();
    let mut seen = HashSet::new();

    for code in raw {
        let code = code.trim().to_uppercase();
        if code.is_empty() || !seen.insert(code.clone()) {
            continue;
        }
        if is_allowed_cpt(&code) {
            prediction.codes.push(code);
        } else {
            prediction.rejected.push(code);
        }
    }

    let has_base = prediction.codes.iter().any(|c| c == CRISIS_BASE);
    if !has_base {
        if let Some(pos) = prediction.codes.iter().position(|c| c == CRISIS_ADD_ON) {
            prediction.orphaned_add_ons.push(prediction.codes.remove(pos));
        }
    }

    prediction
}
