//! Cleaning and decoding of structured model output.
//!
//! Models sometimes wrap JSON in thinking tags, code fences or prose even
//! when a schema is requested. The helpers here strip that and decode the
//! first JSON object into a typed response.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;

use super::{LlmClient, LlmError};

/// Strip model-specific artifacts from raw LLM output.
///
/// Handles MedGemma thinking prefixes (`<unusedN>thought\n...`), stray
/// `<unusedN>` tokens and `<think>...</think>` blocks.
pub fn sanitize_llm_output(raw: &str) -> String {
    let mut text = raw.to_string();

    if let Some(idx) = text.find("<unused") {
        if let Some(thought_offset) = text[idx..].find("thought\n") {
            text = text[idx + thought_offset + 8..].to_string();
        }
    }

    static UNUSED_TOKEN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<unused\d+>").expect("valid regex"));
    static THINK_BLOCK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"));

    text = UNUSED_TOKEN_RE.replace_all(&text, "").to_string();
    text = THINK_BLOCK_RE.replace_all(&text, "").to_string();

    text.trim().to_string()
}

/// Locate the outermost JSON object in a response.
pub fn extract_json_object(response: &str) -> Result<&str, LlmError> {
    let start = response
        .find('{')
        .ok_or_else(|| LlmError::MalformedResponse("No JSON object found in response".into()))?;
    let end = response
        .rfind('}')
        .ok_or_else(|| LlmError::MalformedResponse("No closing brace found in response".into()))?;

    if end < start {
        return Err(LlmError::MalformedResponse(
            "Closing brace precedes opening brace".into(),
        ));
    }

    Ok(&response[start..=end])
}

/// Decode a structured response into `T`.
///
/// Missing or mistyped fields are schema violations.
pub fn parse_json_response<T: DeserializeOwned>(raw: &str) -> Result<T, LlmError> {
    let cleaned = sanitize_llm_output(raw);
    let json = extract_json_object(&cleaned)?;
    serde_json::from_str(json).map_err(|e| LlmError::SchemaViolation(e.to_string()))
}

/// Schema-constrained call, decoded into `T`.
///
/// Transport failures and schema violations are retried up to `max_retries`
/// extra times; the last error is returned once attempts run out.
pub fn request_structured<T: DeserializeOwned>(
    llm: &dyn LlmClient,
    model: &str,
    prompt: &str,
    system: &str,
    schema: &serde_json::Value,
    max_retries: usize,
) -> Result<T, LlmError> {
    request_validated(llm, model, prompt, system, schema, max_retries, Ok)
}

/// Like [`request_structured`], with a check on the decoded value.
///
/// A `SchemaViolation` from `validate` counts as bad output and is retried
/// the same way as a decode failure.
pub fn request_validated<T, U, F>(
    llm: &dyn LlmClient,
    model: &str,
    prompt: &str,
    system: &str,
    schema: &serde_json::Value,
    max_retries: usize,
    validate: F,
) -> Result<U, LlmError>
where
    T: DeserializeOwned,
    F: Fn(T) -> Result<U, LlmError>,
{
    let mut attempt = 0;
    loop {
        let result = llm
            .generate_structured(model, prompt, system, schema)
            .and_then(|raw| parse_json_response::<T>(&raw))
            .and_then(&validate);

        match result {
            Ok(value) => return Ok(value),
            Err(e) if (e.is_retryable() || e.is_parse_error()) && attempt < max_retries => {
                attempt += 1;
                tracing::warn!(attempt, error = %e, "Structured LLM call failed, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}
