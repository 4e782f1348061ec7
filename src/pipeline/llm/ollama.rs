use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::{LlmClient, LlmError};

/// Ollama HTTP client for local LLM inference.
pub struct OllamaClient {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaClient {
    /// Create a client pointing at an Ollama instance.
    ///
    /// Every request is bounded by `timeout_secs`; a timeout surfaces as
    /// [`LlmError::Timeout`].
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, LlmError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LlmError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        })
    }

    /// Default Ollama instance at localhost:11434 with 2-minute timeout.
    pub fn default_local() -> Result<Self, LlmError> {
        Self::new("http://localhost:11434", 120)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_send_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_connect() {
            LlmError::Connection(self.base_url.clone())
        } else if e.is_timeout() {
            LlmError::Timeout(self.timeout_secs)
        } else {
            LlmError::HttpClient(e.to_string())
        }
    }

    fn post_generate(&self, body: &OllamaGenerateRequest<'_>) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaGenerateResponse = response
            .json()
            .map_err(|e| LlmError::ResponseParsing(e.to_string()))?;

        Ok(parsed.response)
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a serde_json::Value>,
    options: GenerateOptions,
}

/// Deterministic decoding for coding calls.
#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self { temperature: 0.0 }
    }
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

/// Response body from Ollama /api/tags
#[derive(Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

impl LlmClient for OllamaClient {
    fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, LlmError> {
        self.post_generate(&OllamaGenerateRequest {
            model,
            prompt,
            system,
            stream: false,
            format: None,
            options: GenerateOptions::default(),
        })
    }

    fn generate_structured(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
        schema: &serde_json::Value,
    ) -> Result<String, LlmError> {
        self.post_generate(&OllamaGenerateRequest {
            model,
            prompt,
            system,
            stream: false,
            format: Some(schema),
            options: GenerateOptions::default(),
        })
    }

    fn is_model_available(&self, model: &str) -> Result<bool, LlmError> {
        let models = self.list_models()?;
        Ok(models.iter().any(|m| m.starts_with(model)))
    }

    fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaTagsResponse = response
            .json()
            .map_err(|e| LlmError::ResponseParsing(e.to_string()))?;

        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }
}

/// Mock LLM client for testing.
///
/// Replays the configured responses in order, repeating the last one once
/// the script runs out. Prompts are recorded for assertions.
pub struct MockLlmClient {
    responses: Vec<Result<String, String>>,
    call_count: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    available_models: Vec<String>,
}

impl MockLlmClient {
    pub fn new(response: &str) -> Self {
        Self::scripted(vec![response])
    }

    pub fn scripted(responses: Vec<&str>) -> Self {
        Self {
            responses: responses.into_iter().map(|r| Ok(r.to_string())).collect(),
            call_count: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            available_models: vec!["medgemma:latest".to_string()],
        }
    }

    /// A client whose every call fails with a connection error.
    pub fn failing(message: &str) -> Self {
        Self {
            responses: vec![Err(message.to_string())],
            call_count: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            available_models: vec!["medgemma:latest".to_string()],
        }
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.available_models = models;
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl LlmClient for MockLlmClient {
    fn generate(&self, _model: &str, prompt: &str, _system: &str) -> Result<String, LlmError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let index = self.call_count.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .responses
            .get(index)
            .or_else(|| self.responses.last())
            .cloned()
            .unwrap_or_else(|| Ok(String::new()));
        scripted.map_err(LlmError::Connection)
    }

    fn is_model_available(&self, model: &str) -> Result<bool, LlmError> {
        Ok(self.available_models.iter().any(|m| m.starts_with(model)))
    }

    fn list_models(&self) -> Result<Vec<String>, LlmError> {
        Ok(self.available_models.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_client_returns_configured_response() {
        let client = MockLlmClient::new("test response");
        let result = client.generate("model", "prompt", "system").unwrap();
        assert_eq!(result, "test response");
    }

    #[test]
    fn mock_client_replays_script_then_repeats_last() {
        let client = MockLlmClient::scripted(vec!["first", "second"]);
        assert_eq!(client.generate("m", "p1", "s").unwrap(), "first");
        assert_eq!(client.generate("m", "p2", "s").unwrap(), "second");
        assert_eq!(client.generate("m", "p3", "s").unwrap(), "second");
        assert_eq!(client.call_count(), 3);
        assert_eq!(client.prompts(), vec!["p1", "p2", "p3"]);
    }

    #[test]
    fn mock_structured_call_falls_back_to_generate() {
        let client = MockLlmClient::new("{\"CPT\": []}");
        let schema = serde_json::json!({"type": "object"});
        let result = client.generate_structured("m", "p", "s", &schema).unwrap();
        assert_eq!(result, "{\"CPT\": []}");
    }

    #[test]
    fn failing_mock_is_retryable() {
        let client = MockLlmClient::failing("down");
        let err = client.generate("m", "p", "s").unwrap_err();
        assert!(err.is_retryable());
        assert!(!err.is_parse_error());
    }

    #[test]
    fn mock_client_model_not_available() {
        let client = MockLlmClient::new("").with_models(vec!["llama3:8b".into()]);
        assert!(!client.is_model_available("medgemma").unwrap());
        assert!(client.is_model_available("llama3").unwrap());
    }

    #[test]
    fn ollama_client_trims_trailing_slash() {
        let client = OllamaClient::new("http://localhost:11434/", 60).unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434");
        assert_eq!(client.timeout_secs, 60);
    }

    #[test]
    fn default_local_uses_standard_port() {
        let client = OllamaClient::default_local().unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434");
    }

    #[test]
    fn structured_request_serializes_schema_as_format() {
        let schema = serde_json::json!({"type": "object"});
        let body = OllamaGenerateRequest {
            model: "medgemma",
            prompt: "p",
            system: "s",
            stream: false,
            format: Some(&schema),
            options: GenerateOptions::default(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["format"]["type"], "object");
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["temperature"], 0.0);
    }

    #[test]
    fn free_form_request_omits_format() {
        let body = OllamaGenerateRequest {
            model: "medgemma",
            prompt: "p",
            system: "s",
            stream: false,
            format: None,
            options: GenerateOptions::default(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("format").is_none());
    }
}
