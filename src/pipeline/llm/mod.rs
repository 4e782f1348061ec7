pub mod ollama;
pub mod response;

pub use ollama::*;
pub use response::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Ollama is not running at {0}")]
    Connection(String),

    #[error("Ollama returned error (status {status}): {body}")]
    Server { status: u16, body: String },

    #[error("Model not available: {0}")]
    ModelUnavailable(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("Response violates schema: {0}")]
    SchemaViolation(String),
}

impl LlmError {
    /// Transport failures that may succeed on a fresh call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::HttpClient(_) | Self::Server { .. } | Self::Timeout(_)
        )
    }

    /// Bad model output that a fresh generation may fix.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::ResponseParsing(_) | Self::MalformedResponse(_) | Self::SchemaViolation(_)
        )
    }
}

/// Language model client abstraction (allows mocking).
pub trait LlmClient {
    /// Free-form generation.
    fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, LlmError>;

    /// Generation constrained to a JSON schema.
    ///
    /// Backends without structured output fall back to free-form generation;
    /// callers validate the response either way.
    fn generate_structured(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
        schema: &serde_json::Value,
    ) -> Result<String, LlmError> {
        let _ = schema;
        self.generate(model, prompt, system)
    }

    fn is_model_available(&self, model: &str) -> Result<bool, LlmError>;

    fn list_models(&self) -> Result<Vec<String>, LlmError>;
}

/// Allow `Box<dyn LlmClient>` to be used as `&impl LlmClient`.
impl LlmClient for Box<dyn LlmClient + Send + Sync> {
    fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, LlmError> {
        (**self).generate(model, prompt, system)
    }

    fn generate_structured(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
        schema: &serde_json::Value,
    ) -> Result<String, LlmError> {
        (**self).generate_structured(model, prompt, system, schema)
    }

    fn is_model_available(&self, model: &str) -> Result<bool, LlmError> {
        (**self).is_model_available(model)
    }

    fn list_models(&self) -> Result<Vec<String>, LlmError> {
        (**self).list_models()
    }
}

/// Lets one client be shared between a pipeline and its owner.
impl<T: LlmClient + ?Sized> LlmClient for std::sync::Arc<T> {
    fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, LlmError> {
        (**self).generate(model, prompt, system)
    }

    fn generate_structured(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
        schema: &serde_json::Value,
    ) -> Result<String, LlmError> {
        (**self).generate_structured(model, prompt, system, schema)
    }

    fn is_model_available(&self, model: &str) -> Result<bool, LlmError> {
        (**self).is_model_available(model)
    }

    fn list_models(&self) -> Result<Vec<String>, LlmError> {
        (**self).list_models()
    }
}
