use std::collections::HashSet;

use super::types::RelevanceScorer;
use super::EmbeddingError;

/// Token window for a (note, candidate) pair.
pub const CROSS_ENCODER_MAX_TOKENS: usize = 512;

// ═══════════════════════════════════════════════════════════
// ONNX Cross-Encoder — behind `onnx-embeddings` feature
// ═══════════════════════════════════════════════════════════

#[cfg(feature = "onnx-embeddings")]
mod onnx {
    use super::{EmbeddingError, RelevanceScorer, CROSS_ENCODER_MAX_TOKENS};
    use std::path::Path;
    use std::sync::Mutex;

    use ort::session::Session;

    /// Sequence-pair relevance model (ms-marco style cross-encoder) on ONNX
    /// Runtime. The single output logit is squashed through a sigmoid so
    /// scores land in 0..1.
    pub struct OnnxCrossEncoder {
        session: Mutex<Session>,
        tokenizer: tokenizers::Tokenizer,
    }

    impl OnnxCrossEncoder {
        /// Load from a directory holding `model.onnx` and `tokenizer.json`.
        pub fn load(model_dir: &Path) -> Result<Self, EmbeddingError> {
            let model_path = model_dir.join("model.onnx");
            let tokenizer_path = model_dir.join("tokenizer.json");

            if !model_path.exists() {
                return Err(EmbeddingError::ModelNotFound(model_path));
            }
            if !tokenizer_path.exists() {
                return Err(EmbeddingError::ModelNotFound(tokenizer_path));
            }

            let session = Session::builder()
                .map_err(|e: ort::Error| EmbeddingError::ModelInit(e.to_string()))?
                .with_intra_threads(2)
                .map_err(|e: ort::Error| EmbeddingError::ModelInit(e.to_string()))?
                .commit_from_file(&model_path)
                .map_err(|e: ort::Error| EmbeddingError::ModelInit(format!("ONNX load failed: {e}")))?;

            let mut tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
                .map_err(|e| EmbeddingError::ModelInit(format!("Tokenizer load failed: {e}")))?;
            tokenizer
                .with_truncation(Some(tokenizers::TruncationParams {
                    max_length: CROSS_ENCODER_MAX_TOKENS,
                    ..Default::default()
                }))
                .map_err(|e| EmbeddingError::ModelInit(format!("Tokenizer truncation: {e}")))?;

            tracing::info!("ONNX cross-encoder loaded from {}", model_dir.display());

            Ok(Self {
                session: Mutex::new(session),
                tokenizer,
            })
        }
    }

    impl RelevanceScorer for OnnxCrossEncoder {
        fn score(&self, query: &str, candidate: &str) -> Result<f32, EmbeddingError> {
            use ort::value::TensorRef;

            let encoding = self
                .tokenizer
                .encode((query, candidate), true)
                .map_err(|e| EmbeddingError::Tokenization(e.to_string()))?;

            let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
            let attention_mask: Vec<i64> = encoding
                .get_attention_mask()
                .iter()
                .map(|&m| m as i64)
                .collect();
            let token_type_ids: Vec<i64> = encoding
                .get_type_ids()
                .iter()
                .map(|&t| t as i64)
                .collect();

            let seq_len = input_ids.len();

            let ids_array = ndarray::Array2::from_shape_vec((1, seq_len), input_ids)
                .map_err(|e| EmbeddingError::Scoring(e.to_string()))?;
            let mask_array = ndarray::Array2::from_shape_vec((1, seq_len), attention_mask)
                .map_err(|e| EmbeddingError::Scoring(e.to_string()))?;
            let type_array = ndarray::Array2::from_shape_vec((1, seq_len), token_type_ids)
                .map_err(|e| EmbeddingError::Scoring(e.to_string()))?;

            let ids_tensor = TensorRef::from_array_view(&ids_array)
                .map_err(|e| EmbeddingError::Scoring(e.to_string()))?;
            let mask_tensor = TensorRef::from_array_view(&mask_array)
                .map_err(|e| EmbeddingError::Scoring(e.to_string()))?;
            let type_tensor = TensorRef::from_array_view(&type_array)
                .map_err(|e| EmbeddingError::Scoring(e.to_string()))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| EmbeddingError::Scoring("Session lock poisoned".to_string()))?;

            let outputs = session
                .run(ort::inputs![ids_tensor, mask_tensor, type_tensor])
                .map_err(|e| EmbeddingError::Scoring(format!("ONNX inference failed: {e}")))?;

            // Output shape: [1, 1] logits
            let (_shape, logits) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| EmbeddingError::Scoring(format!("Output extraction: {e}")))?;

            let logit = logits
                .first()
                .copied()
                .ok_or_else(|| EmbeddingError::Scoring("Empty logits".to_string()))?;

            Ok(1.0 / (1.0 + (-logit).exp()))
        }
    }
}

#[cfg(feature = "onnx-embeddings")]
pub use onnx::OnnxCrossEncoder;

/// Lexical stand-in for a cross-encoder: the share of the candidate's
/// lowercase word tokens that also occur in the query. Deterministic, used in
/// tests and when no cross-encoder model is installed.
pub struct TokenOverlapScorer;

impl RelevanceScorer for TokenOverlapScorer {
    fn score(&self, query: &str, candidate: &str) -> Result<f32, EmbeddingError> {
        let query_tokens = word_tokens(query);
        let candidate_tokens = word_tokens(candidate);
        if candidate_tokens.is_empty() {
            return Ok(0.0);
        }
        let shared = candidate_tokens
            .iter()
            .filter(|t| query_tokens.contains(*t))
            .count();
        Ok(shared as f32 / candidate_tokens.len() as f32)
    }
}

fn word_tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(|t| t.to_lowercase())
        .collect()
}
