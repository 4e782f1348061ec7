//! Sentence embeddings for notes and ICD catalog texts.
//!
//! ICD texts ("F41.1: Generalized anxiety disorder") are short and embedded
//! in padded batches while the store is built. Notes run far past the
//! model's token window, so a note is split into line-aligned chunks that
//! are embedded together and averaged into one vector.

use super::types::{l2_normalize, EmbeddingModel};
use super::EmbeddingError;

/// Output dimension of all-MiniLM-L6-v2.
pub const EMBEDDING_DIM: usize = 384;

/// Token window of the sentence model (all-MiniLM-L6-v2 was trained on
/// 256-token inputs; longer inputs degrade rather than help).
pub const MAX_SEQUENCE_TOKENS: usize = 256;

/// Character budget per note chunk. Clinical prose averages about four
/// characters per token, which keeps a chunk inside the token window.
pub const NOTE_CHUNK_CHARS: usize = 800;

/// Texts per forward pass.
pub const INFERENCE_BATCH_SIZE: usize = 32;

// ═══════════════════════════════════════════════════════════
// ONNX Embedder — behind `onnx-embeddings` feature
// ═══════════════════════════════════════════════════════════

#[cfg(feature = "onnx-embeddings")]
mod onnx {
    use super::{
        average_embeddings, mean_pool, note_chunks, EmbeddingError, EmbeddingModel, EMBEDDING_DIM,
        INFERENCE_BATCH_SIZE, MAX_SEQUENCE_TOKENS, NOTE_CHUNK_CHARS,
    };
    use std::path::Path;
    use std::sync::Mutex;

    use ort::session::Session;

    /// all-MiniLM-L6-v2 on ONNX Runtime, with batch-longest padding.
    ///
    /// `ort::Session::run` takes `&mut self`, hence the Mutex.
    pub struct OnnxEmbedder {
        session: Mutex<Session>,
        tokenizer: tokenizers::Tokenizer,
    }

    impl OnnxEmbedder {
        /// Load from a directory holding `model.onnx` and `tokenizer.json`.
        pub fn load(model_dir: &Path) -> Result<Self, EmbeddingError> {
            let model_path = model_dir.join("model.onnx");
            let tokenizer_path = model_dir.join("tokenizer.json");

            for path in [&model_path, &tokenizer_path] {
                if !path.exists() {
                    return Err(EmbeddingError::ModelNotFound(path.clone()));
                }
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
                    max_length: MAX_SEQUENCE_TOKENS,
                    ..Default::default()
                }))
                .map_err(|e| EmbeddingError::ModelInit(format!("Tokenizer truncation: {e}")))?;
            tokenizer.with_padding(Some(tokenizers::PaddingParams {
                strategy: tokenizers::PaddingStrategy::BatchLongest,
                ..Default::default()
            }));

            tracing::info!(model_dir = %model_dir.display(), "ONNX embedder loaded");

            Ok(Self {
                session: Mutex::new(session),
                tokenizer,
            })
        }

        /// One forward pass over a padded batch.
        fn run_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            use ort::value::TensorRef;

            if texts.is_empty() {
                return Ok(Vec::new());
            }

            let encodings = self
                .tokenizer
                .encode_batch(texts.to_vec(), true)
                .map_err(|e| EmbeddingError::Tokenization(e.to_string()))?;

            let rows = encodings.len();
            let seq_len = encodings.first().map(|e| e.len()).unwrap_or(0);

            let mut input_ids = Vec::with_capacity(rows * seq_len);
            let mut attention_mask = Vec::with_capacity(rows * seq_len);
            let mut token_type_ids = Vec::with_capacity(rows * seq_len);
            for encoding in &encodings {
                if encoding.len() != seq_len {
                    return Err(EmbeddingError::Embedding(format!(
                        "Unpadded batch row: {} tokens, expected {seq_len}",
                        encoding.len()
                    )));
                }
                input_ids.extend(encoding.get_ids().iter().map(|&id| i64::from(id)));
                attention_mask.extend(encoding.get_attention_mask().iter().map(|&m| i64::from(m)));
                token_type_ids.extend(encoding.get_type_ids().iter().map(|&t| i64::from(t)));
            }

            let shape = (rows, seq_len);
            let to_err = |e: ndarray::ShapeError| EmbeddingError::Embedding(e.to_string());
            let ids_array = ndarray::Array2::from_shape_vec(shape, input_ids).map_err(to_err)?;
            let mask_array =
                ndarray::Array2::from_shape_vec(shape, attention_mask.clone()).map_err(to_err)?;
            let type_array = ndarray::Array2::from_shape_vec(shape, token_type_ids).map_err(to_err)?;

            let tensor_err = |e: ort::Error| EmbeddingError::Embedding(e.to_string());
            let ids_tensor = TensorRef::from_array_view(&ids_array).map_err(tensor_err)?;
            let mask_tensor = TensorRef::from_array_view(&mask_array).map_err(tensor_err)?;
            let type_tensor = TensorRef::from_array_view(&type_array).map_err(tensor_err)?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| EmbeddingError::Embedding("Session lock poisoned".to_string()))?;

            let outputs = session
                .run(ort::inputs![ids_tensor, mask_tensor, type_tensor])
                .map_err(|e| EmbeddingError::Embedding(format!("ONNX inference failed: {e}")))?;

            // Last hidden state: [rows, seq_len, EMBEDDING_DIM]
            let (out_shape, hidden) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| EmbeddingError::Embedding(format!("Output extraction: {e}")))?;

            if out_shape.len() != 3 || out_shape[2] as usize != EMBEDDING_DIM {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: EMBEDDING_DIM,
                    actual: out_shape.last().map(|&d| d as usize).unwrap_or(0),
                });
            }

            mean_pool(hidden, &attention_mask, rows, seq_len, EMBEDDING_DIM)
        }
    }

    impl EmbeddingModel for OnnxEmbedder {
        /// Notes are chunked and the chunk vectors averaged.
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let chunks = note_chunks(text, NOTE_CHUNK_CHARS);
            let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
            let vectors = self.embed_batch(&refs)?;
            Ok(average_embeddings(&vectors, EMBEDDING_DIM))
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let mut vectors = Vec::with_capacity(texts.len());
            for batch in texts.chunks(INFERENCE_BATCH_SIZE) {
                vectors.extend(self.run_batch(batch)?);
            }
            Ok(vectors)
        }

        fn dimension(&self) -> usize {
            EMBEDDING_DIM
        }
    }
}

#[cfg(feature = "onnx-embeddings")]
pub use onnx::OnnxEmbedder;

// ═══════════════════════════════════════════════════════════
// Pooling and chunking
// ═══════════════════════════════════════════════════════════

/// Masked mean over token vectors, one L2-normalized vector per batch row.
///
/// `hidden` is the flattened `[rows, seq_len, dim]` output and `mask` the
/// flattened `[rows, seq_len]` attention mask; padding tokens carry mask 0.
pub fn mean_pool(
    hidden: &[f32],
    mask: &[i64],
    rows: usize,
    seq_len: usize,
    dim: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if hidden.len() != rows * seq_len * dim || mask.len() != rows * seq_len {
        return Err(EmbeddingError::Embedding(format!(
            "Output size {} does not match batch {rows}x{seq_len}x{dim}",
            hidden.len()
        )));
    }

    let pooled = (0..rows)
        .map(|row| {
            let mut pooled = vec![0.0f32; dim];
            let mut weight = 0.0f32;
            for token in 0..seq_len {
                let m = mask[row * seq_len + token] as f32;
                if m == 0.0 {
                    continue;
                }
                weight += m;
                let offset = (row * seq_len + token) * dim;
                for (p, h) in pooled.iter_mut().zip(&hidden[offset..offset + dim]) {
                    *p += h * m;
                }
            }
            if weight > 0.0 {
                pooled.iter_mut().for_each(|p| *p /= weight);
            }
            l2_normalize(&mut pooled);
            pooled
        })
        .collect();

    Ok(pooled)
}

/// Split note text into chunks of whole lines, each at most `max_chars`
/// characters. A single overlong line becomes its own chunk and is left to
/// tokenizer truncation. Always yields at least one chunk.
pub fn note_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let needed = line.chars().count() + usize::from(!current.is_empty());
        if !current.is_empty() && current.chars().count() + needed > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }

    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Normalized mean of chunk vectors.
pub fn average_embeddings(vectors: &[Vec<f32>], dim: usize) -> Vec<f32> {
    let mut mean = vec![0.0f32; dim];
    for vector in vectors {
        for (m, v) in mean.iter_mut().zip(vector) {
            *m += v;
        }
    }
    l2_normalize(&mut mean);
    mean
}

// ═══════════════════════════════════════════════════════════
// Mock
// ═══════════════════════════════════════════════════════════

/// Hashed bag-of-words embedder for tests: each lowercase word of three or
/// more characters adds 1.0 to a bucket picked by FNV-1a. Texts sharing
/// words get a positive dot product.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self {
            dimension: EMBEDDING_DIM,
        }
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self { dimension }
    }

    fn hashed(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return vec;
        }
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
        {
            let bucket = fnv1a(&word.to_lowercase()) as usize % self.dimension;
            vec[bucket] += 1.0;
        }
        l2_normalize(&mut vec);
        vec
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingModel for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.hashed(text))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.hashed(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}
