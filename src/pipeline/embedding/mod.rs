pub mod types;
pub mod embedder;
pub mod cross_encoder;
pub mod store;

pub use types::*;
pub use embedder::*;
pub use cross_encoder::*;
pub use store::*;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Model initialization: {0}")]
    ModelInit(String),

    #[error("Tokenization error: {0}")]
    Tokenization(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Relevance scoring failed: {0}")]
    Scoring(String),

    #[error("Embedding store has no entry for \"{0}\"")]
    MissingEntry(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}
