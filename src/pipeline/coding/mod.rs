pub mod catalog;
pub mod prompt;
pub mod cpt;
pub mod units;
pub mod icd;
pub mod rerank;

pub use catalog::*;
pub use cpt::*;
pub use units::*;
pub use icd::*;
pub use rerank::*;

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::embedding::EmbeddingError;
use crate::pipeline::llm::LlmError;

/// Mapping-table problems. Always fatal: no note can be coded without a catalog.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Cannot read mapping table {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Mapping table is missing column \"{0}\"")]
    MissingColumn(String),

    #[error("Malformed mapping table: {0}")]
    Csv(#[from] csv::Error),
}

/// Failures of the CPT and ICD coding stages.
#[derive(Error, Debug)]
pub enum CodingError {
    #[error("CPT prediction failed: {0}")]
    CptPrediction(#[source] LlmError),

    #[error("ICD selection failed: {0}")]
    IcdSelection(#[source] LlmError),

    #[error("ICD ranking failed: {0}")]
    Ranking(#[from] EmbeddingError),
}

impl CodingError {
    /// Store/catalog drift is a configuration fault that every later note
    /// would hit as well.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Ranking(EmbeddingError::MissingEntry(_)))
    }
}
