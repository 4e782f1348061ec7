//! Precomputed embeddings for every ICD entry in the catalog.
//!
//! Built once before a batch starts and shared read-only by every note.
//! Coverage of the whole catalog is checked at build time, so a lookup miss
//! during a batch means the store and catalog went out of sync.

use std::collections::HashMap;

use super::types::EmbeddingModel;
use super::EmbeddingError;
use crate::pipeline::coding::catalog::CptCatalog;

/// Texts embedded per model call while building the store.
const BUILD_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone, Default)]
pub struct IcdEmbeddingStore {
    vectors: HashMap<String, Vec<f32>>,
    dimension: usize,
}

impl IcdEmbeddingStore {
    /// Embed the `"code: description"` text of every catalog ICD entry.
    pub fn build(
        catalog: &CptCatalog,
        embedder: &dyn EmbeddingModel,
    ) -> Result<Self, EmbeddingError> {
        let mut texts: Vec<String> = catalog.all_icds().map(|icd| icd.embedding_text()).collect();
        texts.sort();
        texts.dedup();

        let dimension = embedder.dimension();
        let mut vectors = HashMap::with_capacity(texts.len());

        for batch in texts.chunks(BUILD_BATCH_SIZE) {
            let refs: Vec<&str> = batch.iter().map(String::as_str).collect();
            let embeddings = embedder.embed_batch(&refs)?;
            if embeddings.len() != batch.len() {
                return Err(EmbeddingError::Embedding(format!(
                    "Embedder returned {} vectors for {} texts",
                    embeddings.len(),
                    batch.len()
                )));
            }
            for (text, vector) in batch.iter().zip(embeddings) {
                if vector.len() != dimension {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected: dimension,
                        actual: vector.len(),
                    });
                }
                vectors.insert(text.clone(), vector);
            }
        }

        tracing::info!(entries = vectors.len(), dimension, "ICD embedding store built");

        Ok(Self { vectors, dimension })
    }

    /// Build a store from precomputed vectors (e.g. a cached export).
    pub fn from_vectors(vectors: HashMap<String, Vec<f32>>, dimension: usize) -> Self {
        Self { vectors, dimension }
    }

    pub fn get(&self, text: &str) -> Result<&[f32], EmbeddingError> {
        self.vectors
            .get(text)
            .map(Vec::as_slice)
            .ok_or_else(|| EmbeddingError::MissingEntry(text.to_string()))
    }

    /// Fail on the first catalog entry the store cannot serve.
    pub fn ensure_covers(&self, catalog: &CptCatalog) -> Result<(), EmbeddingError> {
        for icd in catalog.all_icds() {
            self.get(&icd.embedding_text())?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::coding::catalog::MappingRow;
    use crate::pipeline::embedding::MockEmbedder;

    fn row(cpt: &str, icd: &str, desc: &str) -> MappingRow {
        MappingRow {
            cpt: cpt.into(),
            cpt_description: format!("{cpt} description"),
            icd_code: icd.into(),
            icd_description: desc.into(),
        }
    }

    fn catalog() -> CptCatalog {
        CptCatalog::from_rows(vec![
            row("90837", "F41.1", "Generalized anxiety disorder"),
            row("90837", "F32.9", "Major depressive disorder"),
            row("H0004", "F41.1", "Generalized anxiety disorder"),
        ])
    }

    #[test]
    fn build_covers_every_catalog_entry() {
        let catalog = catalog();
        let store = IcdEmbeddingStore::build(&catalog, &MockEmbedder::with_dimension(16)).unwrap();
        // F41.1 appears under two CPTs but is embedded once
        assert_eq!(store.len(), 2);
        assert_eq!(store.dimension(), 16);
        store.ensure_covers(&catalog).unwrap();
    }

    #[test]
    fn lookup_miss_is_reported() {
        let store = IcdEmbeddingStore::default();
        let err = store.get("F99: Mental disorder").unwrap_err();
        assert!(matches!(err, EmbeddingError::MissingEntry(ref t) if t == "F99: Mental disorder"));
    }

    #[test]
    fn coverage_check_fails_for_stale_store() {
        let store = IcdEmbeddingStore::from_vectors(
            HashMap::from([("F41.1: Generalized anxiety disorder".to_string(), vec![1.0])]),
            1,
        );
        assert!(store.ensure_covers(&catalog()).is_err());
    }

    #[test]
    fn stored_vectors_match_embedder() {
        let embedder = MockEmbedder::with_dimension(8);
        let store = IcdEmbeddingStore::build(&catalog(), &embedder).unwrap();
        let text = "F32.9: Major depressive disorder";
        assert_eq!(store.get(text).unwrap(), embedder.embed(text).unwrap().as_slice());
    }
}
