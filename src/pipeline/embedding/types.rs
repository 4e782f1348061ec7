use super::EmbeddingError;

/// Bi-encoder embedding model. Implementations return L2-normalized vectors,
/// so cosine similarity is a plain dot product.
pub trait EmbeddingModel {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
    fn dimension(&self) -> usize;
}

/// Allow `Box<dyn EmbeddingModel>` to be used as `&impl EmbeddingModel`.
impl EmbeddingModel for Box<dyn EmbeddingModel + Send + Sync> {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        (**self).embed(text)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        (**self).embed_batch(texts)
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }
}

/// Pairwise relevance scorer (cross-encoder): scores a query and a candidate
/// jointly rather than comparing independent embeddings.
pub trait RelevanceScorer {
    fn score(&self, query: &str, candidate: &str) -> Result<f32, EmbeddingError>;

    fn score_batch(&self, query: &str, candidates: &[&str]) -> Result<Vec<f32>, EmbeddingError> {
        candidates.iter().map(|c| self.score(query, c)).collect()
    }
}

/// Dot product of two equal-length vectors; 0.0 on length mismatch.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Scale a vector to unit length in place (zero vectors are left alone).
pub fn l2_normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in vec.iter_mut() {
            *val /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_of_unit_vectors_is_cosine() {
        let mut a = vec![3.0, 4.0];
        let mut b = vec![4.0, 3.0];
        l2_normalize(&mut a);
        l2_normalize(&mut b);
        assert!((dot(&a, &b) - 0.96).abs() < 1e-6);
    }

    #[test]
    fn dot_mismatched_lengths_is_zero() {
        assert_eq!(dot(&[1.0, 0.0], &[1.0]), 0.0);
    }

    #[test]
    fn normalize_leaves_zero_vector() {
        let mut v = vec![0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn traits_are_object_safe() {
        fn _assert_model(_: &dyn EmbeddingModel) {}
        fn _assert_scorer(_: &dyn RelevanceScorer) {}
    }
}
