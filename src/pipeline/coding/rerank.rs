//! ICD candidate ranking: embedding preselection, optional cross-encoder
//! rerank, deduplication by code.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;

use super::catalog::IcdEntry;
use crate::pipeline::embedding::{
    dot, EmbeddingError, EmbeddingModel, IcdEmbeddingStore, RelevanceScorer,
};

/// Preselection keeps this many candidates per requested result.
const PRESELECT_FACTOR: usize = 3;

/// A scored ICD candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedIcd {
    pub code: String,
    pub description: String,
    pub similarity: f32,
    pub cross_score: Option<f32>,
}

impl RankedIcd {
    /// Cross-encoder score when available, else embedding similarity.
    pub fn best_score(&self) -> f32 {
        self.cross_score.unwrap_or(self.similarity)
    }
}

/// Models and data the ranker reads. All shared read-only across notes.
///
/// Without `embeddings` there is no preselection: candidates keep catalog
/// order (similarity 0.0) unless the cross-encoder reorders them.
pub struct Ranker<'a> {
    pub embeddings: Option<(&'a dyn EmbeddingModel, &'a IcdEmbeddingStore)>,
    pub cross_encoder: Option<&'a dyn RelevanceScorer>,
}

impl Ranker<'_> {
    /// Rank candidates against a note and return at most `top_k`, best first,
    /// one entry per ICD code.
    ///
    /// A candidate missing from the embedding store is an error; the store is
    /// expected to cover the whole catalog.
    pub fn rerank(
        &self,
        note_text: &str,
        candidates: &[IcdEntry],
        top_k: usize,
    ) -> Result<Vec<RankedIcd>, EmbeddingError> {
        if candidates.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let mut scored = match self.embeddings {
            Some((embedder, store)) => preselect(note_text, candidates, top_k, embedder, store)?,
            None => dedupe_by_code(candidates.iter().map(unscored).collect()),
        };

        if let Some(scorer) = self.cross_encoder {
            let texts: Vec<String> = scored
                .iter()
                .map(|r| format!("{}: {}", r.code, r.description))
                .collect();
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            let cross = scorer.score_batch(note_text, &refs)?;
            for (ranked, score) in scored.iter_mut().zip(cross) {
                ranked.cross_score = Some(score);
            }
            scored.sort_by(|a, b| descending(a.best_score(), b.best_score()));
        }

        // Stable sort: equal scores keep candidate order.
        let mut ranked = dedupe_by_code(scored);
        ranked.sort_by(|a, b| descending(a.best_score(), b.best_score()));
        ranked.truncate(top_k);
        Ok(ranked)
    }
}

/// Score every candidate by cosine similarity to the note and keep the best
/// `PRESELECT_FACTOR * top_k`.
fn preselect(
    note_text: &str,
    candidates: &[IcdEntry],
    top_k: usize,
    embedder: &dyn EmbeddingModel,
    store: &IcdEmbeddingStore,
) -> Result<Vec<RankedIcd>, EmbeddingError> {
    let note_embedding = embedder.embed(note_text)?;

    let mut scored = candidates
        .iter()
        .map(|candidate| {
            let vector = store.get(&candidate.embedding_text())?;
            Ok(RankedIcd {
                similarity: dot(&note_embedding, vector),
                ..unscored(candidate)
            })
        })
        .collect::<Result<Vec<_>, EmbeddingError>>()?;

    scored.sort_by(|a, b| descending(a.similarity, b.similarity));
    scored.truncate(PRESELECT_FACTOR.saturating_mul(top_k).min(candidates.len()));
    Ok(scored)
}

fn unscored(candidate: &IcdEntry) -> RankedIcd {
    RankedIcd {
        code: candidate.code.clone(),
        description: candidate.description.clone(),
        similarity: 0.0,
        cross_score: None,
    }
}

/// Keep one entry per ICD code: the one with the higher best score.
/// First-occurrence order is preserved.
fn dedupe_by_code(ranked: Vec<RankedIcd>) -> Vec<RankedIcd> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<RankedIcd> = Vec::with_capacity(ranked.len());

    for entry in ranked {
        match slots.get(&entry.code) {
            Some(&slot) => {
                if entry.best_score() > out[slot].best_score() {
                    out[slot] = entry;
                }
            }
            None => {
                slots.insert(entry.code.clone(), out.len());
                out.push(entry);
            }
        }
    }

    out
}

/// Descending under IEEE total order; a NaN score sorts first.
fn descending(a: f32, b: f32) -> Ordering {
    b.total_cmp(&a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::embedding::TokenOverlapScorer;

    /// Embeds into 3 axes: anxiety, depression, sleep.
    struct AxisEmbedder;

    impl EmbeddingModel for AxisEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let lower = text.to_lowercase();
            let mut v = vec![
                lower.matches("anxi").count() as f32,
                lower.matches("depress").count() as f32,
                lower.matches("sleep").count() as f32 + lower.matches("insomnia").count() as f32,
            ];
            v.iter_mut().for_each(|x| *x += 0.1);
            crate::pipeline::embedding::l2_normalize(&mut v);
            Ok(v)
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    fn candidates() -> Vec<IcdEntry> {
        vec![
            IcdEntry::new("G47.00", "Insomnia, unspecified"),
            IcdEntry::new("F41.1", "Generalized anxiety disorder"),
            IcdEntry::new("F32.9", "Major depressive disorder"),
            IcdEntry::new("F41.1", "Generalized anxiety disorder"),
            IcdEntry::new("F41.9", "Anxiety disorder, unspecified"),
        ]
    }

    fn store_for(entries: &[IcdEntry]) -> IcdEmbeddingStore {
        let vectors = entries
            .iter()
            .map(|e| {
                let text = e.embedding_text();
                let v = AxisEmbedder.embed(&text).unwrap();
                (text, v)
            })
            .collect();
        IcdEmbeddingStore::from_vectors(vectors, 3)
    }

    #[test]
    fn sorted_descending_without_duplicates() {
        let cands = candidates();
        let store = store_for(&cands);
        let ranker = Ranker {
            embeddings: Some((&AxisEmbedder, &store)),
            cross_encoder: None,
        };
        let ranked = ranker
            .rerank("Client reports anxiety and worry, anxious most days", &cands, 5)
            .unwrap();

        let codes: Vec<&str> = ranked.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes.len(), 4);
        let unique: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
        assert!(ranked.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        assert!(codes[0].starts_with("F41"));
    }

    #[test]
    fn truncates_to_top_k() {
        let cands = candidates();
        let store = store_for(&cands);
        let ranker = Ranker {
            embeddings: Some((&AxisEmbedder, &store)),
            cross_encoder: None,
        };
        let ranked = ranker.rerank("trouble with sleep", &cands, 1).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].code, "G47.00");
    }

    #[test]
    fn deterministic_for_fixed_inputs() {
        let cands = candidates();
        let store = store_for(&cands);
        let ranker = Ranker {
            embeddings: Some((&AxisEmbedder, &store)),
            cross_encoder: None,
        };
        let a = ranker.rerank("depressed mood, poor sleep", &cands, 3).unwrap();
        let b = ranker.rerank("depressed mood, poor sleep", &cands, 3).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn cross_encoder_decides_final_order() {
        let cands = candidates();
        let store = store_for(&cands);
        let scorer = TokenOverlapScorer;
        let ranker = Ranker {
            embeddings: Some((&AxisEmbedder, &store)),
            cross_encoder: Some(&scorer),
        };
        let ranked = ranker
            .rerank("Generalized anxiety disorder symptoms persist", &cands, 5)
            .unwrap();
        assert_eq!(ranked[0].code, "F41.1");
        assert!(ranked.iter().all(|r| r.cross_score.is_some()));
        assert!(ranked.windows(2).all(|w| w[0].best_score() >= w[1].best_score()));
    }

    #[test]
    fn missing_store_entry_is_an_error() {
        let cands = candidates();
        let store = IcdEmbeddingStore::default();
        let ranker = Ranker {
            embeddings: Some((&AxisEmbedder, &store)),
            cross_encoder: None,
        };
        let err = ranker.rerank("anxiety", &cands, 5).unwrap_err();
        assert!(matches!(err, EmbeddingError::MissingEntry(_)));
    }

    #[test]
    fn empty_candidates_rank_to_empty() {
        let store = IcdEmbeddingStore::default();
        let ranker = Ranker {
            embeddings: Some((&AxisEmbedder, &store)),
            cross_encoder: None,
        };
        assert!(ranker.rerank("anything", &[], 5).unwrap().is_empty());
    }

    #[test]
    fn dedupe_keeps_higher_score() {
        let low = RankedIcd {
            code: "F41.1".into(),
            description: "GAD".into(),
            similarity: 0.2,
            cross_score: None,
        };
        let high = RankedIcd {
            similarity: 0.9,
            ..low.clone()
        };
        let out = dedupe_by_code(vec![low, high]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].similarity, 0.9);
    }

    #[test]
    fn without_embeddings_keeps_catalog_order() {
        let cands = candidates();
        let ranker = Ranker {
            embeddings: None,
            cross_encoder: None,
        };
        let ranked = ranker.rerank("anxiety and worry", &cands, 3).unwrap();
        let codes: Vec<&str> = ranked.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["G47.00", "F41.1", "F32.9"]);
        assert!(ranked.iter().all(|r| r.similarity == 0.0));
    }

    #[test]
    fn without_embeddings_cross_encoder_still_orders() {
        let cands = candidates();
        let scorer = TokenOverlapScorer;
        let ranker = Ranker {
            embeddings: None,
            cross_encoder: Some(&scorer),
        };
        let ranked = ranker
            .rerank("Generalized anxiety disorder symptoms persist", &cands, 5)
            .unwrap();
        assert_eq!(ranked.len(), 4);
        assert_eq!(ranked[0].code, "F41.1");
    }

    #[test]
    fn unbounded_top_k_returns_every_code() {
        let cands = candidates();
        let store = store_for(&cands);
        let ranker = Ranker {
            embeddings: Some((&AxisEmbedder, &store)),
            cross_encoder: None,
        };
        let ranked = ranker.rerank("anxiety", &cands, usize::MAX).unwrap();
        assert_eq!(ranked.len(), 4);
    }

    /// Scores "F32.9" as NaN and everything else by text length.
    struct NanScorer;

    impl RelevanceScorer for NanScorer {
        fn score(&self, _query: &str, candidate: &str) -> Result<f32, EmbeddingError> {
            if candidate.starts_with("F32.9") {
                Ok(f32::NAN)
            } else {
                Ok(candidate.len() as f32)
            }
        }
    }

    #[test]
    fn nan_scores_sort_deterministically() {
        let cands = candidates();
        let ranker = Ranker {
            embeddings: None,
            cross_encoder: Some(&NanScorer),
        };
        let a = ranker.rerank("anything", &cands, 5).unwrap();
        let b = ranker.rerank("anything", &cands, 5).unwrap();
        let codes = |r: &[RankedIcd]| r.iter().map(|x| x.code.clone()).collect::<Vec<_>>();
        assert_eq!(codes(&a), codes(&b));
        assert_eq!(a.len(), 4);
        // positive NaN is the greatest value under total order
        assert_eq!(a[0].code, "F32.9");
        let finite: Vec<f32> = a[1..].iter().map(|r| r.best_score()).collect();
        assert!(finite.windows(2).all(|w| w[0] >= w[1]));
    }
}
