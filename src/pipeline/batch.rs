use std::time::Instant;

use serde::Serialize;

use super::processor::{NoteOutcome, PipelineContext, PipelineError};
use super::types::ClinicalNote;

/// Rows and audits for a batch, in input order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub outcomes: Vec<NoteOutcome>,
    pub notes_errored: u32,
    pub duration_ms: u64,
}

impl BatchResult {
    pub fn rows(&self) -> impl Iterator<Item = &super::types::BillingRow> {
        self.outcomes.iter().map(|o| &o.row)
    }
}

/// Process notes sequentially, one row per note.
///
/// A per-note failure becomes an error row and the batch continues. A fatal
/// error (store/catalog drift) aborts the batch and is returned.
pub fn process_batch(
    ctx: &PipelineContext,
    notes: &[ClinicalNote],
) -> Result<BatchResult, PipelineError> {
    let start = Instant::now();
    let mut result = BatchResult {
        outcomes: Vec::with_capacity(notes.len()),
        ..Default::default()
    };

    tracing::info!(notes = notes.len(), "Batch started");

    for note in notes {
        let outcome = ctx.process_note(note)?;
        if outcome.row.is_error() {
            result.notes_errored += 1;
        }
        result.outcomes.push(outcome);
    }

    result.duration_ms = start.elapsed().as_millis() as u64;

    tracing::info!(
        notes = result.outcomes.len(),
        errored = result.notes_errored,
        duration_ms = result.duration_ms,
        "Batch complete"
    );

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::MockLlmClient;
    use crate::pipeline::processor::tests::{context, PSYCH_NOTE, STANDARD_NOTE};

    #[test]
    fn one_row_per_note_in_order() {
        let llm = MockLlmClient::scripted(vec![
            "{\"CPT\": [\"90837\"]}",
            "{\"ICD10\": [\"F41.1\"]}",
        ]);
        let ctx = context(llm);
        let notes = vec![
            ClinicalNote::new("first.txt", STANDARD_NOTE),
            ClinicalNote::new("eval.txt", PSYCH_NOTE),
            ClinicalNote::new("empty.txt", ""),
        ];

        let result = process_batch(&ctx, &notes).unwrap();
        assert_eq!(result.outcomes.len(), 3);
        let filenames: Vec<&str> = result
            .outcomes
            .iter()
            .map(|o| o.audit.filename.as_str())
            .collect();
        assert_eq!(filenames, vec!["first.txt", "eval.txt", "empty.txt"]);
        assert_eq!(result.rows().count(), 3);
    }

    #[test]
    fn per_note_failures_do_not_stop_the_batch() {
        let ctx = context(MockLlmClient::failing("connection refused"));
        let notes = vec![
            ClinicalNote::new("a.txt", STANDARD_NOTE),
            ClinicalNote::new("b.txt", PSYCH_NOTE),
            ClinicalNote::new("c.txt", STANDARD_NOTE),
        ];

        let result = process_batch(&ctx, &notes).unwrap();
        assert_eq!(result.outcomes.len(), 3);
        assert_eq!(result.notes_errored, 2);
        assert!(!result.outcomes[1].row.is_error());
    }

    #[test]
    fn empty_batch_is_empty() {
        let ctx = context(MockLlmClient::new(""));
        let result = process_batch(&ctx, &[]).unwrap();
        assert!(result.outcomes.is_empty());
        assert_eq!(result.notes_errored, 0);
    }
}
