pub mod normalize;
pub mod phi;
pub mod validation;
pub mod llm;
pub mod embedding;
pub mod coding;
pub mod psych;
pub mod types;
pub mod processor; // Per-note orchestrator
pub mod batch;

pub use batch::{process_batch, BatchResult};
pub use processor::{NoteOutcome, PipelineContext, PipelineError, PipelineSettings};
pub use types::{BillingRow, ClinicalNote, NoteAudit};
