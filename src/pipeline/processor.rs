//! Per-note coding orchestrator.
//!
//! Drives one note through normalization, PHI extraction, validation and
//! either the standard CPT/ICD path or the psych-eval path, producing one
//! billing row plus its audit trail.
//!
//! All models and shared data live in a [`PipelineContext`] built once per
//! batch. Engines are injected as trait objects so the orchestrator runs the
//! same against Ollama/ONNX and the mock implementations.

use serde::Serialize;

use crate::pipeline::coding::{
    compute_units, icd_candidates, predict_cpt, select_final_icds, CatalogError, CodingError,
    CptCatalog, Ranker,
};
use crate::pipeline::embedding::{
    EmbeddingError, EmbeddingModel, IcdEmbeddingStore, RelevanceScorer,
};
use crate::pipeline::llm::{LlmClient, LlmError};
use crate::pipeline::phi::{self, PhiRecord};
use crate::pipeline::psych::{extract_eval, is_psych_eval, EVAL_REVIEW_COMMENT};
use crate::pipeline::types::{BillingRow, ClinicalNote, CodingPath, NoteAudit};
use crate::pipeline::validation::{validate, ValidationResult};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Model server check failed: {0}")]
    Startup(#[source] LlmError),

    #[error("Embedding store does not match the catalog: {0}")]
    StoreMismatch(#[source] EmbeddingError),

    #[error("Mapping table error: {0}")]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Coding(#[from] CodingError),
}

impl PipelineError {
    /// Whether the error stops the whole batch rather than a single note.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Coding(e) => e.is_fatal(),
            Self::Startup(_) | Self::StoreMismatch(_) | Self::Catalog(_) => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Tunables for the coding stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub model_name: String,
    /// ICD shortlist size handed to the final selection call.
    pub top_k: usize,
    /// Extra attempts for a failed structured model call.
    pub max_retries: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            model_name: "medgemma:latest".to_string(),
            top_k: 5,
            max_retries: 2,
        }
    }
}

/// Sentence embedder plus the ICD vectors it produced.
struct IcdEmbeddings {
    embedder: Box<dyn EmbeddingModel + Send + Sync>,
    store: IcdEmbeddingStore,
}

/// Models, catalog and embedding store shared read-only by every note.
pub struct PipelineContext {
    llm: Box<dyn LlmClient + Send + Sync>,
    embeddings: Option<IcdEmbeddings>,
    cross_encoder: Option<Box<dyn RelevanceScorer + Send + Sync>>,
    catalog: CptCatalog,
    settings: PipelineSettings,
}

impl PipelineContext {
    /// Assemble the context and check that the model server serves the
    /// configured model.
    ///
    /// Without [`with_embeddings`](Self::with_embeddings) ICD shortlists are
    /// taken in catalog order.
    pub fn new(
        llm: Box<dyn LlmClient + Send + Sync>,
        catalog: CptCatalog,
        settings: PipelineSettings,
    ) -> Result<Self, PipelineError> {
        let available = llm
            .is_model_available(&settings.model_name)
            .map_err(PipelineError::Startup)?;
        if !available {
            return Err(PipelineError::Startup(LlmError::ModelUnavailable(
                settings.model_name.clone(),
            )));
        }

        tracing::info!(
            model = %settings.model_name,
            cpt_codes = catalog.len(),
            top_k = settings.top_k,
            "Pipeline context ready"
        );

        Ok(Self {
            llm,
            embeddings: None,
            cross_encoder: None,
            catalog,
            settings,
        })
    }

    /// Preselect ICD candidates by embedding similarity.
    ///
    /// Fails when the store was built by a model of another dimension or
    /// cannot serve every ICD entry in the catalog.
    pub fn with_embeddings(
        mut self,
        embedder: Box<dyn EmbeddingModel + Send + Sync>,
        store: IcdEmbeddingStore,
    ) -> Result<Self, PipelineError> {
        if !store.is_empty() && store.dimension() != embedder.dimension() {
            return Err(PipelineError::StoreMismatch(
                EmbeddingError::DimensionMismatch {
                    expected: embedder.dimension(),
                    actual: store.dimension(),
                },
            ));
        }
        store
            .ensure_covers(&self.catalog)
            .map_err(PipelineError::StoreMismatch)?;

        tracing::info!(
            icd_entries = store.len(),
            dimension = store.dimension(),
            "ICD embedding preselection enabled"
        );

        self.embeddings = Some(IcdEmbeddings { embedder, store });
        Ok(self)
    }

    /// Rerank ICD shortlists with a cross-encoder.
    pub fn with_cross_encoder(mut self, scorer: Box<dyn RelevanceScorer + Send + Sync>) -> Self {
        self.cross_encoder = Some(scorer);
        self
    }

    pub fn catalog(&self) -> &CptCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn ranker(&self) -> Ranker<'_> {
        Ranker {
            embeddings: self
                .embeddings
                .as_ref()
                .map(|e| (&*e.embedder as &dyn EmbeddingModel, &e.store)),
            cross_encoder: self
                .cross_encoder
                .as_deref()
                .map(|s| s as &dyn RelevanceScorer),
        }
    }

    // -----------------------------------------------------------------------
    // Per-note processing
    // -----------------------------------------------------------------------

    /// Code one note.
    ///
    /// Model failures for this note are folded into the row (Status "Error",
    /// reason in Comments). Only batch-fatal errors are returned.
    pub fn process_note(&self, note: &ClinicalNote) -> Result<NoteOutcome, PipelineError> {
        let span = tracing::info_span!("process_note", note_id = %note.id, filename = %note.filename);
        let _guard = span.enter();

        let record = phi::extract(note.raw_text());
        let validation = validate(note.clean_text());
        let mut row = BillingRow::from_phi(&record);

        let service_code = record.service_code.as_deref().unwrap_or_default();
        if is_psych_eval(service_code) {
            return Ok(self.code_psych_eval(note, service_code, validation, row));
        }

        let mut audit = NoteAudit::new(note, CodingPath::Standard, validation);

        match self.code_standard(note, &record, &mut audit) {
            Ok(()) => {
                row.coding = format!(
                    "{}--{}",
                    audit.cpt_lines.join(", "),
                    audit.final_icds.join(", ")
                );
                row.service_description = self.service_descriptions(&audit.predicted_cpts);
                row.comments = review_comments(&audit);
                tracing::info!(
                    cpts = audit.predicted_cpts.len(),
                    icds = audit.final_icds.len(),
                    status = audit.validation.status.as_str(),
                    "Note coded"
                );
            }
            Err(e) if e.is_fatal() => {
                tracing::error!(error = %e, "Fatal error while coding note");
                return Err(e.into());
            }
            Err(e) => {
                tracing::warn!(error = %e, "Note coding failed");
                row.mark_error(&e.to_string());
                audit.error = Some(e.to_string());
            }
        }

        Ok(NoteOutcome { row, audit })
    }

    /// CPT prediction, units, ICD ranking and final selection.
    ///
    /// The audit is filled stage by stage so a failure keeps what was
    /// produced before it.
    fn code_standard(
        &self,
        note: &ClinicalNote,
        record: &PhiRecord,
        audit: &mut NoteAudit,
    ) -> Result<(), CodingError> {
        let llm: &dyn LlmClient = &*self.llm;
        let model = &self.settings.model_name;
        let clean = note.clean_text();

        let prediction = predict_cpt(llm, model, clean, self.settings.max_retries)
            .map_err(CodingError::CptPrediction)?;
        audit.cpt_lines = compute_units(&prediction.codes, record.duration.as_deref());
        audit.predicted_cpts = prediction.codes;
        audit.rejected_cpts = prediction.rejected;
        audit.orphaned_add_ons = prediction.orphaned_add_ons;

        let candidates = icd_candidates(&audit.predicted_cpts, &self.catalog);
        let ranked = self
            .ranker()
            .rerank(clean, &candidates, self.settings.top_k)?;
        tracing::debug!(
            candidates = candidates.len(),
            shortlisted = ranked.len(),
            "ICD candidates ranked"
        );
        audit.ranked_icds = ranked.clone();

        let selection = select_final_icds(
            llm,
            model,
            clean,
            &audit.predicted_cpts,
            ranked,
            self.settings.max_retries,
        )
        .map_err(CodingError::IcdSelection)?;
        audit.final_icds = selection.codes;
        audit.rejected_icds = selection.rejected;

        Ok(())
    }

    fn code_psych_eval(
        &self,
        note: &ClinicalNote,
        service_code: &str,
        validation: ValidationResult,
        mut row: BillingRow,
    ) -> NoteOutcome {
        let eval = extract_eval(note.raw_text());

        row.coding = eval.coding();
        row.service_description = self
            .catalog
            .description(service_code)
            .unwrap_or_default()
            .to_string();
        row.comments = EVAL_REVIEW_COMMENT.to_string();

        tracing::info!(
            service_code,
            total_time = eval.total_time,
            units = eval.units,
            "Psych evaluation coded"
        );

        let mut audit = NoteAudit::new(note, CodingPath::PsychEval, validation);
        audit.psych_eval = Some(eval);
        NoteOutcome { row, audit }
    }

    fn service_descriptions(&self, cpts: &[String]) -> String {
        cpts.iter()
            .filter_map(|code| self.catalog.description(code))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Row and audit trail for one note.
#[derive(Debug, Clone, Serialize)]
pub struct NoteOutcome {
    pub row: BillingRow,
    pub audit: NoteAudit,
}

/// Comments for a standard-path row: missing sections, then any model codes
/// that were thrown out.
fn review_comments(audit: &NoteAudit) -> String {
    let mut parts = Vec::new();

    let missing = audit.validation.comment();
    if !missing.is_empty() {
        parts.push(missing);
    }
    if !audit.rejected_cpts.is_empty() {
        parts.push(format!("Rejected CPT: {}", audit.rejected_cpts.join(", ")));
    }
    if !audit.rejected_icds.is_empty() {
        parts.push(format!("Rejected ICD-10: {}", audit.rejected_icds.join(", ")));
    }

    parts.join("; ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
