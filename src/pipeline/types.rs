use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::coding::RankedIcd;
use super::normalize::normalize;
use super::phi::PhiRecord;
use super::psych::PsychEval;
use super::validation::ValidationResult;

/// Fixed appointment type for every row.
pub const APPOINTMENT_TYPE: &str = "Therapy Session";
/// Rows are drafts until a biller reviews them.
pub const NOTE_STATUS_PENDING: &str = "Pending";
pub const STATUS_ON_HOLD: &str = "On Hold";
pub const STATUS_ERROR: &str = "Error";

/// One clinical note as handed to the pipeline.
#[derive(Debug, Clone)]
pub struct ClinicalNote {
    /// Correlates log lines for this note; never derived from its content.
    pub id: Uuid,
    pub filename: String,
    raw_text: String,
    clean_text: String,
}

impl ClinicalNote {
    pub fn new(filename: impl Into<String>, raw_text: impl Into<String>) -> Self {
        let raw_text = raw_text.into();
        let clean_text = normalize(&raw_text);
        Self {
            id: Uuid::new_v4(),
            filename: filename.into(),
            raw_text,
            clean_text,
        }
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    /// De-identified working copy. The only text sent to models.
    pub fn clean_text(&self) -> &str {
        &self.clean_text
    }
}

/// One output row. Field order is the column order of the export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingRow {
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Appointment Type")]
    pub appointment_type: String,
    #[serde(rename = "Client Name")]
    pub client_name: String,
    #[serde(rename = "DOB")]
    pub dob: String,
    #[serde(rename = "Service Code")]
    pub service_code: String,
    #[serde(rename = "Primary Diagnosis")]
    pub primary_diagnosis: String,
    #[serde(rename = "Service Description")]
    pub service_description: String,
    #[serde(rename = "Clinician Name")]
    pub clinician_name: String,
    #[serde(rename = "POS")]
    pub pos: String,
    #[serde(rename = "Modifier")]
    pub modifier: String,
    #[serde(rename = "Coding")]
    pub coding: String,
    #[serde(rename = "Note Status")]
    pub note_status: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Comments")]
    pub comments: String,
}

impl BillingRow {
    /// Row skeleton with the PHI-derived columns filled in.
    pub fn from_phi(phi: &PhiRecord) -> Self {
        Self {
            date: phi.date.clone().unwrap_or_default(),
            appointment_type: APPOINTMENT_TYPE.to_string(),
            client_name: phi.patient.clone().unwrap_or_default(),
            dob: phi.dob.clone().unwrap_or_default(),
            service_code: phi.service_code.clone().unwrap_or_default(),
            primary_diagnosis: phi.diagnosis_codes.join(", "),
            clinician_name: phi.clinician.clone().unwrap_or_default(),
            pos: phi.pos.clone(),
            modifier: phi.modifier.clone(),
            note_status: NOTE_STATUS_PENDING.to_string(),
            status: STATUS_ON_HOLD.to_string(),
            ..Default::default()
        }
    }

    /// Mark the row as failed; the reason replaces any review comment.
    pub fn mark_error(&mut self, reason: &str) {
        self.status = STATUS_ERROR.to_string();
        self.comments = reason.to_string();
    }

    pub fn is_error(&self) -> bool {
        self.status == STATUS_ERROR
    }
}

/// Which branch coded the note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodingPath {
    Standard,
    PsychEval,
}

/// Intermediate results kept beside each row for debugging and review.
#[derive(Debug, Clone, Serialize)]
pub struct NoteAudit {
    pub note_id: Uuid,
    pub filename: String,
    pub path: CodingPath,
    pub validation: ValidationResult,
    pub predicted_cpts: Vec<String>,
    pub rejected_cpts: Vec<String>,
    pub orphaned_add_ons: Vec<String>,
    pub cpt_lines: Vec<String>,
    pub ranked_icds: Vec<RankedIcd>,
    pub final_icds: Vec<String>,
    pub rejected_icds: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub psych_eval: Option<PsychEval>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NoteAudit {
    pub fn new(note: &ClinicalNote, path: CodingPath, validation: ValidationResult) -> Self {
        Self {
            note_id: note.id,
            filename: note.filename.clone(),
            path,
            validation,
            predicted_cpts: Vec::new(),
            rejected_cpts: Vec::new(),
            orphaned_add_ons: Vec::new(),
            cpt_lines: Vec::new(),
            ranked_icds: Vec::new(),
            final_icds: Vec::new(),
            rejected_icds: Vec::new(),
            psych_eval: None,
            error: None,
        }
    }
}
