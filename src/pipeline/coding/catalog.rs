//! CPT -> ICD-10 catalog built once from the practice's mapping table.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::CatalogError;

/// Columns the mapping table must carry.
pub const REQUIRED_COLUMNS: [&str; 4] = ["CPT", "CPT Description", "ICD-10 Code", "ICD-10 Description"];

/// One row of the mapping table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MappingRow {
    #[serde(rename = "CPT")]
    pub cpt: String,
    #[serde(rename = "CPT Description")]
    pub cpt_description: String,
    #[serde(rename = "ICD-10 Code")]
    pub icd_code: String,
    #[serde(rename = "ICD-10 Description")]
    pub icd_description: String,
}

/// An ICD-10 code applicable to a CPT, with its description.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IcdEntry {
    pub code: String,
    pub description: String,
}

impl IcdEntry {
    pub fn new(code: &str, description: &str) -> Self {
        Self {
            code: code.to_string(),
            description: description.to_string(),
        }
    }

    /// Text embedded for similarity search and shown to the cross-encoder.
    pub fn embedding_text(&self) -> String {
        format!("{}: {}", self.code, self.description)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CptCatalogEntry {
    pub code: String,
    pub description: String,
    pub applicable_icds: Vec<IcdEntry>,
}

/// Read-only CPT catalog, in mapping-table order.
#[derive(Debug, Clone, Default)]
pub struct CptCatalog {
    entries: Vec<CptCatalogEntry>,
    index: HashMap<String, usize>,
}

impl CptCatalog {
    /// Group mapping rows by CPT. The first row seen for a CPT supplies its
    /// description; ICD entries keep table order, duplicates included.
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = MappingRow>,
    {
        let mut catalog = Self::default();

        for row in rows {
            let cpt = row.cpt.trim().to_string();
            if cpt.is_empty() {
                continue;
            }
            let icd = IcdEntry::new(row.icd_code.trim(), row.icd_description.trim());

            let slot = match catalog.index.get(&cpt) {
                Some(&slot) => slot,
                None => {
                    catalog.entries.push(CptCatalogEntry {
                        code: cpt.clone(),
                        description: row.cpt_description.trim().to_string(),
                        applicable_icds: Vec::new(),
                    });
                    let slot = catalog.entries.len() - 1;
                    catalog.index.insert(cpt, slot);
                    slot
                }
            };

            if !icd.code.is_empty() {
                catalog.entries[slot].applicable_icds.push(icd);
            }
        }

        catalog
    }

    /// Load a mapping table from CSV. Missing columns are fatal.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, CatalogError> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

        let headers = reader.headers()?.clone();
        for column in REQUIRED_COLUMNS {
            if !headers.iter().any(|h| h == column) {
                return Err(CatalogError::MissingColumn(column.to_string()));
            }
        }

        let rows = reader
            .deserialize::<MappingRow>()
            .collect::<Result<Vec<_>, _>>()?;

        let catalog = Self::from_rows(rows);
        tracing::info!(
            cpt_codes = catalog.len(),
            icd_entries = catalog.icd_entry_count(),
            "CPT catalog loaded"
        );
        Ok(catalog)
    }

    pub fn from_csv_path(path: &Path) -> Result<Self, CatalogError> {
        let file = std::fs::File::open(path).map_err(|e| CatalogError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_csv_reader(file)
    }

    pub fn get(&self, cpt: &str) -> Option<&CptCatalogEntry> {
        self.index.get(cpt).map(|&slot| &self.entries[slot])
    }

    pub fn description(&self, cpt: &str) -> Option<&str> {
        self.get(cpt).map(|entry| entry.description.as_str())
    }

    pub fn entries(&self) -> &[CptCatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn icd_entry_count(&self) -> usize {
        self.entries.iter().map(|e| e.applicable_icds.len()).sum()
    }

    /// Every ICD entry in the catalog, across all CPTs.
    pub fn all_icds(&self) -> impl Iterator<Item = &IcdEntry> {
        self.entries.iter().flat_map(|e| e.applicable_icds.iter())
    }
}
