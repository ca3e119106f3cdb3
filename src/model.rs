//! Domain types for the harvest engine
//!
//! This module defines the data shapes exchanged with the portal and the
//! identifiers derived from them:
//! - Geographic scopes (state or state+municipality) and their file prefixes
//! - The paged search envelope and the records inside it
//! - State/municipality listing entries
//! - Resume checkpoints

use serde::{Deserialize, Serialize};
use std::fmt;

/// A search scope: one state, optionally narrowed to one municipality.
///
/// Names are carried for logging only; two scopes are equal when their
/// numeric identifiers match, regardless of display names.
#[derive(Debug, Clone)]
pub struct Scope {
    pub state_id: i64,
    pub state_name: String,
    pub municipality_id: Option<i64>,
    pub municipality_name: Option<String>,
}

impl Scope {
    /// Creates a state-level scope
    pub fn state(state_id: i64, state_name: impl Into<String>) -> Self {
        Self {
            state_id,
            state_name: state_name.into(),
            municipality_id: None,
            municipality_name: None,
        }
    }

    /// Creates a municipality-level scope within a state
    pub fn municipality(
        state_id: i64,
        state_name: impl Into<String>,
        municipality_id: i64,
        municipality_name: impl Into<String>,
    ) -> Self {
        Self {
            state_id,
            state_name: state_name.into(),
            municipality_id: Some(municipality_id),
            municipality_name: Some(municipality_name.into()),
        }
    }

    /// File-name prefix shared by every page saved for this scope.
    ///
    /// Format: `uf_{state_id}` or `uf_{state_id}_municipio_{municipality_id}`,
    /// matching the layout of previously harvested data sets.
    pub fn file_prefix(&self) -> String {
        match self.municipality_id {
            Some(municipality_id) => {
                format!("uf_{}_municipio_{}", self.state_id, municipality_id)
            }
            None => format!("uf_{}", self.state_id),
        }
    }

    /// File name for one result page fetched at the given size.
    ///
    /// The size in the name is the size the successful request asked for, so
    /// a later run requesting the same sizes finds the file again.
    pub fn page_file_name(&self, page: u32, size: u32) -> String {
        format!("{}_page_{}_size_{}.json", self.file_prefix(), page, size)
    }

    /// The checkpoint that resumes at this scope
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            state_id: self.state_id,
            municipality_id: self.municipality_id,
        }
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.state_id == other.state_id && self.municipality_id == other.municipality_id
    }
}

impl Eq for Scope {}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state {} ({})", self.state_id, self.state_name)?;
        if let Some(municipality_id) = self.municipality_id {
            let name = self.municipality_name.as_deref().unwrap_or("?");
            write!(f, ", municipality {} ({})", municipality_id, name)?;
        }
        Ok(())
    }
}

/// One page of search results, as returned by the portal's filter endpoint.
///
/// The envelope follows the Spring Data page shape. Fields the engine does
/// not interpret are preserved in `extra`; the raw response bytes are what
/// gets persisted, so nothing here is ever re-serialized to disk.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResultPage {
    #[serde(default)]
    pub content: Vec<WarrantRecord>,

    #[serde(rename = "totalPages", default = "default_total_pages")]
    pub total_pages: u32,

    #[serde(rename = "totalElements", default)]
    pub total_elements: u64,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_total_pages() -> u32 {
    1
}

impl ResultPage {
    /// Number of records the server actually returned on this page
    pub fn effective_size(&self) -> usize {
        self.content.len()
    }
}

/// One warrant record from a result page.
///
/// Only the two fields the engine acts on are extracted; everything else the
/// upstream sends rides along opaquely in `extra`. Both extracted fields are
/// optional so a schema change upstream degrades to per-record errors rather
/// than failing the whole page.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WarrantRecord {
    #[serde(default)]
    pub id: Option<i64>,

    #[serde(rename = "idTipoPeca", default)]
    pub piece_type_id: Option<i64>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl WarrantRecord {
    /// The key that addresses this record's PDF certificate, if both parts
    /// are present
    pub fn certificate_key(&self) -> Option<CertificateKey> {
        Some(CertificateKey {
            certificate_id: self.id?,
            piece_type_id: self.piece_type_id?,
        })
    }
}

/// Identifies one downloadable PDF certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertificateKey {
    pub certificate_id: i64,
    pub piece_type_id: i64,
}

impl CertificateKey {
    /// File name the certificate is stored under
    pub fn file_name(&self) -> String {
        format!(
            "certidao_{}_tipo_{}.pdf",
            self.certificate_id, self.piece_type_id
        )
    }
}

/// One entry from the state listing endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct StateEntry {
    #[serde(default)]
    pub id: Option<i64>,

    #[serde(rename = "nome", default)]
    pub name: Option<String>,

    #[serde(rename = "sigla", default)]
    pub abbreviation: Option<String>,
}

impl StateEntry {
    /// Human-readable name, falling back to the abbreviation and then to a
    /// synthetic `UF_{id}` label
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if let Some(abbreviation) = &self.abbreviation {
            return abbreviation.clone();
        }
        match self.id {
            Some(id) => format!("UF_{}", id),
            None => "UF_?".to_string(),
        }
    }
}

/// One entry from the municipality listing endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct MunicipalityEntry {
    #[serde(default)]
    pub id: Option<i64>,

    #[serde(rename = "nome", default)]
    pub name: Option<String>,
}

impl MunicipalityEntry {
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match self.id {
            Some(id) => format!("Municipio_{}", id),
            None => "Municipio_?".to_string(),
        }
    }
}

/// Where to pick a harvest back up.
///
/// Names the first scope that was not fully completed; re-running from it
/// re-processes that scope, which is cheap because pages and certificates
/// already on disk are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub state_id: i64,
    pub municipality_id: Option<i64>,
}

impl Checkpoint {
    pub fn state(state_id: i64) -> Self {
        Self {
            state_id,
            municipality_id: None,
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.municipality_id {
            Some(municipality_id) => {
                write!(f, "state {}, municipality {}", self.state_id, municipality_id)
            }
            None => write!(f, "state {}", self.state_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_equality_ignores_names() {
        let a = Scope::state(5, "Bahia");
        let b = Scope::state(5, "BA");
        assert_eq!(a, b);

        let c = Scope::municipality(5, "Bahia", 102, "Salvador");
        let d = Scope::municipality(5, "Bahia", 102, "salvador (old spelling)");
        assert_eq!(c, d);
        assert_ne!(a, c);
    }

    #[test]
    fn test_scope_file_prefix() {
        assert_eq!(Scope::state(5, "Bahia").file_prefix(), "uf_5");
        assert_eq!(
            Scope::municipality(5, "Bahia", 102, "Salvador").file_prefix(),
            "uf_5_municipio_102"
        );
    }

    #[test]
    fn test_page_file_name() {
        let scope = Scope::state(12, "Acre");
        assert_eq!(scope.page_file_name(0, 30), "uf_12_page_0_size_30.json");
        assert_eq!(scope.page_file_name(7, 10), "uf_12_page_7_size_10.json");
    }

    #[test]
    fn test_certificate_key_requires_both_fields() {
        let full: WarrantRecord =
            serde_json::from_value(serde_json::json!({"id": 9, "idTipoPeca": 2, "numeroPeca": "x"}))
                .unwrap();
        assert_eq!(
            full.certificate_key(),
            Some(CertificateKey {
                certificate_id: 9,
                piece_type_id: 2
            })
        );
        assert_eq!(full.extra.get("numeroPeca").and_then(|v| v.as_str()), Some("x"));

        let missing_type: WarrantRecord = serde_json::from_value(serde_json::json!({"id": 9})).unwrap();
        assert_eq!(missing_type.certificate_key(), None);

        let missing_id: WarrantRecord =
            serde_json::from_value(serde_json::json!({"idTipoPeca": 2})).unwrap();
        assert_eq!(missing_id.certificate_key(), None);
    }

    #[test]
    fn test_certificate_file_name() {
        let key = CertificateKey {
            certificate_id: 123,
            piece_type_id: 4,
        };
        assert_eq!(key.file_name(), "certidao_123_tipo_4.pdf");
    }

    #[test]
    fn test_result_page_defaults() {
        let page: ResultPage = serde_json::from_value(serde_json::json!({"content": []})).unwrap();
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.total_elements, 0);
        assert_eq!(page.effective_size(), 0);
    }

    #[test]
    fn test_result_page_preserves_unknown_fields() {
        let page: ResultPage = serde_json::from_value(serde_json::json!({
            "content": [{"id": 1, "idTipoPeca": 2}],
            "totalPages": 4,
            "totalElements": 100,
            "numberOfElements": 30
        }))
        .unwrap();
        assert_eq!(page.total_pages, 4);
        assert_eq!(page.total_elements, 100);
        assert_eq!(page.effective_size(), 1);
        assert!(page.extra.contains_key("numberOfElements"));
    }

    #[test]
    fn test_state_display_name_fallbacks() {
        let named: StateEntry =
            serde_json::from_value(serde_json::json!({"id": 5, "nome": "Bahia", "sigla": "BA"}))
                .unwrap();
        assert_eq!(named.display_name(), "Bahia");

        let abbreviated: StateEntry =
            serde_json::from_value(serde_json::json!({"id": 5, "sigla": "BA"})).unwrap();
        assert_eq!(abbreviated.display_name(), "BA");

        let bare: StateEntry = serde_json::from_value(serde_json::json!({"id": 5})).unwrap();
        assert_eq!(bare.display_name(), "UF_5");
    }

    #[test]
    fn test_municipality_display_name_fallback() {
        let bare: MunicipalityEntry = serde_json::from_value(serde_json::json!({"id": 77})).unwrap();
        assert_eq!(bare.display_name(), "Municipio_77");
    }

    #[test]
    fn test_checkpoint_from_scope() {
        let scope = Scope::municipality(5, "Bahia", 102, "Salvador");
        assert_eq!(
            scope.checkpoint(),
            Checkpoint {
                state_id: 5,
                municipality_id: Some(102)
            }
        );
        assert_eq!(Scope::state(5, "Bahia").checkpoint(), Checkpoint::state(5));
    }
}
