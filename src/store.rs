//! On-disk layout for harvested data
//!
//! Everything lives under one data directory:
//! - `json/` holds raw result pages, one file per (scope, page, requested size)
//! - `pdfs/` holds certificate PDFs, one file per (certificate, piece type)
//! - `metadata/` holds the state and municipality listings
//!
//! A file's existence is the idempotency signal: the engine checks before
//! fetching and never re-downloads what is already present. Writes land
//! under a temporary name and are renamed into place, so a crash cannot
//! leave a truncated file at a final path.

use crate::model::{CertificateKey, Scope};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

/// Storage-layer errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize metadata for {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Result type alias for storage operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The harvest data directory and its three subdirectories
#[derive(Debug, Clone)]
pub struct HarvestStore {
    json_dir: PathBuf,
    pdf_dir: PathBuf,
    metadata_dir: PathBuf,
}

impl HarvestStore {
    /// Opens a store rooted at `data_dir`, creating the directory tree if
    /// needed
    pub async fn open(data_dir: &Path) -> StoreResult<Self> {
        let store = Self {
            json_dir: data_dir.join("json"),
            pdf_dir: data_dir.join("pdfs"),
            metadata_dir: data_dir.join("metadata"),
        };

        for dir in [&store.json_dir, &store.pdf_dir, &store.metadata_dir] {
            fs::create_dir_all(dir).await.map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
        }

        Ok(store)
    }

    /// Path of one result page's file
    pub fn page_path(&self, scope: &Scope, page: u32, size: u32) -> PathBuf {
        self.json_dir.join(scope.page_file_name(page, size))
    }

    /// Path of one certificate's file
    pub fn certificate_path(&self, key: CertificateKey) -> PathBuf {
        self.pdf_dir.join(key.file_name())
    }

    /// Returns true if the page is already on disk under the given size
    pub async fn has_page(&self, scope: &Scope, page: u32, size: u32) -> StoreResult<bool> {
        path_exists(&self.page_path(scope, page, size)).await
    }

    /// Reads a previously saved page verbatim
    pub async fn load_page_bytes(
        &self,
        scope: &Scope,
        page: u32,
        size: u32,
    ) -> StoreResult<Vec<u8>> {
        let path = self.page_path(scope, page, size);
        fs::read(&path)
            .await
            .map_err(|source| StoreError::Io { path, source })
    }

    /// Persists the raw bytes of one result page.
    ///
    /// `size` must be the page size the successful request asked for, so a
    /// later run probing with the same sizes finds the file again.
    pub async fn save_page_bytes(
        &self,
        scope: &Scope,
        page: u32,
        size: u32,
        bytes: &[u8],
    ) -> StoreResult<()> {
        write_atomic(&self.page_path(scope, page, size), bytes).await
    }

    /// Returns true if the certificate is already on disk
    pub async fn has_certificate(&self, key: CertificateKey) -> StoreResult<bool> {
        path_exists(&self.certificate_path(key)).await
    }

    /// Persists one certificate's PDF bytes
    pub async fn save_certificate(&self, key: CertificateKey, bytes: &[u8]) -> StoreResult<()> {
        write_atomic(&self.certificate_path(key), bytes).await
    }

    /// Saves the state listing under `metadata/estados.json`, wrapped with a
    /// count for quick inspection
    pub async fn save_states_listing(&self, states: &serde_json::Value) -> StoreResult<()> {
        let path = self.metadata_dir.join("estados.json");
        let total = states.as_array().map(|a| a.len()).unwrap_or(0);
        let wrapped = serde_json::json!({
            "estados": states,
            "total": total,
        });
        self.write_metadata(&path, &wrapped).await
    }

    /// Saves one state's municipality listing under
    /// `metadata/municipios_uf_{id}.json`
    pub async fn save_municipalities_listing(
        &self,
        state_id: i64,
        state_name: &str,
        municipalities: &serde_json::Value,
    ) -> StoreResult<()> {
        let path = self
            .metadata_dir
            .join(format!("municipios_uf_{}.json", state_id));
        let total = municipalities.as_array().map(|a| a.len()).unwrap_or(0);
        let wrapped = serde_json::json!({
            "uf_id": state_id,
            "uf_name": state_name,
            "municipios": municipalities,
            "total": total,
        });
        self.write_metadata(&path, &wrapped).await
    }

    async fn write_metadata(&self, path: &Path, value: &serde_json::Value) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        write_atomic(path, &bytes).await
    }
}

async fn path_exists(path: &Path) -> StoreResult<bool> {
    fs::try_exists(path).await.map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes under a unique sibling `.tmp` name, then renames into place.
/// Concurrent writers of the same final path never share a temp file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    fs::write(&temp_path, bytes)
        .await
        .map_err(|source| StoreError::Io {
            path: temp_path.clone(),
            source,
        })?;

    fs::rename(&temp_path, path).await.map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}
