//! Harvest configuration
//!
//! All tunables for a harvest run. Values come from CLI flags (see the
//! binary); defaults match the portal's observed tolerances: 30 records per
//! page, 10000 results per scope before the server stops paging, half a
//! second between requests.

use crate::model::Checkpoint;
use crate::ConfigError;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one harvest run
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Root directory for harvested data (`json/`, `pdfs/`, `metadata/`)
    pub data_dir: PathBuf,

    /// Page size to request from the search API. The server may reject it
    /// or return fewer records; later pages of a scope are requested at the
    /// size page 0 settled on.
    pub page_size: u32,

    /// Result cap per scope. The upstream refuses to page past this many
    /// results, so pagination stops once the cap is covered.
    pub max_results_per_scope: u64,

    /// Pause after every upstream request
    pub request_delay: Duration,

    /// Concurrent fetch tasks; 1 means fully sequential
    pub workers: usize,

    /// Skip the municipality descent for states whose state-level search
    /// already returns fewer results than the cap
    pub skip_small_states: bool,

    /// Skip scopes until this checkpoint is reached
    pub resume_from: Option<Checkpoint>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data-raw"),
            page_size: 30,
            max_results_per_scope: 10_000,
            request_delay: Duration::from_millis(500),
            workers: 1,
            skip_small_states: true,
            resume_from: None,
        }
    }
}

impl HarvestConfig {
    /// Validates the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "data_dir cannot be empty".to_string(),
            ));
        }

        if self.page_size < 1 {
            return Err(ConfigError::Validation(format!(
                "page_size must be >= 1, got {}",
                self.page_size
            )));
        }

        if self.max_results_per_scope < 1 {
            return Err(ConfigError::Validation(format!(
                "max_results must be >= 1, got {}",
                self.max_results_per_scope
            )));
        }

        if self.workers < 1 || self.workers > 100 {
            return Err(ConfigError::Validation(format!(
                "workers must be between 1 and 100, got {}",
                self.workers
            )));
        }

        Ok(())
    }
}
