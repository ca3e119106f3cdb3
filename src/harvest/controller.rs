//! Full-portal harvest orchestration
//!
//! The controller walks the state listing in server order and, for each
//! state:
//! - sweeps the state-level scope first
//! - small states (below the per-scope result cap) are done after the
//!   state-level sweep
//! - large states descend to their municipalities, and the state-level
//!   records are discarded in favor of the per-municipality sweeps
//! - certificates are downloaded after each scope's records are collected
//!
//! A checkpoint from an earlier run skips already-finished work, and an
//! interrupt stops between scopes, reporting where to resume.

use crate::client::BnmpClient;
use crate::config::HarvestConfig;
use crate::control::Interrupt;
use crate::harvest::certificates::{CertificateDownloader, DownloadStats};
use crate::harvest::pages::PageFetcher;
use crate::harvest::paginate::{PaginationDriver, ScopeResults};
use crate::model::{Checkpoint, MunicipalityEntry, Scope, StateEntry};
use crate::store::HarvestStore;
use crate::{HarvestError, Result};
use reqwest::StatusCode;
use std::sync::Arc;

/// Consecutive authentication rejections tolerated before the run aborts
const MAX_AUTH_FAILURES: u32 = 3;

/// Tracks how far a resumed run still has to skip.
///
/// The cursor starts at the checkpointed state, and inside that state at
/// the checkpointed municipality. Everything before the checkpoint is
/// skipped; the checkpointed scope itself is processed again.
#[derive(Debug)]
pub struct ResumeCursor {
    phase: CursorPhase,
}

#[derive(Debug)]
enum CursorPhase {
    SeekingState {
        state_id: i64,
        municipality_id: Option<i64>,
    },
    SeekingMunicipality {
        municipality_id: i64,
    },
    Live,
}

impl ResumeCursor {
    pub fn new(checkpoint: Option<Checkpoint>) -> Self {
        let phase = match checkpoint {
            Some(checkpoint) => CursorPhase::SeekingState {
                state_id: checkpoint.state_id,
                municipality_id: checkpoint.municipality_id,
            },
            None => CursorPhase::Live,
        };
        Self { phase }
    }

    /// Returns true when the given state should be processed
    pub fn enter_state(&mut self, state_id: i64) -> bool {
        match self.phase {
            CursorPhase::Live => true,
            CursorPhase::SeekingState {
                state_id: target,
                municipality_id,
            } => {
                if state_id != target {
                    return false;
                }
                self.phase = match municipality_id {
                    Some(municipality_id) => {
                        CursorPhase::SeekingMunicipality { municipality_id }
                    }
                    None => CursorPhase::Live,
                };
                true
            }
            // A later state means the checkpointed one is done
            CursorPhase::SeekingMunicipality { .. } => {
                self.phase = CursorPhase::Live;
                true
            }
        }
    }

    /// Returns true when the given municipality should be processed
    pub fn enter_municipality(&mut self, municipality_id: i64) -> bool {
        match self.phase {
            CursorPhase::Live => true,
            CursorPhase::SeekingState { .. } => false,
            CursorPhase::SeekingMunicipality {
                municipality_id: target,
            } => {
                if municipality_id != target {
                    return false;
                }
                self.phase = CursorPhase::Live;
                true
            }
        }
    }
}

/// Totals for one harvest run
#[derive(Debug, Default)]
pub struct HarvestReport {
    pub states_processed: u32,
    pub scopes_processed: u32,
    pub records_discovered: u64,
    pub failed_pages: u32,
    pub certificates: DownloadStats,
    /// Where a resumed run should restart, when this one did not finish
    pub resume_hint: Option<Checkpoint>,
}

/// Runs a complete harvest over every state in the portal
pub struct HarvestController {
    client: Arc<BnmpClient>,
    store: Arc<HarvestStore>,
    config: HarvestConfig,
    driver: PaginationDriver,
    downloader: CertificateDownloader,
    interrupt: Interrupt,
}

impl HarvestController {
    pub fn new(
        client: BnmpClient,
        store: HarvestStore,
        config: HarvestConfig,
        interrupt: Interrupt,
    ) -> Result<Self> {
        config.validate()?;

        let client = Arc::new(client);
        let store = Arc::new(store);
        let fetcher = PageFetcher::new(
            Arc::clone(&client),
            Arc::clone(&store),
            config.page_size,
            config.request_delay,
        );
        let driver = PaginationDriver::new(
            fetcher,
            config.max_results_per_scope,
            config.workers,
            interrupt.clone(),
        );
        let downloader = CertificateDownloader::new(
            Arc::clone(&client),
            Arc::clone(&store),
            config.request_delay,
            config.workers,
            interrupt.clone(),
        );

        Ok(Self {
            client,
            store,
            config,
            driver,
            downloader,
            interrupt,
        })
    }

    /// Harvests every state, honoring the configured checkpoint, and
    /// returns the run's totals.
    ///
    /// Aborts early only for a session-wide failure: the state listing
    /// being unavailable, or repeated authentication rejections.
    pub async fn run(&self) -> Result<HarvestReport> {
        let states = self.load_states().await?;
        tracing::info!("Found {} states", states.len());

        let mut report = HarvestReport::default();
        let mut cursor = ResumeCursor::new(self.config.resume_from);
        let mut auth_failures = 0u32;

        for state in &states {
            let Some(state_id) = state.id else {
                tracing::warn!("State entry without an id, skipping");
                continue;
            };
            let state_name = state.display_name();

            if !cursor.enter_state(state_id) {
                tracing::debug!("Skipping state {} ({}), before checkpoint", state_id, state_name);
                continue;
            }
            let scope = Scope::state(state_id, &state_name);
            if self.interrupt.is_triggered() {
                report.resume_hint = Some(scope.checkpoint());
                break;
            }

            // Marks the state in progress; cleared when it completes
            report.resume_hint = Some(scope.checkpoint());
            tracing::info!("Processing state {} ({})", state_id, state_name);

            let state_results = self
                .collect_scope_isolated(&scope, &mut auth_failures, &mut report)
                .await?;

            let is_small = state_results.total_elements < self.config.max_results_per_scope;
            if self.config.skip_small_states && is_small {
                tracing::info!(
                    "State {} has {} records, keeping state-level results",
                    state_name,
                    state_results.total_elements
                );
                report.certificates += self
                    .downloader
                    .download_for_records(&state_results.records)
                    .await;
                if self.interrupt.is_triggered() {
                    break;
                }
            } else {
                tracing::info!(
                    "State {} has {} records, descending to municipalities",
                    state_name,
                    state_results.total_elements
                );
                // State-level records are superseded by the per-municipality
                // sweeps; the pages stay on disk
                drop(state_results);

                let municipalities = self.load_municipalities(state_id, &state_name).await;
                let mut interrupted = false;
                for municipality in &municipalities {
                    let Some(municipality_id) = municipality.id else {
                        tracing::warn!("Municipality entry without an id, skipping");
                        continue;
                    };
                    if !cursor.enter_municipality(municipality_id) {
                        tracing::debug!(
                            "Skipping municipality {}, before checkpoint",
                            municipality_id
                        );
                        continue;
                    }
                    if self.interrupt.is_triggered() {
                        interrupted = true;
                        break;
                    }

                    let scope = Scope::municipality(
                        state_id,
                        &state_name,
                        municipality_id,
                        municipality.display_name(),
                    );
                    report.resume_hint = Some(scope.checkpoint());
                    let results = self
                        .collect_scope_isolated(&scope, &mut auth_failures, &mut report)
                        .await?;
                    report.certificates +=
                        self.downloader.download_for_records(&results.records).await;
                }
                if interrupted || self.interrupt.is_triggered() {
                    break;
                }
            }

            report.resume_hint = None;
            report.states_processed += 1;
            tracing::info!("Completed state {} ({})", state_id, state_name);
        }

        Ok(report)
    }

    /// Fetches and persists the portal's state listing
    async fn load_states(&self) -> Result<Vec<StateEntry>> {
        let response = self.client.list_states().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(HarvestError::Api {
                endpoint: "dominio/estados".to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await?;
        let raw: serde_json::Value = serde_json::from_slice(&bytes)?;
        self.store.save_states_listing(&raw).await?;
        let states: Vec<StateEntry> = serde_json::from_slice(&bytes)?;
        Ok(states)
    }

    /// Fetches a state's municipality listing. Any failure logs and yields
    /// an empty listing so the harvest moves on to the next state.
    async fn load_municipalities(
        &self,
        state_id: i64,
        state_name: &str,
    ) -> Vec<MunicipalityEntry> {
        let response = match self.client.list_municipalities(state_id).await {
            Ok(response) => response,
            Err(error) => {
                tracing::error!("Municipality listing for {} failed: {}", state_name, error);
                return Vec::new();
            }
        };
        let status = response.status();
        if status != StatusCode::OK {
            tracing::error!(
                "Municipality listing for {} returned HTTP {}",
                state_name,
                status.as_u16()
            );
            return Vec::new();
        }
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::error!("Municipality listing for {} read failed: {}", state_name, error);
                return Vec::new();
            }
        };
        let raw: serde_json::Value = match serde_json::from_slice(&bytes) {
            Ok(raw) => raw,
            Err(error) => {
                tracing::error!("Municipality listing for {} malformed: {}", state_name, error);
                return Vec::new();
            }
        };
        if let Err(error) = self
            .store
            .save_municipalities_listing(state_id, state_name, &raw)
            .await
        {
            tracing::error!("Municipality listing for {} not saved: {}", state_name, error);
        }
        match serde_json::from_value::<Vec<MunicipalityEntry>>(raw) {
            Ok(municipalities) => {
                tracing::info!("{} municipalities in {}", municipalities.len(), state_name);
                municipalities
            }
            Err(error) => {
                tracing::error!("Municipality listing for {} malformed: {}", state_name, error);
                Vec::new()
            }
        }
    }

    /// Sweeps one scope, converting scope-local failures into an empty
    /// result so the harvest continues.
    ///
    /// Authentication rejections are the exception: enough of them in a
    /// row and the whole run aborts, since every later request would fail
    /// the same way.
    async fn collect_scope_isolated(
        &self,
        scope: &Scope,
        auth_failures: &mut u32,
        report: &mut HarvestReport,
    ) -> Result<ScopeResults> {
        match self.driver.collect_scope(scope).await {
            Ok(results) => {
                *auth_failures = 0;
                report.scopes_processed += 1;
                report.failed_pages += results.failed_pages;
                report.records_discovered += results.records.len() as u64;
                Ok(results)
            }
            Err(error) => {
                if error.is_auth() {
                    *auth_failures += 1;
                    tracing::error!(
                        "{} (consecutive authentication failures: {})",
                        error,
                        auth_failures
                    );
                    if *auth_failures >= MAX_AUTH_FAILURES {
                        return Err(HarvestError::SessionExpired {
                            failures: *auth_failures,
                        });
                    }
                } else {
                    tracing::error!("{}", error);
                }
                report.scopes_processed += 1;
                report.failed_pages += 1;
                Ok(ScopeResults::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_without_checkpoint_processes_everything() {
        let mut cursor = ResumeCursor::new(None);
        assert!(cursor.enter_state(1));
        assert!(cursor.enter_municipality(100));
        assert!(cursor.enter_state(2));
    }

    #[test]
    fn test_cursor_state_checkpoint_skips_earlier_states() {
        let mut cursor = ResumeCursor::new(Some(Checkpoint::state(5)));
        assert!(!cursor.enter_state(1));
        assert!(!cursor.enter_state(3));
        assert!(cursor.enter_state(5));
        // Once reached, everything after is processed
        assert!(cursor.enter_municipality(100));
        assert!(cursor.enter_state(6));
    }

    #[test]
    fn test_cursor_municipality_checkpoint_gates_inside_state() {
        let mut cursor = ResumeCursor::new(Some(Checkpoint {
            state_id: 5,
            municipality_id: Some(102),
        }));
        assert!(!cursor.enter_state(4));
        assert!(cursor.enter_state(5));
        // Municipalities before the checkpoint are skipped
        assert!(!cursor.enter_municipality(100));
        assert!(!cursor.enter_municipality(101));
        assert!(cursor.enter_municipality(102));
        assert!(cursor.enter_municipality(103));
    }

    #[test]
    fn test_cursor_new_state_ends_municipality_gate() {
        let mut cursor = ResumeCursor::new(Some(Checkpoint {
            state_id: 5,
            municipality_id: Some(102),
        }));
        assert!(cursor.enter_state(5));
        // The checkpointed municipality never appeared; the next state
        // clears the gate
        assert!(cursor.enter_state(6));
        assert!(cursor.enter_municipality(1));
    }

    #[test]
    fn test_cursor_no_municipalities_before_checkpoint_state() {
        let mut cursor = ResumeCursor::new(Some(Checkpoint::state(5)));
        assert!(!cursor.enter_state(2));
        assert!(!cursor.enter_municipality(100));
        assert!(cursor.enter_state(5));
    }
}
