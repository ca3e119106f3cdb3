//! Single-page acquisition with idempotent persistence
//!
//! The fetcher is the only component that talks to the search endpoint. For
//! each page it:
//! - probes the store first, under every size the page may have settled at
//!   in an earlier run (requested, nominal, floor)
//! - on a miss, requests the page and persists the raw response bytes keyed
//!   by the size this request asked for
//! - on HTTP 400 at a size above the floor, retries once at the floor size
//! - sleeps the configured delay after every successful network response
//!
//! Pages served from disk cost no network call and no delay.

use crate::client::{BnmpClient, SearchQuery};
use crate::model::{ResultPage, Scope};
use crate::store::HarvestStore;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Smallest page size every session is allowed to request; the downgrade
/// retry lands here
pub const MIN_PAGE_SIZE: u32 = 10;

/// Page-level fetch errors
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Authentication rejected (HTTP {status}) for {scope}, page {page}")]
    AuthRejected { scope: String, page: u32, status: u16 },

    #[error("HTTP {status} for {scope}, page {page}")]
    UpstreamStatus { scope: String, page: u32, status: u16 },

    #[error("Request failed for {scope}, page {page}: {source}")]
    Transport {
        scope: String,
        page: u32,
        source: reqwest::Error,
    },

    #[error("Malformed page body for {scope}, page {page}: {source}")]
    MalformedPage {
        scope: String,
        page: u32,
        source: serde_json::Error,
    },

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),
}

impl FetchError {
    /// True when the upstream rejected the session itself
    pub fn is_auth(&self) -> bool {
        matches!(self, FetchError::AuthRejected { .. })
    }
}

/// One successfully acquired page
#[derive(Debug)]
pub struct FetchedPage {
    pub page: ResultPage,
    pub index: u32,
    /// True when the page came from disk instead of the network
    pub from_store: bool,
}

/// Fetches individual result pages, disk first
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: Arc<BnmpClient>,
    store: Arc<HarvestStore>,
    nominal_page_size: u32,
    request_delay: Duration,
}

impl PageFetcher {
    pub fn new(
        client: Arc<BnmpClient>,
        store: Arc<HarvestStore>,
        nominal_page_size: u32,
        request_delay: Duration,
    ) -> Self {
        Self {
            client,
            store,
            nominal_page_size,
            request_delay,
        }
    }

    /// The configured page size, used for page 0 of every scope
    pub fn nominal_page_size(&self) -> u32 {
        self.nominal_page_size
    }

    /// Sizes a stored copy of this page could be keyed under, in probe order
    fn candidate_sizes(&self, requested: u32) -> Vec<u32> {
        let mut sizes = vec![requested];
        for size in [self.nominal_page_size, MIN_PAGE_SIZE] {
            if !sizes.contains(&size) {
                sizes.push(size);
            }
        }
        sizes
    }

    /// Acquires one page for the scope, from disk when possible.
    ///
    /// `size` is the page size to request: the nominal size for page 0, the
    /// scope's settled size for later pages.
    pub async fn fetch_page(
        &self,
        scope: &Scope,
        page: u32,
        size: u32,
    ) -> Result<FetchedPage, FetchError> {
        for candidate in self.candidate_sizes(size) {
            if self.store.has_page(scope, page, candidate).await? {
                let bytes = self.store.load_page_bytes(scope, page, candidate).await?;
                let parsed = parse_page(&bytes, scope, page)?;
                tracing::debug!(
                    "Page {} of {} loaded from store (size {})",
                    page,
                    scope,
                    candidate
                );
                return Ok(FetchedPage {
                    page: parsed,
                    index: page,
                    from_store: true,
                });
            }
        }

        let response = self.request(scope, page, size).await?;
        let status = response.status();

        if status == StatusCode::OK {
            return self.persist(scope, page, size, response).await;
        }

        if status == StatusCode::BAD_REQUEST && size > MIN_PAGE_SIZE {
            tracing::warn!(
                "HTTP 400 at size {} for {}, page {}; retrying at size {}",
                size,
                scope,
                page,
                MIN_PAGE_SIZE
            );
            let retry = self.request(scope, page, MIN_PAGE_SIZE).await?;
            let retry_status = retry.status();
            if retry_status == StatusCode::OK {
                return self.persist(scope, page, MIN_PAGE_SIZE, retry).await;
            }
            return Err(classify_status(scope, page, retry_status.as_u16()));
        }

        Err(classify_status(scope, page, status.as_u16()))
    }

    async fn request(
        &self,
        scope: &Scope,
        page: u32,
        size: u32,
    ) -> Result<reqwest::Response, FetchError> {
        let query = SearchQuery::for_scope(scope).page(page).size(size);
        self.client
            .search_records(&query)
            .await
            .map_err(|source| FetchError::Transport {
                scope: scope.to_string(),
                page,
                source,
            })
    }

    /// Parses and stores a successful response, keyed by the size the
    /// request asked for, then applies the inter-request delay
    async fn persist(
        &self,
        scope: &Scope,
        page: u32,
        size: u32,
        response: reqwest::Response,
    ) -> Result<FetchedPage, FetchError> {
        let bytes = response
            .bytes()
            .await
            .map_err(|source| FetchError::Transport {
                scope: scope.to_string(),
                page,
                source,
            })?;

        // A malformed body is an error, never persisted
        let parsed = parse_page(&bytes, scope, page)?;

        self.store.save_page_bytes(scope, page, size, &bytes).await?;
        tokio::time::sleep(self.request_delay).await;

        Ok(FetchedPage {
            page: parsed,
            index: page,
            from_store: false,
        })
    }
}

fn parse_page(bytes: &[u8], scope: &Scope, page: u32) -> Result<ResultPage, FetchError> {
    serde_json::from_slice(bytes).map_err(|source| FetchError::MalformedPage {
        scope: scope.to_string(),
        page,
        source,
    })
}

fn classify_status(scope: &Scope, page: u32, status: u16) -> FetchError {
    match status {
        401 | 403 => FetchError::AuthRejected {
            scope: scope.to_string(),
            page,
            status,
        },
        _ => FetchError::UpstreamStatus {
            scope: scope.to_string(),
            page,
            status,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionCredential;
    use tempfile::tempdir;

    async fn create_test_fetcher(nominal: u32) -> (PageFetcher, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = HarvestStore::open(dir.path()).await.unwrap();
        let client = BnmpClient::builder()
            .credential(SessionCredential::new(vec![]))
            .build()
            .unwrap();
        let fetcher = PageFetcher::new(
            Arc::new(client),
            Arc::new(store),
            nominal,
            Duration::ZERO,
        );
        (fetcher, dir)
    }

    #[tokio::test]
    async fn test_candidate_sizes_deduplicate() {
        let (fetcher, _dir) = create_test_fetcher(30).await;

        // Requested equals nominal: only the floor is added
        assert_eq!(fetcher.candidate_sizes(30), vec![30, 10]);
        // Requested at the floor: nominal still probed
        assert_eq!(fetcher.candidate_sizes(10), vec![10, 30]);
        // All three distinct
        assert_eq!(fetcher.candidate_sizes(25), vec![25, 30, 10]);
    }

    #[tokio::test]
    async fn test_candidate_sizes_with_floor_nominal() {
        let (fetcher, _dir) = create_test_fetcher(10).await;
        assert_eq!(fetcher.candidate_sizes(10), vec![10]);
    }

    #[tokio::test]
    async fn test_stored_page_is_served_without_network() {
        // The client points at the real portal; a network attempt would
        // fail, so a success here proves the page came from disk.
        let (fetcher, _dir) = create_test_fetcher(30).await;
        let scope = Scope::state(5, "Bahia");

        fetcher
            .store
            .save_page_bytes(
                &scope,
                0,
                30,
                br#"{"content": [{"id": 1, "idTipoPeca": 2}], "totalPages": 1, "totalElements": 1}"#,
            )
            .await
            .unwrap();

        let fetched = fetcher.fetch_page(&scope, 0, 30).await.unwrap();
        assert!(fetched.from_store);
        assert_eq!(fetched.page.effective_size(), 1);
    }

    #[tokio::test]
    async fn test_downgraded_page_found_under_floor_size() {
        let (fetcher, _dir) = create_test_fetcher(30).await;
        let scope = Scope::state(5, "Bahia");

        // A previous run settled this page at the floor size
        fetcher
            .store
            .save_page_bytes(&scope, 3, 10, br#"{"content": [], "totalPages": 4}"#)
            .await
            .unwrap();

        let fetched = fetcher.fetch_page(&scope, 3, 30).await.unwrap();
        assert!(fetched.from_store);
    }

    #[tokio::test]
    async fn test_corrupt_stored_page_is_an_error() {
        let (fetcher, _dir) = create_test_fetcher(30).await;
        let scope = Scope::state(5, "Bahia");

        fetcher
            .store
            .save_page_bytes(&scope, 0, 30, b"not json")
            .await
            .unwrap();

        let result = fetcher.fetch_page(&scope, 0, 30).await;
        assert!(matches!(result, Err(FetchError::MalformedPage { .. })));
    }

    #[test]
    fn test_auth_statuses_classified() {
        let scope = Scope::state(1, "Acre");
        assert!(classify_status(&scope, 0, 401).is_auth());
        assert!(classify_status(&scope, 0, 403).is_auth());
        assert!(!classify_status(&scope, 0, 500).is_auth());
        assert!(!classify_status(&scope, 0, 400).is_auth());
    }
}
