//! Scope-level pagination
//!
//! Drives a full paginated sweep over one search scope:
//! - page 0 is always fetched first at the nominal size and settles the
//!   page size the server actually honors
//! - the page count is capped so a scope never yields more than the
//!   configured maximum number of records
//! - remaining pages run sequentially, or through a bounded worker pool
//!   when more than one worker is configured
//! - pooled results are reassembled in page order before concatenation

use crate::control::Interrupt;
use crate::harvest::pages::{FetchError, FetchedPage, PageFetcher};
use crate::model::{Scope, WarrantRecord};
use tokio::task::JoinSet;

/// Everything one scope sweep produced
#[derive(Debug, Default)]
pub struct ScopeResults {
    pub records: Vec<WarrantRecord>,
    pub total_elements: u64,
    pub failed_pages: u32,
}

/// Walks every page of a scope and concatenates the records
#[derive(Debug, Clone)]
pub struct PaginationDriver {
    fetcher: PageFetcher,
    max_results: u64,
    workers: usize,
    interrupt: Interrupt,
}

impl PaginationDriver {
    pub fn new(fetcher: PageFetcher, max_results: u64, workers: usize, interrupt: Interrupt) -> Self {
        Self {
            fetcher,
            max_results,
            workers,
            interrupt,
        }
    }

    /// Collects every record the scope exposes, up to the configured cap.
    ///
    /// An error on page 0 fails the scope; errors on later pages are
    /// counted and the sweep keeps what it already has. In sequential mode
    /// a page error stops the sweep, since later pages would usually fail
    /// the same way.
    pub async fn collect_scope(&self, scope: &Scope) -> Result<ScopeResults, FetchError> {
        tracing::info!("Searching {}", scope);

        let first = self
            .fetcher
            .fetch_page(scope, 0, self.fetcher.nominal_page_size())
            .await?;

        let settled_size = (first.page.effective_size() as u32).max(1);
        let total_elements = first.page.total_elements;
        let total_pages = capped_page_count(
            total_elements,
            first.page.total_pages,
            self.max_results,
            settled_size,
        );
        if total_pages < first.page.total_pages {
            tracing::warn!(
                "{} reports {} records; capping at {} ({} pages of {})",
                scope,
                total_elements,
                self.max_results,
                total_pages,
                settled_size
            );
        }

        let mut results = ScopeResults {
            records: first.page.content,
            total_elements,
            failed_pages: 0,
        };

        if total_pages > 1 {
            let remaining: Vec<u32> = (1..total_pages).collect();
            if self.workers > 1 && remaining.len() > 1 {
                let (mut pages, failed) =
                    self.fetch_pages_pooled(scope, &remaining, settled_size).await;
                pages.sort_by_key(|p| p.index);
                for fetched in pages {
                    results.records.extend(fetched.page.content);
                }
                results.failed_pages = failed;
            } else {
                for page in remaining {
                    if self.interrupt.is_triggered() {
                        tracing::info!("Interrupted while paging {}", scope);
                        break;
                    }
                    if results.records.len() as u64 >= self.max_results {
                        break;
                    }
                    match self.fetcher.fetch_page(scope, page, settled_size).await {
                        Ok(fetched) => {
                            tracing::debug!(
                                "Page {}/{} of {}: {} records",
                                page + 1,
                                total_pages,
                                scope,
                                fetched.page.effective_size()
                            );
                            results.records.extend(fetched.page.content);
                        }
                        Err(error) => {
                            tracing::error!("{}", error);
                            results.failed_pages += 1;
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!(
            "Collected {} records from {} ({} failed pages)",
            results.records.len(),
            scope,
            results.failed_pages
        );
        Ok(results)
    }

    /// Fetches the given pages through a worker pool of `self.workers`
    /// tasks, refilled as tasks finish
    async fn fetch_pages_pooled(
        &self,
        scope: &Scope,
        pages: &[u32],
        size: u32,
    ) -> (Vec<FetchedPage>, u32) {
        let mut queue = pages.iter().copied();
        let mut join_set: JoinSet<(u32, Result<FetchedPage, FetchError>)> = JoinSet::new();
        let mut fetched = Vec::with_capacity(pages.len());
        let mut failed = 0u32;

        loop {
            while join_set.len() < self.workers {
                if self.interrupt.is_triggered() {
                    break;
                }
                let Some(page) = queue.next() else { break };
                let fetcher = self.fetcher.clone();
                let scope = scope.clone();
                join_set.spawn(async move {
                    (page, fetcher.fetch_page(&scope, page, size).await)
                });
            }

            if join_set.is_empty() {
                break;
            }

            match join_set.join_next().await {
                Some(Ok((_, Ok(page)))) => fetched.push(page),
                Some(Ok((page, Err(error)))) => {
                    tracing::error!("Page {} of {}: {}", page, scope, error);
                    failed += 1;
                }
                Some(Err(join_error)) => {
                    tracing::error!("Page worker panicked: {}", join_error);
                    failed += 1;
                }
                None => break,
            }
        }

        (fetched, failed)
    }
}

/// Page count for a scope, capped so `max_results` is never exceeded.
///
/// When the server reports at least `max_results` records, the count is
/// recomputed from the cap and the settled page size instead of trusting
/// the reported `totalPages`.
fn capped_page_count(total_elements: u64, total_pages: u32, max_results: u64, settled_size: u32) -> u32 {
    if total_elements >= max_results {
        ceil_div(max_results, settled_size as u64) as u32
    } else {
        total_pages
    }
}

fn ceil_div(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_div() {
        assert_eq!(ceil_div(10_000, 30), 334);
        assert_eq!(ceil_div(90, 30), 3);
        assert_eq!(ceil_div(1, 30), 1);
        assert_eq!(ceil_div(7, 1), 7);
    }

    #[test]
    fn test_capped_page_count_above_cap() {
        assert_eq!(capped_page_count(50_000, 1_667, 10_000, 30), 334);
    }

    #[test]
    fn test_capped_page_count_below_cap_trusts_server() {
        assert_eq!(capped_page_count(100, 4, 10_000, 30), 4);
    }

    #[test]
    fn test_capped_page_count_exactly_at_cap() {
        assert_eq!(capped_page_count(10_000, 334, 10_000, 30), 334);
    }

    #[test]
    fn test_capped_page_count_floor_size() {
        assert_eq!(capped_page_count(10_000, 1_000, 10_000, 10), 1_000);
    }
}
