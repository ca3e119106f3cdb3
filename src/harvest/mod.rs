//! Harvest engine
//!
//! Layered from the bottom up:
//! - `pages`: single-page acquisition with disk-first idempotence
//! - `paginate`: scope-level sweeps with capping and worker pooling
//! - `certificates`: PDF fan-out for collected records
//! - `controller`: the state and municipality walk tying it together

mod certificates;
mod controller;
mod pages;
mod paginate;

pub use certificates::{CertificateDownloader, DownloadOutcome, DownloadStats};
pub use controller::{HarvestController, HarvestReport, ResumeCursor};
pub use pages::{FetchError, FetchedPage, PageFetcher, MIN_PAGE_SIZE};
pub use paginate::{PaginationDriver, ScopeResults};
