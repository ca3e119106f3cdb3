//! Bnmp-Harvest: a resumable bulk harvester for the BNMP warrant portal
//!
//! This crate implements a rate-limited, paginated harvest engine over the
//! portal's search API: it walks the state/municipality hierarchy, persists
//! every result page idempotently, and downloads one PDF certificate per
//! discovered record. Authentication material (cookies plus a fingerprint
//! header) is loaded from a file produced by a browser session; the engine
//! never solves CAPTCHAs itself.

pub mod client;
pub mod config;
pub mod control;
pub mod harvest;
pub mod model;
pub mod session;
pub mod store;

use thiserror::Error;

/// Main error type for harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] session::SessionError),

    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] harvest::FetchError),

    #[error("Unexpected HTTP {status} from {endpoint}")]
    Api { endpoint: String, status: u16 },

    #[error("Authentication rejected {failures} times in a row, session likely expired")]
    SessionExpired { failures: u32 },

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No credentials provided: supply a session credential or a cookies file")]
    MissingCredentials,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid base URL: {0}")]
    InvalidUrl(String),
}

/// Result type alias for harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use client::{BnmpClient, BnmpClientBuilder, SearchQuery};
pub use config::HarvestConfig;
pub use control::Interrupt;
pub use harvest::{HarvestController, HarvestReport};
pub use model::{Checkpoint, Scope};
pub use session::SessionCredential;
pub use store::HarvestStore;
