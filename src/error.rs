//! Error types for the harvesting pipeline.
//!
//! Recoverable conditions (no next page, no link in a row, a duplicate
//! download) are modelled as return values. Only the failures below travel
//! through `Result`.

use thiserror::Error;

/// Failure reported by the UI automation layer.
#[derive(Debug, Error)]
pub enum UiError {
    /// The element was detached from the DOM by a re-render.
    #[error("stale element reference: {0}")]
    Stale(String),
    #[error("element not found: {0}")]
    NotFound(String),
    /// The element exists but a modal, backdrop, or disabled state blocked it.
    #[error("element not interactable: {0}")]
    NotInteractable(String),
    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(std::time::Duration, String),
    #[error("script failed: {0}")]
    Script(String),
    #[error("no such interaction context: {0}")]
    NoSuchContext(String),
    #[error("browser error: {0}")]
    Browser(String),
}

impl UiError {
    /// Whether a local retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UiError::Stale(_) | UiError::NotInteractable(_) | UiError::Timeout(..)
        )
    }
}

/// Page-size negotiation exhausted every strategy on every attempt.
///
/// Callers are expected to log this and continue at whatever page size the
/// listing already shows.
#[derive(Debug, Error)]
#[error("could not set page size to {target} after {attempts} attempts: {last_error}")]
pub struct PaginationConfigurationError {
    pub target: String,
    pub attempts: u32,
    pub last_error: String,
}

/// Failure fetching one document. Never aborts the page.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("not a recognised document type: {0}")]
    UnsupportedType(String),
    #[error("empty response body for {0}")]
    EmptyBody(String),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Ui(#[from] UiError),
}

/// Failure that aborts a single subject's harvest.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("could not establish authenticated session: {0}")]
    Session(String),
    #[error("could not open subject {id}: {reason}")]
    Navigation { id: String, reason: String },
    #[error("could not open attachment listing: {0}")]
    Listing(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
