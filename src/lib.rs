//! chartharvest: paginated attachment harvesting and classification for
//! web-based patient record systems.
//!
//! The pipeline drives a browser through an unstable, re-rendering
//! attachment table, scores each row against weighted rule sets, and
//! fetches matching documents through an HTTP session seeded from the
//! browser's cookies.

pub mod classify;
pub mod cli;
pub mod config;
pub mod error;
pub mod harvest;
pub mod listing;
pub mod retrieval;
pub mod retry;
pub mod ui;
