//! Table fingerprinting.
//!
//! The listing re-renders asynchronously after every navigation action. A
//! [`TableSignature`] is a cheap fingerprint of what is on screen, and the
//! tracker decides when it has stopped changing.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::retry::poll_until;
use crate::ui::UiDriver;

/// `(first row text, last row text, row count)`.
///
/// A row count of `-1` marks a read that raced a DOM mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSignature {
    pub first_row: String,
    pub last_row: String,
    pub row_count: i64,
}

impl TableSignature {
    pub fn stale() -> Self {
        Self {
            first_row: String::new(),
            last_row: String::new(),
            row_count: -1,
        }
    }

    pub fn empty() -> Self {
        Self {
            first_row: String::new(),
            last_row: String::new(),
            row_count: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.row_count >= 0
    }

    pub fn has_rows(&self) -> bool {
        self.row_count > 0
    }
}

/// Reads and waits on the rendered table.
#[derive(Clone, Copy)]
pub struct TableTracker<'a> {
    ui: &'a dyn UiDriver,
    rows: &'a str,
    poll_interval: Duration,
    settle: Duration,
}

impl<'a> TableTracker<'a> {
    pub fn new(
        ui: &'a dyn UiDriver,
        rows: &'a str,
        poll_interval: Duration,
        settle: Duration,
    ) -> Self {
        Self {
            ui,
            rows,
            poll_interval,
            settle,
        }
    }

    /// Fingerprint the table as currently rendered. Never fails; a read that
    /// hits a detached element yields [`TableSignature::stale`].
    pub async fn signature(&self) -> TableSignature {
        let rows = match self.ui.locate_all(self.rows).await {
            Ok(rows) => rows,
            Err(e) => {
                debug!("Signature read failed: {}", e);
                return TableSignature::stale();
            }
        };
        let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
            return TableSignature::empty();
        };

        let first_row = match self.ui.read_text(first).await {
            Ok(t) => t,
            Err(_) => return TableSignature::stale(),
        };
        let last_row = match self.ui.read_text(last).await {
            Ok(t) => t,
            Err(_) => return TableSignature::stale(),
        };

        TableSignature {
            first_row,
            last_row,
            row_count: rows.len() as i64,
        }
    }

    /// First valid signature read twice in a row, or `None` if the table
    /// never holds still within `timeout`. Empty tables count.
    pub async fn settled_signature(&self, timeout: Duration) -> Option<TableSignature> {
        poll_until(timeout, self.poll_interval, || async {
            let first = self.signature().await;
            if !first.is_valid() {
                return None;
            }
            tokio::time::sleep(self.settle).await;
            let second = self.signature().await;
            (second == first).then_some(second)
        })
        .await
    }

    /// Wait for the table to settle.
    ///
    /// Without a baseline, waits for any non-empty stable table. With one,
    /// waits for a stable signature different from it. On timeout returns
    /// the last signature read, which callers compare to the baseline.
    pub async fn wait_for_change(
        &self,
        timeout: Duration,
        baseline: Option<&TableSignature>,
    ) -> TableSignature {
        let last = Mutex::new(TableSignature::stale());
        let remember = |sig: &TableSignature| {
            if let Ok(mut guard) = last.lock() {
                *guard = sig.clone();
            }
        };

        let settled = poll_until(timeout, self.poll_interval, || async {
            let first = self.signature().await;
            remember(&first);
            if !first.is_valid() {
                return None;
            }
            match baseline {
                Some(b) if *b == first => return None,
                None if !first.has_rows() => return None,
                _ => {}
            }

            tokio::time::sleep(self.settle).await;
            let second = self.signature().await;
            remember(&second);
            (second == first).then_some(second)
        })
        .await;

        match settled {
            Some(sig) => sig,
            None => last.into_inner().unwrap_or_else(|e| e.into_inner()),
        }
    }
}
