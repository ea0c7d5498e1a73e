//! Row extraction.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use super::table::TableTracker;
use crate::config::site::{ActionKind, SiteProfile};
use crate::error::UiError;
use crate::ui::{locate_first_within, ElementRef, UiDriver};

/// Identifies a row element to click when no direct link is available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteractionHandle {
    pub row_index: usize,
    pub kind: ActionKind,
    pub matcher: String,
}

/// One normalized listing row. Built fresh on every page read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentRecord {
    pub row_index: usize,
    pub title: String,
    pub category: String,
    pub body_preview: String,
    pub encounter_date: Option<String>,
    pub document_date: Option<String>,
    pub link: Option<Url>,
    pub interaction_handle: Option<InteractionHandle>,
}

impl AttachmentRecord {
    /// A record with text only, for classifying outside a listing.
    pub fn from_text(title: &str, category: &str, body_preview: &str) -> Self {
        Self {
            row_index: 0,
            title: title.to_string(),
            category: category.to_string(),
            body_preview: body_preview.to_string(),
            encounter_date: None,
            document_date: None,
            link: None,
            interaction_handle: None,
        }
    }

    pub fn is_retrievable(&self) -> bool {
        self.link.is_some() || self.interaction_handle.is_some()
    }

    /// Handle for the click fallback: the explicit one, or the row's own
    /// document anchor when the row had a link.
    pub fn fallback_handle(&self, site: &SiteProfile) -> Option<InteractionHandle> {
        if let Some(handle) = &self.interaction_handle {
            return Some(handle.clone());
        }
        let anchor = site.link_strategies.last()?;
        self.link.as_ref().map(|_| InteractionHandle {
            row_index: self.row_index,
            kind: ActionKind::DocumentAnchor,
            matcher: anchor.matcher.clone(),
        })
    }
}

/// Turns rendered rows into [`AttachmentRecord`]s.
pub struct RowExtractor<'a> {
    ui: &'a dyn UiDriver,
    site: &'a SiteProfile,
    tracker: TableTracker<'a>,
    settle_timeout: Duration,
}

impl<'a> RowExtractor<'a> {
    pub fn new(
        ui: &'a dyn UiDriver,
        site: &'a SiteProfile,
        tracker: TableTracker<'a>,
        settle_timeout: Duration,
    ) -> Self {
        Self {
            ui,
            site,
            tracker,
            settle_timeout,
        }
    }

    /// Read every row on the current page. Unreadable rows are skipped;
    /// rows with neither a link nor an action are dropped.
    pub async fn extract_page(&self) -> Vec<AttachmentRecord> {
        let sig = self.tracker.wait_for_change(self.settle_timeout, None).await;
        if !sig.has_rows() {
            debug!("Table not settled before extraction ({} rows)", sig.row_count);
        }

        let rows = match self.ui.locate_all(&self.site.rows).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Could not enumerate rows: {}", e);
                return Vec::new();
            }
        };

        let base = self
            .ui
            .current_location()
            .await
            .ok()
            .flatten()
            .and_then(|loc| Url::parse(&loc).ok());

        let mut records = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            match self.read_row(index, row, base.as_ref()).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => debug!(row = index, "Row has no link or action, dropped"),
                Err(e) => warn!(row = index, "Skipping unreadable row: {}", e),
            }
        }
        records
    }

    async fn read_row(
        &self,
        index: usize,
        row: &ElementRef,
        base: Option<&Url>,
    ) -> Result<Option<AttachmentRecord>, UiError> {
        let cells = self.ui.locate_all_within(row, &self.site.cells).await?;
        let mut texts = Vec::with_capacity(cells.len());
        for cell in &cells {
            texts.push(self.ui.read_text(cell).await?.trim().to_string());
        }
        let row_text = self.ui.read_text(row).await?.trim().to_string();

        let columns = &self.site.columns;
        let column = |idx: Option<usize>| -> Option<String> {
            idx.and_then(|i| texts.get(i))
                .filter(|t| !t.is_empty())
                .cloned()
        };

        let title = column(Some(columns.title))
            .unwrap_or_else(|| row_text.lines().next().unwrap_or("").to_string());
        let category = column(columns.category).unwrap_or_default();
        let body_preview = match columns.preview {
            Some(_) => column(columns.preview).unwrap_or_default(),
            None => row_text.clone(),
        };

        let link = self.resolve_link(row, base).await?;
        let interaction_handle = if link.is_none() {
            locate_first_within(self.ui, row, &self.site.action_strategies)
                .await?
                .map(|(kind, _)| InteractionHandle {
                    row_index: index,
                    kind,
                    matcher: self
                        .site
                        .action_strategies
                        .iter()
                        .find(|s| s.kind == kind)
                        .map(|s| s.matcher.clone())
                        .unwrap_or_default(),
                })
        } else {
            None
        };

        let record = AttachmentRecord {
            row_index: index,
            title,
            category,
            body_preview,
            encounter_date: column(columns.encounter_date),
            document_date: column(columns.document_date),
            link,
            interaction_handle,
        };

        Ok(record.is_retrievable().then_some(record))
    }

    async fn resolve_link(
        &self,
        row: &ElementRef,
        base: Option<&Url>,
    ) -> Result<Option<Url>, UiError> {
        for strategy in &self.site.link_strategies {
            let Some(anchor) = self.ui.locate_within(row, &strategy.matcher).await? else {
                continue;
            };
            let Some(href) = self.ui.read_attribute(&anchor, "href").await? else {
                continue;
            };
            if let Some(url) = absolutize(&href, base) {
                debug!(kind = ?strategy.kind, "Resolved link {}", url);
                return Ok(Some(url));
            }
        }
        Ok(None)
    }
}

/// Resolve an href against the page location. Script and fragment-only
/// hrefs are not links.
pub(crate) fn absolutize(href: &str, base: Option<&Url>) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.to_ascii_lowercase().starts_with("javascript:")
    {
        return None;
    }
    match Url::parse(href) {
        Ok(url) => Some(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(href).ok(),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::mock::{MockListing, MockRow, MockUi, MOCK_ORIGIN};

    const FAST: Duration = Duration::from_millis(1);

    async fn extract(listing: MockListing) -> Vec<AttachmentRecord> {
        let ui = MockUi::new(listing);
        ui.open_tab_now();
        let site = SiteProfile::default();
        let tracker = TableTracker::new(&ui, &site.rows, FAST, FAST);
        RowExtractor::new(&ui, &site, tracker, Duration::from_millis(20))
            .extract_page()
            .await
    }

    #[tokio::test]
    async fn test_extracts_link_rows() {
        let href = format!("{}/ema/secure/fileattachment/9/op.pdf", MOCK_ORIGIN);
        let records = extract(MockListing::with_rows(vec![MockRow::linked(
            "Operative Report",
            "Operative Reports",
            &href,
        )
        .dated("03/14/2022")]))
        .await;

        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.title, "Operative Report");
        assert_eq!(rec.category, "Operative Reports");
        assert_eq!(rec.document_date.as_deref(), Some("03/14/2022"));
        assert_eq!(rec.link.as_ref().map(Url::as_str), Some(href.as_str()));
        assert!(rec.interaction_handle.is_none());
        assert!(rec.body_preview.contains("Operative Reports"));
    }

    #[tokio::test]
    async fn test_action_rows_get_interaction_handles() {
        let records = extract(MockListing::with_rows(vec![
            MockRow::actionable("Op note", "Operative", None),
            MockRow::bare("Fax cover", "Outbound Faxes"),
        ]))
        .await;

        assert_eq!(records.len(), 1);
        let handle = records[0].interaction_handle.as_ref().unwrap();
        assert_eq!(handle.row_index, 0);
        assert_eq!(handle.kind, ActionKind::ExplicitAction);
        assert!(records[0].link.is_none());
    }

    #[tokio::test]
    async fn test_stale_row_is_skipped_not_fatal() {
        let mut listing = MockListing::with_rows(vec![
            MockRow::linked("a", "Operative", "https://emr.example/a.pdf"),
            MockRow::linked("b", "Operative", "https://emr.example/b.pdf"),
            MockRow::linked("c", "Operative", "https://emr.example/c.pdf"),
        ]);
        listing.stale_rows = vec![1];
        let records = extract(listing).await;
        let titles: Vec<&str> = records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "c"]);
    }

    #[test]
    fn test_absolutize() {
        let base = Url::parse("https://emr.example/ema/web/practice/staff").unwrap();
        assert_eq!(
            absolutize("/ema/secure/fileattachment/1/x.pdf", Some(&base))
                .unwrap()
                .as_str(),
            "https://emr.example/ema/secure/fileattachment/1/x.pdf"
        );
        assert!(absolutize("javascript:void(0)", Some(&base)).is_none());
        assert!(absolutize("#", Some(&base)).is_none());
        assert!(absolutize("relative.pdf", None).is_none());
    }

    #[test]
    fn test_fallback_handle_for_link_rows() {
        let site = SiteProfile::default();
        let mut rec = AttachmentRecord::from_text("t", "c", "");
        assert!(rec.fallback_handle(&site).is_none());

        rec.row_index = 4;
        rec.link = Some(Url::parse("https://emr.example/x.pdf").unwrap());
        let handle = rec.fallback_handle(&site).unwrap();
        assert_eq!(handle.kind, ActionKind::DocumentAnchor);
        assert_eq!(handle.row_index, 4);
        assert_eq!(handle.matcher, "a[href]");
    }
}
