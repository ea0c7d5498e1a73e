//! Listing activation, page-size negotiation, and page advancement.

use tracing::{debug, info, warn};

use super::table::{TableSignature, TableTracker};
use crate::config::site::{PageSizeStrategy, SiteProfile};
use crate::config::TimingConfig;
use crate::error::{HarvestError, PaginationConfigurationError, UiError};
use crate::retry::{retry_with_backoff, Backoff};
use crate::ui::{
    locate_first, remove_overlays, robust_click, scripts, wait_for_element, ElementRef,
    OptionChoice, UiDriver,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationState {
    Idle,
    TabOpening,
    PageSizeNegotiating,
    PageReady,
    Harvesting,
    Advancing,
    Exhausted,
}

/// Outcome of asking for the next page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Advanced(TableSignature),
    /// No control, a disabled control, or a click that changed nothing.
    NoMorePages,
}

pub struct PaginationDriver<'a> {
    ui: &'a dyn UiDriver,
    site: &'a SiteProfile,
    timing: &'a TimingConfig,
    tracker: TableTracker<'a>,
    state: PaginationState,
    page: usize,
}

impl<'a> PaginationDriver<'a> {
    pub fn new(
        ui: &'a dyn UiDriver,
        site: &'a SiteProfile,
        timing: &'a TimingConfig,
        tracker: TableTracker<'a>,
    ) -> Self {
        Self {
            ui,
            site,
            timing,
            tracker,
            state: PaginationState::Idle,
            page: 0,
        }
    }

    pub fn state(&self) -> PaginationState {
        self.state
    }

    /// One-based number of the page currently shown (0 before `open`).
    pub fn page(&self) -> usize {
        self.page
    }

    /// Activate the attachment listing and wait for its first rows.
    pub async fn open(&mut self) -> Result<TableSignature, HarvestError> {
        self.state = PaginationState::TabOpening;
        let this = &*self;
        let backoff = Backoff::new(this.timing.open_attempts, this.timing.backoff());

        let result = retry_with_backoff(backoff, |_: &UiError| true, |attempt| async move {
            debug!(attempt, "Opening attachment listing");
            remove_overlays(this.ui, &this.site.overlays).await;
            let tab = wait_for_element(
                this.ui,
                &this.site.listing_tab,
                this.timing.element_timeout(),
                this.timing.poll_interval(),
            )
            .await?;
            robust_click(this.ui, &tab).await?;

            let sig = this
                .tracker
                .wait_for_change(this.timing.table_timeout(), None)
                .await;
            if sig.has_rows() {
                Ok(sig)
            } else {
                Err(UiError::Timeout(
                    this.timing.table_timeout(),
                    this.site.rows.clone(),
                ))
            }
        })
        .await;

        match result {
            Ok(sig) => {
                self.state = PaginationState::PageReady;
                self.page = 1;
                Ok(sig)
            }
            Err(e) => {
                self.state = PaginationState::Idle;
                Err(HarvestError::Listing(e.to_string()))
            }
        }
    }

    /// Try to show the configured page size.
    ///
    /// Each failed attempt reopens the listing. After the last one the
    /// listing is left at whatever size it already shows.
    pub async fn set_page_size(&mut self) -> Result<String, PaginationConfigurationError> {
        let target = self.site.page_size.target.clone();
        let attempts = self.timing.page_size_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            self.state = PaginationState::PageSizeNegotiating;
            match self.try_set_page_size(&target).await {
                Ok(label) => {
                    info!(attempt, "Page size set to {}", label);
                    self.state = PaginationState::PageReady;
                    self.page = 1;
                    return Ok(label);
                }
                Err(e) => {
                    warn!(attempt, attempts, "Page size negotiation failed: {}", e);
                    last_error = e.to_string();
                    tokio::time::sleep(self.timing.backoff()).await;
                    if let Err(e) = self.open().await {
                        debug!("Reopen after page size failure failed: {}", e);
                    }
                }
            }
        }

        self.state = PaginationState::PageReady;
        Err(PaginationConfigurationError {
            target,
            attempts,
            last_error,
        })
    }

    async fn try_set_page_size(&self, target: &str) -> Result<String, UiError> {
        remove_overlays(self.ui, &self.site.overlays).await;
        let before = self.tracker.signature().await;

        let (kind, select) = locate_first(self.ui, &self.site.page_size.controls)
            .await?
            .ok_or_else(|| UiError::NotFound("page size control".into()))?;
        debug!(kind = ?kind, "Found page size control");

        for strategy in &self.site.page_size.strategies {
            for choice in choices(strategy) {
                match self.ui.select_option(&select, &choice).await {
                    Ok(Some(label)) => {
                        let after = self
                            .tracker
                            .wait_for_change(self.timing.table_timeout(), Some(&before))
                            .await;
                        if after == before {
                            debug!("Table unchanged after selecting {}", label);
                        }
                        if label.trim() != target {
                            warn!(
                                "Page size option {:?} selected via {}, wanted {}",
                                label,
                                strategy.describe(),
                                target
                            );
                        }
                        return Ok(label);
                    }
                    Ok(None) => debug!("No option for {:?}", choice),
                    Err(e @ UiError::Stale(_)) => return Err(e),
                    Err(e) => debug!("Selecting {:?} failed: {}", choice, e),
                }
            }
        }

        Err(UiError::NotFound(format!(
            "no page size option matched {}",
            target
        )))
    }

    /// Move to the next page.
    ///
    /// Progress is only reported against a settled baseline; a table that
    /// cannot be read before the click counts as exhausted.
    pub async fn advance(&mut self) -> Advance {
        self.state = PaginationState::Advancing;
        let Some(before) = self
            .tracker
            .settled_signature(self.timing.table_timeout())
            .await
        else {
            warn!(page = self.page, "Table never settled before advancing");
            return self.exhaust();
        };

        let this = &*self;
        let backoff = Backoff::new(this.timing.transient_attempts, this.timing.backoff());
        let clicked = retry_with_backoff(backoff, UiError::is_transient, |_| async move {
            remove_overlays(this.ui, &this.site.overlays).await;
            let Some((kind, next)) = locate_first(this.ui, &this.site.next_controls).await?
            else {
                return Ok(false);
            };
            if this.is_disabled(&next).await? {
                debug!(kind = ?kind, "Next control disabled");
                return Ok(false);
            }
            if let Err(e) = this.ui.execute(scripts::SCROLL_INTO_VIEW, Some(&next)).await {
                debug!("Scrolling next control failed: {}", e);
            }
            this.ui.execute(scripts::CLICK, Some(&next)).await?;
            Ok(true)
        })
        .await;

        match clicked {
            Ok(true) => {}
            Ok(false) => return self.exhaust(),
            Err(e) => {
                warn!(page = self.page, "Could not click next: {}", e);
                return self.exhaust();
            }
        }

        let after = self
            .tracker
            .wait_for_change(self.timing.advance_timeout(), Some(&before))
            .await;
        if after.is_valid() && after != before {
            self.page += 1;
            self.state = PaginationState::Harvesting;
            Advance::Advanced(after)
        } else {
            debug!(page = self.page, "Next click did not change the table");
            self.exhaust()
        }
    }

    /// Mark the current page as being harvested.
    pub fn begin_page(&mut self) {
        self.state = PaginationState::Harvesting;
    }

    fn exhaust(&mut self) -> Advance {
        self.state = PaginationState::Exhausted;
        Advance::NoMorePages
    }

    async fn is_disabled(&self, control: &ElementRef) -> Result<bool, UiError> {
        let class = self.ui.read_attribute(control, "class").await?;
        if class
            .as_deref()
            .is_some_and(|c| c.split_whitespace().any(|t| t == "disabled"))
        {
            return Ok(true);
        }
        let aria = self.ui.read_attribute(control, "aria-disabled").await?;
        Ok(aria.as_deref() == Some("true"))
    }
}

fn choices(strategy: &PageSizeStrategy) -> Vec<OptionChoice> {
    match strategy {
        PageSizeStrategy::ByValue { values } => {
            values.iter().cloned().map(OptionChoice::Value).collect()
        }
        PageSizeStrategy::ByLabel { label } => vec![OptionChoice::Label(label.clone())],
        PageSizeStrategy::LastOption => vec![OptionChoice::Last],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::mock::{MockListing, MockUi};

    struct Fixture {
        ui: MockUi,
        site: SiteProfile,
        timing: TimingConfig,
    }

    impl Fixture {
        fn new(listing: MockListing) -> Self {
            Self {
                ui: MockUi::new(listing),
                site: SiteProfile::default(),
                timing: TimingConfig::fast(),
            }
        }

        fn driver(&self) -> PaginationDriver<'_> {
            let tracker = TableTracker::new(
                &self.ui,
                &self.site.rows,
                self.timing.poll_interval(),
                self.timing.settle(),
            );
            PaginationDriver::new(&self.ui, &self.site, &self.timing, tracker)
        }
    }

    #[tokio::test]
    async fn test_open_retries_failed_tab_clicks() {
        let mut listing = MockListing::paged(1, 3);
        listing.tab_failures = 2;
        let fx = Fixture::new(listing);
        let mut driver = fx.driver();

        let sig = driver.open().await.unwrap();
        assert_eq!(sig.row_count, 3);
        assert_eq!(driver.state(), PaginationState::PageReady);
        assert_eq!(driver.page(), 1);
        assert_eq!(fx.ui.tab_clicks(), 3);
    }

    #[tokio::test]
    async fn test_open_gives_up_without_tab() {
        let mut listing = MockListing::paged(1, 3);
        listing.tab_present = false;
        let mut fx = Fixture::new(listing);
        fx.timing.element_timeout_secs = 0;
        let mut driver = fx.driver();

        assert!(matches!(driver.open().await, Err(HarvestError::Listing(_))));
    }

    #[tokio::test]
    async fn test_set_page_size_by_value() {
        let mut listing = MockListing::paged(2, 25);
        listing.page_size = 25;
        let fx = Fixture::new(listing);
        let mut driver = fx.driver();
        driver.open().await.unwrap();

        let label = driver.set_page_size().await.unwrap();
        assert_eq!(label, "100");
        assert_eq!(fx.ui.page_size(), 100);
    }

    #[tokio::test]
    async fn test_set_page_size_falls_back_to_last_option() {
        let mut listing = MockListing::paged(1, 3);
        listing.page_size_options = Some(vec![
            ("a".into(), "10".into()),
            ("b".into(), "All".into()),
        ]);
        let fx = Fixture::new(listing);
        let mut driver = fx.driver();
        driver.open().await.unwrap();

        assert_eq!(driver.set_page_size().await.unwrap(), "All");
    }

    #[tokio::test]
    async fn test_set_page_size_missing_control_fails_after_attempts() {
        let mut listing = MockListing::paged(1, 3);
        listing.page_size_options = None;
        let fx = Fixture::new(listing);
        let mut driver = fx.driver();
        driver.open().await.unwrap();

        let err = driver.set_page_size().await.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.target, "100");
        // one open plus one reopen per failed attempt
        assert_eq!(fx.ui.tab_clicks(), 4);
        assert_eq!(driver.state(), PaginationState::PageReady);
    }

    #[tokio::test]
    async fn test_set_page_size_failure_is_reported_once() {
        let mut listing = MockListing::paged(2, 3);
        listing.page_size_options = None;
        let fx = Fixture::new(listing);
        let mut driver = fx.driver();
        driver.open().await.unwrap();

        let err = driver.set_page_size().await.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert!(!err.last_error.is_empty());
        assert_eq!(fx.ui.tab_clicks(), 4);

        // the listing stays usable at its own page size
        assert!(matches!(driver.advance().await, Advance::Advanced(_)));
        assert_eq!(driver.advance().await, Advance::NoMorePages);
    }

    #[tokio::test]
    async fn test_advance_until_no_more_pages() {
        let fx = Fixture::new(MockListing::paged(3, 4));
        let mut driver = fx.driver();
        driver.open().await.unwrap();

        assert!(matches!(driver.advance().await, Advance::Advanced(_)));
        assert!(matches!(driver.advance().await, Advance::Advanced(_)));
        assert_eq!(driver.page(), 3);
        assert_eq!(driver.advance().await, Advance::NoMorePages);
        assert_eq!(driver.state(), PaginationState::Exhausted);
    }

    #[tokio::test]
    async fn test_ineffective_next_click_is_exhaustion() {
        let mut listing = MockListing::paged(2, 2);
        listing.next_enabled_at_end = true;
        let fx = Fixture::new(listing);
        let mut driver = fx.driver();
        driver.open().await.unwrap();

        assert!(matches!(driver.advance().await, Advance::Advanced(_)));
        assert_eq!(driver.advance().await, Advance::NoMorePages);
        assert_eq!(fx.ui.current_page(), 1);
    }

    #[tokio::test]
    async fn test_stale_read_before_click_on_last_page_is_not_progress() {
        let mut listing = MockListing::paged(2, 2);
        listing.next_enabled_at_end = true;
        let fx = Fixture::new(listing);
        let mut driver = fx.driver();
        driver.open().await.unwrap();
        assert!(matches!(driver.advance().await, Advance::Advanced(_)));

        fx.ui.fail_next_reads(1);
        assert_eq!(driver.advance().await, Advance::NoMorePages);
        assert_eq!(driver.page(), 2);
        assert_eq!(fx.ui.current_page(), 1);
    }

    #[tokio::test]
    async fn test_stale_read_before_click_still_advances() {
        let fx = Fixture::new(MockListing::paged(2, 2));
        let mut driver = fx.driver();
        driver.open().await.unwrap();

        fx.ui.fail_next_reads(1);
        let Advance::Advanced(sig) = driver.advance().await else {
            panic!("expected a new page");
        };
        assert!(sig.first_row.starts_with("Operative Report 2"));
        assert_eq!(driver.page(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_table_ends_pagination() {
        let mut listing = MockListing::paged(2, 2);
        listing.stale_rows = vec![0];
        let fx = Fixture::new(listing);
        let mut driver = fx.driver();
        fx.ui.open_tab_now();

        assert_eq!(driver.advance().await, Advance::NoMorePages);
        assert_eq!(fx.ui.current_page(), 0);
    }
}
