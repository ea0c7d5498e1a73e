//! UI automation seam.
//!
//! The harvesting pipeline never talks to a browser directly; it drives a
//! [`UiDriver`]. Element and context handles are opaque tokens minted by the
//! driver. A handle may go stale at any time when the page re-renders, in
//! which case operations on it fail with [`UiError::Stale`].

#[cfg(feature = "browser")]
mod chromium;
#[cfg(test)]
pub mod mock;
pub mod scripts;

#[cfg(feature = "browser")]
pub use chromium::ChromiumDriver;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::site::Strategy;
use crate::error::UiError;
use crate::retry::poll_until;

/// Opaque reference to a rendered element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(pub(crate) String);

impl ElementRef {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

/// Opaque reference to a browsing context (tab or window).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextId(pub(crate) String);

impl ContextId {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cookie extracted from the browser session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
}

/// Option to pick in a `<select>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionChoice {
    Value(String),
    Label(String),
    Last,
}

/// Browser operations the pipeline depends on.
///
/// `execute` runs `script` as a page-level expression when `receiver` is
/// `None`; otherwise `script` must be a JavaScript function declaration and
/// is called with `this` bound to the receiver element.
#[async_trait]
pub trait UiDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), UiError>;

    async fn locate(&self, selector: &str) -> Result<Option<ElementRef>, UiError>;

    async fn locate_all(&self, selector: &str) -> Result<Vec<ElementRef>, UiError>;

    async fn locate_within(
        &self,
        parent: &ElementRef,
        selector: &str,
    ) -> Result<Option<ElementRef>, UiError>;

    async fn locate_all_within(
        &self,
        parent: &ElementRef,
        selector: &str,
    ) -> Result<Vec<ElementRef>, UiError>;

    async fn click(&self, element: &ElementRef) -> Result<(), UiError>;

    async fn read_text(&self, element: &ElementRef) -> Result<String, UiError>;

    async fn read_attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, UiError>;

    async fn type_text(&self, element: &ElementRef, text: &str) -> Result<(), UiError>;

    async fn press_enter(&self, element: &ElementRef) -> Result<(), UiError>;

    /// Select an option in a `<select>`. Returns the visible label of the
    /// option now selected, or `None` if no option matched.
    async fn select_option(
        &self,
        select: &ElementRef,
        choice: &OptionChoice,
    ) -> Result<Option<String>, UiError>;

    async fn execute(
        &self,
        script: &str,
        receiver: Option<&ElementRef>,
    ) -> Result<serde_json::Value, UiError>;

    async fn cookies(&self) -> Result<Vec<BrowserCookie>, UiError>;

    async fn current_context(&self) -> Result<ContextId, UiError>;

    async fn contexts(&self) -> Result<Vec<ContextId>, UiError>;

    async fn switch_context(&self, id: &ContextId) -> Result<(), UiError>;

    async fn close_context(&self, id: &ContextId) -> Result<(), UiError>;

    /// URL of the focused context.
    async fn current_location(&self) -> Result<Option<String>, UiError>;
}

/// Walk an ordered strategy list and return the first element found.
pub async fn locate_first<K: Copy>(
    ui: &dyn UiDriver,
    strategies: &[Strategy<K>],
) -> Result<Option<(K, ElementRef)>, UiError> {
    for strategy in strategies {
        if let Some(el) = ui.locate(&strategy.matcher).await? {
            return Ok(Some((strategy.kind, el)));
        }
    }
    Ok(None)
}

/// Like [`locate_first`], scoped to a parent element.
pub async fn locate_first_within<K: Copy>(
    ui: &dyn UiDriver,
    parent: &ElementRef,
    strategies: &[Strategy<K>],
) -> Result<Option<(K, ElementRef)>, UiError> {
    for strategy in strategies {
        if let Some(el) = ui.locate_within(parent, &strategy.matcher).await? {
            return Ok(Some((strategy.kind, el)));
        }
    }
    Ok(None)
}

/// Wait until `selector` matches something.
pub async fn wait_for_element(
    ui: &dyn UiDriver,
    selector: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<ElementRef, UiError> {
    poll_until(timeout, interval, || async {
        ui.locate(selector).await.ok().flatten()
    })
    .await
    .ok_or_else(|| UiError::Timeout(timeout, selector.to_string()))
}

/// Remove every element matching any of `selectors` (modal backdrops and
/// dialogs that swallow clicks). Failures are ignored.
pub async fn remove_overlays(ui: &dyn UiDriver, selectors: &[String]) {
    if selectors.is_empty() {
        return;
    }
    let script = scripts::remove_all(selectors);
    if let Err(e) = ui.execute(&script, None).await {
        debug!("Overlay removal skipped: {}", e);
    }
}

/// Scroll an element to the middle of the viewport, then click it natively,
/// falling back to a script-dispatched click when the native click is
/// intercepted.
pub async fn robust_click(ui: &dyn UiDriver, element: &ElementRef) -> Result<(), UiError> {
    if let Err(e) = ui.execute(scripts::SCROLL_INTO_VIEW, Some(element)).await {
        debug!("Scroll into view failed: {}", e);
    }
    match ui.click(element).await {
        Ok(()) => Ok(()),
        Err(UiError::Stale(msg)) => Err(UiError::Stale(msg)),
        Err(e) => {
            debug!("Native click failed ({}), dispatching script click", e);
            ui.execute(scripts::CLICK, Some(element)).await.map(|_| ())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockListing, MockRow, MockUi};
    use super::*;
    use crate::config::site::{LinkKind, SiteProfile};

    #[tokio::test]
    async fn test_locate_first_short_circuits_in_order() {
        let ui = MockUi::new(MockListing::with_rows(vec![MockRow::linked(
            "Op Report",
            "Operative",
            "https://emr.example/ema/secure/fileattachment/1/op.pdf",
        )]));
        ui.open_tab_now();
        let profile = SiteProfile::default();
        let row = ui.locate(&profile.rows).await.unwrap().unwrap();

        let (kind, _) = locate_first_within(&ui, &row, &profile.link_strategies)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kind, LinkKind::AttachmentPath);
    }

    #[tokio::test]
    async fn test_wait_for_element_times_out() {
        let ui = MockUi::new(MockListing::with_rows(vec![]));
        let err = wait_for_element(
            &ui,
            "div.never",
            Duration::from_millis(5),
            Duration::from_millis(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, UiError::Timeout(..)));
    }

    #[tokio::test]
    async fn test_robust_click_falls_back_to_script_click() {
        let mut listing = MockListing::with_rows(vec![MockRow::linked("a", "b", "https://x/y.pdf")]);
        listing.block_native_clicks = true;
        let ui = MockUi::new(listing);
        let tab = ui.locate(&SiteProfile::default().listing_tab).await.unwrap().unwrap();

        robust_click(&ui, &tab).await.unwrap();
        assert!(ui.tab_is_open());
    }

    #[tokio::test]
    async fn test_robust_click_survives_scroll_failure() {
        let mut listing = MockListing::with_rows(vec![MockRow::linked("a", "b", "https://x/y.pdf")]);
        listing.block_scroll = true;
        let ui = MockUi::new(listing);
        let tab = ui.locate(&SiteProfile::default().listing_tab).await.unwrap().unwrap();

        robust_click(&ui, &tab).await.unwrap();
        assert!(ui.tab_is_open());
    }
}
