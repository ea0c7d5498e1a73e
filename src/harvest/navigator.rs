//! Login and subject lookup.

use tracing::{debug, info};

use crate::config::{Credentials, SiteProfile, TimingConfig};
use crate::error::{HarvestError, UiError};
use crate::retry::{retry_with_backoff, Backoff};
use crate::ui::{remove_overlays, robust_click, wait_for_element, UiDriver};

/// Drives the record system's login form and patient search.
pub struct Navigator<'a> {
    ui: &'a dyn UiDriver,
    site: &'a SiteProfile,
    timing: &'a TimingConfig,
}

impl<'a> Navigator<'a> {
    pub fn new(ui: &'a dyn UiDriver, site: &'a SiteProfile, timing: &'a TimingConfig) -> Self {
        Self { ui, site, timing }
    }

    /// Submit the login form. A site without a login profile is a no-op.
    pub async fn login(&self, credentials: &Credentials) -> Result<(), HarvestError> {
        let Some(login) = &self.site.login else {
            debug!("No login form configured");
            return Ok(());
        };
        let (Some(username), Some(password)) = (&credentials.username, &credentials.password)
        else {
            return Err(HarvestError::Session("credentials are incomplete".into()));
        };

        let result: Result<(), UiError> = async {
            self.ui.navigate(&login.url).await?;
            if let Some(landing) = &login.landing {
                let button = self.wait(landing).await?;
                robust_click(self.ui, &button).await?;
            }
            let user_field = self.wait(&login.username).await?;
            self.ui.type_text(&user_field, username).await?;
            let pass_field = self.wait(&login.password).await?;
            self.ui.type_text(&pass_field, password).await?;
            let submit = self.wait(&login.submit).await?;
            robust_click(self.ui, &submit).await?;
            tokio::time::sleep(self.timing.settle()).await;
            Ok(())
        }
        .await;

        result.map_err(|e| HarvestError::Session(format!("login failed: {}", e)))?;
        info!("Logged in as {}", username);
        Ok(())
    }

    /// Search for `id` and open its chart, retrying the whole sequence.
    pub async fn open_subject(&self, id: &str) -> Result<(), HarvestError> {
        let backoff = Backoff::new(self.timing.navigation_attempts, self.timing.backoff());
        retry_with_backoff(backoff, |_: &UiError| true, |attempt| async move {
            debug!(id, attempt, "Opening subject");
            self.search(id).await
        })
        .await
        .map_err(|e| HarvestError::Navigation {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
        info!(id, "Opened subject");
        Ok(())
    }

    async fn search(&self, id: &str) -> Result<(), UiError> {
        let search = &self.site.search;
        self.ui.navigate(&search.url).await?;
        remove_overlays(self.ui, &self.site.overlays).await;

        let combo = self.wait(&search.combo).await?;
        robust_click(self.ui, &combo).await?;
        let input = self.wait(&search.input).await?;
        self.ui.type_text(&input, id).await?;
        self.ui.press_enter(&input).await?;

        let result = self.wait(&search.result_row).await?;
        robust_click(self.ui, &result).await?;
        self.wait(&search.ready).await?;
        Ok(())
    }

    async fn wait(&self, selector: &str) -> Result<crate::ui::ElementRef, UiError> {
        wait_for_element(
            self.ui,
            selector,
            self.timing.element_timeout(),
            self.timing.poll_interval(),
        )
        .await
    }
}
