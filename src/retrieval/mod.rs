//! Document retrieval: authenticated fetch, click fallback, persistence.

mod response;
mod session;
mod store;

pub use response::{
    document_extension, is_document_url, parse_content_disposition_filename, sanitize_filename,
    suggested_filename, DocumentResponse, DOCUMENT_EXTENSIONS, FALLBACK_FILENAME,
};
pub use session::{DocumentClient, HttpSession, HttpSessionFactory, SessionFactory};
pub use store::{compute_hash, numbered_filename, ContentLedger, DocumentStore, SaveOutcome, LEDGER_FILE};

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::{debug, info, warn};
use url::Url;

use crate::config::{SiteProfile, TimingConfig};
use crate::error::{RetrievalError, UiError};
use crate::listing::{absolutize, AttachmentRecord, InteractionHandle};
use crate::ui::{robust_click, ContextId, UiDriver};

/// Outcome of one retrieval attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Saved(PathBuf),
    /// Bytes arrived but were already in the ledger.
    Duplicate,
    NotSaved,
}

impl FetchOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, FetchOutcome::Saved(_))
    }

    /// Whether the server produced any bytes at all.
    pub fn received_bytes(&self) -> bool {
        !matches!(self, FetchOutcome::NotSaved)
    }
}

/// Fetches and persists documents for one subject.
pub struct RetrievalEngine<'a> {
    ui: &'a dyn UiDriver,
    site: &'a SiteProfile,
    timing: &'a TimingConfig,
    client: Box<dyn DocumentClient>,
    store: DocumentStore,
    id: String,
}

impl<'a> RetrievalEngine<'a> {
    pub fn new(
        ui: &'a dyn UiDriver,
        site: &'a SiteProfile,
        timing: &'a TimingConfig,
        client: Box<dyn DocumentClient>,
        store: DocumentStore,
        id: impl Into<String>,
    ) -> Self {
        Self {
            ui,
            site,
            timing,
            client,
            store,
            id: id.into(),
        }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Retrieve a record: direct link if it has one, else its interaction
    /// handle. Failures are logged, never raised.
    pub async fn fetch(&mut self, record: &AttachmentRecord, page: usize) -> FetchOutcome {
        if let Some(link) = &record.link {
            return match self.fetch_url(link).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(id = %self.id, page, title = %record.title, "Fetch failed: {}", e);
                    FetchOutcome::NotSaved
                }
            };
        }
        if let Some(handle) = &record.interaction_handle {
            return self.fetch_via_interaction(handle, &record.title, page).await;
        }
        FetchOutcome::NotSaved
    }

    /// Authenticated GET and persist.
    pub async fn fetch_url(&mut self, url: &Url) -> Result<FetchOutcome, RetrievalError> {
        if !is_document_url(url) {
            return Err(RetrievalError::UnsupportedType(url.to_string()));
        }
        let response = self.client.get(url).await?;
        if !response.is_success() {
            return Err(RetrievalError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }
        if response.body.is_empty() {
            return Err(RetrievalError::EmptyBody(url.to_string()));
        }

        let filename = response.suggested_filename();
        match self.store.save(&response.body, &filename)? {
            SaveOutcome::Saved(path) => {
                info!(id = %self.id, "Saved {}", path.display());
                Ok(FetchOutcome::Saved(path))
            }
            SaveOutcome::Duplicate => {
                debug!(id = %self.id, "Duplicate content skipped: {}", filename);
                Ok(FetchOutcome::Duplicate)
            }
        }
    }

    /// Click the row's handle, look for a newly opened viewer context, and
    /// fetch its location if it is a document. Every new context is closed
    /// and the starting context restored.
    pub async fn fetch_via_interaction(
        &mut self,
        handle: &InteractionHandle,
        title: &str,
        page: usize,
    ) -> FetchOutcome {
        let origin = match self.ui.current_context().await {
            Ok(c) => c,
            Err(e) => {
                warn!(id = %self.id, page, title, "No current context: {}", e);
                return FetchOutcome::NotSaved;
            }
        };
        let before: HashSet<ContextId> = self
            .ui
            .contexts()
            .await
            .unwrap_or_default()
            .into_iter()
            .collect();

        let location = match self.open_viewer(handle, &before).await {
            Ok(loc) => loc,
            Err(e) => {
                warn!(id = %self.id, page, title, "Click fallback failed: {}", e);
                None
            }
        };

        self.restore_contexts(&origin, &before).await;

        let Some(url) = location.as_deref().and_then(|l| Url::parse(l).ok()) else {
            debug!(id = %self.id, page, title, "Click fallback opened no document");
            return FetchOutcome::NotSaved;
        };
        match self.fetch_url(&url).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(id = %self.id, page, title, "Fetch after click failed: {}", e);
                FetchOutcome::NotSaved
            }
        }
    }

    async fn open_viewer(
        &self,
        handle: &InteractionHandle,
        before: &HashSet<ContextId>,
    ) -> Result<Option<String>, UiError> {
        let rows = self.ui.locate_all(&self.site.rows).await?;
        let row = rows
            .get(handle.row_index)
            .ok_or_else(|| UiError::NotFound(format!("row {}", handle.row_index)))?;
        let target = self
            .ui
            .locate_within(row, &handle.matcher)
            .await?
            .ok_or_else(|| UiError::NotFound(handle.matcher.clone()))?;

        robust_click(self.ui, &target).await?;
        tokio::time::sleep(self.timing.context_wait()).await;

        let opened = self
            .ui
            .contexts()
            .await?
            .into_iter()
            .find(|c| !before.contains(c));
        let Some(opened) = opened else {
            return Ok(None);
        };
        self.ui.switch_context(&opened).await?;
        self.ui.current_location().await
    }

    async fn restore_contexts(&self, origin: &ContextId, before: &HashSet<ContextId>) {
        let extra: Vec<ContextId> = match self.ui.contexts().await {
            Ok(all) => all.into_iter().filter(|c| !before.contains(c)).collect(),
            Err(e) => {
                debug!("Could not list contexts: {}", e);
                Vec::new()
            }
        };
        for ctx in &extra {
            if let Err(e) = self.ui.close_context(ctx).await {
                debug!("Could not close context {}: {}", ctx, e);
            }
        }
        if let Err(e) = self.ui.switch_context(origin).await {
            warn!(id = %self.id, "Could not return to original context: {}", e);
        }
    }

    /// Last-resort pass over every visible attachment anchor whose href
    /// contains one of the sweep keywords. Returns the number saved.
    pub async fn sweep(&mut self) -> usize {
        let anchors = match self.ui.locate_all(&self.site.sweep.anchors).await {
            Ok(a) => a,
            Err(e) => {
                warn!(id = %self.id, "Sweep could not list anchors: {}", e);
                return 0;
            }
        };
        let base = self
            .ui
            .current_location()
            .await
            .ok()
            .flatten()
            .and_then(|l| Url::parse(&l).ok());

        let mut seen = HashSet::new();
        let mut saved = 0;
        for anchor in &anchors {
            let Ok(Some(href)) = self.ui.read_attribute(anchor, "href").await else {
                continue;
            };
            let lower = href.to_lowercase();
            if !self.site.sweep.keywords.iter().any(|k| lower.contains(k.as_str())) {
                continue;
            }
            let Some(url) = absolutize(&href, base.as_ref()) else {
                continue;
            };
            if !seen.insert(url.clone()) {
                continue;
            }
            match self.fetch_url(&url).await {
                Ok(outcome) if outcome.is_saved() => saved += 1,
                Ok(_) => {}
                Err(e) => warn!(id = %self.id, "Sweep fetch failed for {}: {}", url, e),
            }
        }
        info!(id = %self.id, "Sweep saved {} of {} anchors", saved, anchors.len());
        saved
    }
}
