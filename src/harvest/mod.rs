//! Per-subject harvest orchestration.
//!
//! One subject at a time: open the chart, seed the download session, open
//! the attachment listing, negotiate the page size, then walk pages
//! strictly forward (extract, classify, retrieve) until there is no next
//! page. Only session or listing failures abort a subject; everything else
//! degrades and continues.

mod navigator;
mod report;

pub use navigator::Navigator;
pub use report::{
    escape_csv, run_timestamp, AuditEntry, AuditLog, HarvestStatus, RunSummary, SummaryRow,
    TIMESTAMP_FORMAT,
};

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::classify::age::resolve_cutoff;
use crate::classify::{AgeAssessor, Classifier, ProcedureDateOverrides};
use crate::config::HarvestConfig;
use crate::error::HarvestError;
use crate::listing::{Advance, AttachmentRecord, PaginationDriver, RowExtractor, TableTracker};
use crate::retrieval::{sanitize_filename, DocumentStore, FetchOutcome, RetrievalEngine, SessionFactory};
use crate::ui::UiDriver;

/// Runs harvests and owns the run's ledgers.
pub struct Harvester<'a> {
    ui: &'a dyn UiDriver,
    config: &'a HarvestConfig,
    sessions: &'a dyn SessionFactory,
    classifier: Classifier,
    assessor: AgeAssessor,
    output: PathBuf,
    summary: RunSummary,
    audit: AuditLog,
}

impl<'a> Harvester<'a> {
    pub fn new(
        ui: &'a dyn UiDriver,
        config: &'a HarvestConfig,
        sessions: &'a dyn SessionFactory,
        output: &Path,
    ) -> anyhow::Result<Self> {
        let classifier = Classifier::from_config(&config.classifier)?;
        let overrides = match &config.classifier.procedure_dates {
            Some(path) => ProcedureDateOverrides::load(path).with_context(|| {
                format!("Failed to read procedure dates from {}", path.display())
            })?,
            None => ProcedureDateOverrides::default(),
        };
        let cutoff = resolve_cutoff(
            config.classifier.min_date,
            config.classifier.max_age_years,
            chrono::Local::now().date_naive(),
        );
        info!(
            threshold = classifier.threshold(),
            overrides = overrides.len(),
            "Age cutoff {}",
            cutoff
        );

        std::fs::create_dir_all(output)
            .with_context(|| format!("Failed to create output directory {}", output.display()))?;
        let stamp = run_timestamp();
        let summary = RunSummary::create(output, &stamp).context("Failed to create run summary")?;
        let audit = AuditLog::create(output, &stamp).context("Failed to create audit log")?;

        Ok(Self {
            ui,
            config,
            sessions,
            classifier,
            assessor: AgeAssessor::new(cutoff, overrides),
            output: output.to_path_buf(),
            summary,
            audit,
        })
    }

    pub fn summary_path(&self) -> &Path {
        self.summary.path()
    }

    pub fn audit_path(&self) -> &Path {
        self.audit.path()
    }

    /// Log in through the site's form.
    pub async fn login(&self) -> Result<(), HarvestError> {
        Navigator::new(self.ui, &self.config.site, &self.config.timing)
            .login(&self.config.credentials)
            .await
    }

    /// Harvest one subject and append its summary row. Never fails: an
    /// aborted subject is recorded with status `aborted`.
    pub async fn harvest_subject(&mut self, id: &str) -> SummaryRow {
        let mut row = SummaryRow::new(id);
        if let Err(e) = self.run(id, &mut row).await {
            warn!(id, "Harvest aborted: {}", e);
            row = row.aborted();
        }
        info!(
            id,
            saved = row.saved,
            pages = row.pages_visited,
            candidates = row.candidates,
            "Harvest {}",
            row.status.as_str()
        );
        if let Err(e) = self.summary.append(&row) {
            warn!(id, "Could not append run summary: {}", e);
        }
        row
    }

    async fn run(&mut self, id: &str, row: &mut SummaryRow) -> Result<(), HarvestError> {
        let config = self.config;
        let ui = self.ui;
        let site = &config.site;
        let timing = &config.timing;

        Navigator::new(ui, site, timing).open_subject(id).await?;
        let client = self.sessions.establish(ui).await?;
        let store = DocumentStore::open(self.output.join(sanitize_filename(id)))?;

        let tracker = TableTracker::new(ui, &site.rows, timing.poll_interval(), timing.settle());
        let mut pager = PaginationDriver::new(ui, site, timing, tracker);
        pager.open().await?;
        if let Err(e) = pager.set_page_size().await {
            warn!(id, "{}; continuing at the listing's page size", e);
            row.page_size_degraded = true;
        }

        let extractor = RowExtractor::new(ui, site, tracker, timing.table_timeout());
        let mut engine = RetrievalEngine::new(ui, site, timing, client, store, id);

        loop {
            pager.begin_page();
            let page = pager.page();
            row.pages_visited += 1;
            let records = extractor.extract_page().await;
            info!(id, page, rows = records.len(), "Harvesting page");
            self.harvest_page(id, page, &records, &mut engine, row).await;

            match pager.advance().await {
                Advance::Advanced(_) => continue,
                Advance::NoMorePages => break,
            }
        }
        debug!(id, state = ?pager.state(), "Pagination finished");

        if row.saved == 0 {
            info!(id, "Nothing saved; sweeping attachment anchors");
            row.saved += engine.sweep().await;
        }
        Ok(())
    }

    async fn harvest_page(
        &mut self,
        id: &str,
        page: usize,
        records: &[AttachmentRecord],
        engine: &mut RetrievalEngine<'_>,
        row: &mut SummaryRow,
    ) {
        let mut link_candidates = 0;
        let mut link_bytes = false;
        let mut unfetched = Vec::new();

        for record in records {
            let age = self.assessor.assess(
                Some(id),
                record.encounter_date.as_deref(),
                record.document_date.as_deref(),
                &record.title,
            );
            let result = self.classifier.evaluate(record);
            let entry = AuditEntry {
                id,
                page,
                record,
                age: &age,
                result: &result,
            };
            if let Err(e) = self.audit.append(&entry) {
                warn!(id, page, "Could not append audit row: {}", e);
            }

            if !result.passes {
                debug!(id, page, title = %record.title, score = result.score, "Skipped");
                continue;
            }
            row.candidates += 1;
            if age.older_than_cutoff {
                debug!(id, page, title = %record.title, "Older than {}", age.cutoff);
            }

            let outcome = engine.fetch(record, page).await;
            if record.link.is_some() {
                link_candidates += 1;
                link_bytes |= outcome.received_bytes();
                if outcome == FetchOutcome::NotSaved {
                    unfetched.push(record);
                    continue;
                }
            }
            tally(row, &outcome);
        }

        if link_candidates == 0 || link_bytes {
            row.failures += unfetched.len();
            return;
        }

        info!(
            id,
            page,
            "Direct links returned nothing; clicking {} rows",
            unfetched.len()
        );
        for record in unfetched {
            let outcome = match record.fallback_handle(&self.config.site) {
                Some(handle) => {
                    engine
                        .fetch_via_interaction(&handle, &record.title, page)
                        .await
                }
                None => FetchOutcome::NotSaved,
            };
            tally(row, &outcome);
        }
    }
}

fn tally(row: &mut SummaryRow, outcome: &FetchOutcome) {
    match outcome {
        FetchOutcome::Saved(_) => row.saved += 1,
        FetchOutcome::Duplicate => row.duplicates += 1,
        FetchOutcome::NotSaved => row.failures += 1,
    }
}
