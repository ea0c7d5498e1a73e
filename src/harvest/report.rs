//! Run ledgers: the per-identifier summary and the classification audit.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;

use crate::classify::{AgeAssessment, ClassificationResult, RuleGroup};
use crate::listing::AttachmentRecord;

/// Timestamp format used in ledger file names and summary rows.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub fn run_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Quote a field when it holds a separator, quote, or newline.
pub fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn csv_line(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| escape_csv(f))
        .collect::<Vec<_>>()
        .join(",")
}

/// Append-mode CSV writer that emits its header only for a new file.
#[derive(Debug)]
struct CsvLedger {
    path: PathBuf,
    file: File,
}

impl CsvLedger {
    fn open(path: PathBuf, header: &[&str]) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let fresh = !path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if fresh {
            let header: Vec<String> = header.iter().map(|h| h.to_string()).collect();
            writeln!(file, "{}", csv_line(&header))?;
        }
        Ok(Self { path, file })
    }

    fn append(&mut self, fields: &[String]) -> io::Result<()> {
        writeln!(self.file, "{}", csv_line(fields))?;
        self.file.flush()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HarvestStatus {
    Completed,
    Aborted,
}

impl HarvestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HarvestStatus::Completed => "completed",
            HarvestStatus::Aborted => "aborted",
        }
    }
}

/// One identifier's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryRow {
    pub id: String,
    pub saved: usize,
    pub timestamp: String,
    pub pages_visited: usize,
    /// Rows that passed classification.
    pub candidates: usize,
    pub duplicates: usize,
    pub failures: usize,
    pub page_size_degraded: bool,
    pub status: HarvestStatus,
}

impl SummaryRow {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            saved: 0,
            timestamp: run_timestamp(),
            pages_visited: 0,
            candidates: 0,
            duplicates: 0,
            failures: 0,
            page_size_degraded: false,
            status: HarvestStatus::Completed,
        }
    }

    pub fn aborted(mut self) -> Self {
        self.status = HarvestStatus::Aborted;
        self
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.saved.to_string(),
            self.timestamp.clone(),
            self.pages_visited.to_string(),
            self.candidates.to_string(),
            self.duplicates.to_string(),
            self.failures.to_string(),
            self.page_size_degraded.to_string(),
            self.status.as_str().to_string(),
        ]
    }
}

const SUMMARY_HEADER: &[&str] = &[
    "id",
    "documents_saved",
    "timestamp",
    "pages_visited",
    "candidates",
    "duplicates",
    "failures",
    "page_size_degraded",
    "status",
];

/// `run_summary_<timestamp>.csv`, one row per processed identifier.
#[derive(Debug)]
pub struct RunSummary {
    ledger: CsvLedger,
}

impl RunSummary {
    pub fn create(output: &Path, stamp: &str) -> io::Result<Self> {
        let path = output.join(format!("run_summary_{}.csv", stamp));
        Ok(Self {
            ledger: CsvLedger::open(path, SUMMARY_HEADER)?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.ledger.path
    }

    pub fn append(&mut self, row: &SummaryRow) -> io::Result<()> {
        self.ledger.append(&row.fields())
    }
}

/// One evaluated record.
#[derive(Debug, Clone)]
pub struct AuditEntry<'r> {
    pub id: &'r str,
    pub page: usize,
    pub record: &'r AttachmentRecord,
    pub age: &'r AgeAssessment,
    pub result: &'r ClassificationResult,
}

const AUDIT_HEADER: &[&str] = &[
    "id",
    "page",
    "row",
    "category",
    "title",
    "encounter_date",
    "document_date",
    "best_date",
    "older_than_cutoff",
    "cutoff",
    "score",
    "threshold",
    "passes",
    "category_score",
    "title_score",
    "positive_score",
    "negative_score",
    "category_positive",
    "category_negative",
    "category_hits",
    "title_hits",
    "positive_hits",
    "negative_hits",
];

fn date_field(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

impl AuditEntry<'_> {
    fn fields(&self) -> Vec<String> {
        let r = self.result;
        let joined = |groups: &[RuleGroup]| {
            groups
                .iter()
                .flat_map(|g| r.hits(*g))
                .collect::<Vec<_>>()
                .join(";")
        };
        vec![
            self.id.to_string(),
            self.page.to_string(),
            self.record.row_index.to_string(),
            self.record.category.clone(),
            self.record.title.clone(),
            self.record.encounter_date.clone().unwrap_or_default(),
            self.record.document_date.clone().unwrap_or_default(),
            date_field(self.age.best_date),
            self.age.older_than_cutoff.to_string(),
            date_field(Some(self.age.cutoff)),
            r.score.to_string(),
            r.threshold.to_string(),
            r.passes.to_string(),
            r.components.category.to_string(),
            r.components.title.to_string(),
            r.components.positive.to_string(),
            r.components.negative.to_string(),
            r.category_positive.to_string(),
            r.category_negative.to_string(),
            joined(&[RuleGroup::CategoryPositive, RuleGroup::CategoryNegative]),
            joined(&[RuleGroup::Title]),
            joined(&[RuleGroup::Positive]),
            joined(&[RuleGroup::Negative]),
        ]
    }
}

/// `classification_audit_<timestamp>.csv`, one row per evaluated record.
#[derive(Debug)]
pub struct AuditLog {
    ledger: CsvLedger,
}

impl AuditLog {
    pub fn create(output: &Path, stamp: &str) -> io::Result<Self> {
        let path = output.join(format!("classification_audit_{}.csv", stamp));
        Ok(Self {
            ledger: CsvLedger::open(path, AUDIT_HEADER)?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.ledger.path
    }

    pub fn append(&mut self, entry: &AuditEntry<'_>) -> io::Result<()> {
        self.ledger.append(&entry.fields())
    }
}
