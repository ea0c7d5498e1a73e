//! The `classify` command: score one attachment without a browser.

use anyhow::Context;
use serde::Serialize;

use crate::classify::age::resolve_cutoff;
use crate::classify::{AgeAssessment, AgeAssessor, ClassificationResult, Classifier, ProcedureDateOverrides};
use crate::config::HarvestConfig;
use crate::listing::AttachmentRecord;

#[derive(Serialize)]
struct Report {
    classification: ClassificationResult,
    age: AgeAssessment,
}

pub fn cmd_classify(
    config: &HarvestConfig,
    title: &str,
    category: &str,
    body: &str,
    date: Option<&str>,
    id: Option<&str>,
) -> anyhow::Result<()> {
    let report = classify_one(config, title, category, body, date, id)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn classify_one(
    config: &HarvestConfig,
    title: &str,
    category: &str,
    body: &str,
    date: Option<&str>,
    id: Option<&str>,
) -> anyhow::Result<Report> {
    let classifier = Classifier::from_config(&config.classifier)?;
    let overrides = match &config.classifier.procedure_dates {
        Some(path) => ProcedureDateOverrides::load(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => ProcedureDateOverrides::default(),
    };
    let cutoff = resolve_cutoff(
        config.classifier.min_date,
        config.classifier.max_age_years,
        chrono::Local::now().date_naive(),
    );

    let mut record = AttachmentRecord::from_text(title, category, body);
    record.document_date = date.map(str::to_string);

    Ok(Report {
        classification: classifier.evaluate(&record),
        age: AgeAssessor::new(cutoff, overrides).assess(
            id,
            record.encounter_date.as_deref(),
            record.document_date.as_deref(),
            &record.title,
        ),
    })
}
