//! The `harvest` command.

use std::path::{Path, PathBuf};

use console::style;

use super::helpers::progress_bar;
use crate::config::HarvestConfig;
use crate::harvest::{HarvestStatus, Harvester};
use crate::retrieval::HttpSessionFactory;
use crate::ui::UiDriver;

#[cfg(feature = "browser")]
pub async fn cmd_harvest(
    config: &HarvestConfig,
    ids: &[String],
    output: Option<PathBuf>,
    login: bool,
) -> anyhow::Result<()> {
    let output = output.unwrap_or_else(|| config.output.resolved_directory());
    let driver = crate::ui::ChromiumDriver::start(&config.browser).await?;
    let result = run_harvest(config, &driver, ids, &output, login).await;
    driver.shutdown().await;
    result
}

#[cfg(not(feature = "browser"))]
pub async fn cmd_harvest(
    _config: &HarvestConfig,
    _ids: &[String],
    _output: Option<PathBuf>,
    _login: bool,
) -> anyhow::Result<()> {
    anyhow::bail!("chartharvest was built without the `browser` feature")
}

#[cfg_attr(not(feature = "browser"), allow(dead_code))]
async fn run_harvest(
    config: &HarvestConfig,
    driver: &dyn UiDriver,
    ids: &[String],
    output: &Path,
    login: bool,
) -> anyhow::Result<()> {
    let sessions = HttpSessionFactory {
        timeout: config.timing.request_timeout(),
        proxy: config.browser.proxy.clone(),
    };
    let mut harvester = Harvester::new(driver, config, &sessions, output)?;

    if login && config.credentials.is_complete() {
        harvester.login().await?;
    } else if login {
        tracing::info!("No credentials configured; assuming the browser is already logged in");
    }

    let pb = progress_bar(ids.len() as u64)?;
    let mut saved = 0;
    let mut aborted = 0;
    for id in ids {
        pb.set_message(id.clone());
        let row = harvester.harvest_subject(id).await;
        saved += row.saved;
        let marker = match row.status {
            HarvestStatus::Completed => style("✓").green(),
            HarvestStatus::Aborted => {
                aborted += 1;
                style("✗").red()
            }
        };
        pb.println(format!(
            "{} {}: {} saved, {} pages, {} candidates{}",
            marker,
            id,
            row.saved,
            row.pages_visited,
            row.candidates,
            if row.page_size_degraded {
                " (default page size)"
            } else {
                ""
            }
        ));
        pb.inc(1);
    }
    pb.finish_and_clear();

    println!(
        "{} {} documents saved for {} identifiers ({} aborted)",
        style("Done:").bold(),
        saved,
        ids.len(),
        aborted
    );
    println!("  {} {}", style("→").dim(), harvester.summary_path().display());
    println!("  {} {}", style("→").dim(), harvester.audit_path().display());
    Ok(())
}
