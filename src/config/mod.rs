//! Configuration for chartharvest.
//!
//! Settings come from a TOML file (explicit `--config`, else
//! `chartharvest.toml` in the working directory, else built-in defaults) and
//! are then overlaid with `CHARTHARVEST_*` environment variables. A `.env`
//! file is loaded by `main` before any of this runs.

mod browser;
pub mod site;

pub use browser::BrowserConfig;
pub use site::SiteProfile;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classify::RuleSetConfig;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "chartharvest.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "CHARTHARVEST_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarvestConfig {
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub site: SiteProfile,
}

/// Classifier and age-assessment settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Use the looser threshold preset.
    #[serde(default)]
    pub aggressive: bool,
    /// Explicit pass threshold; overrides the preset when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<i32>,
    /// Fixed age cutoff. Takes precedence over `max_age_years`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_date: Option<NaiveDate>,
    /// Rolling cutoff window in years.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_years: Option<u32>,
    /// CSV of `MRN,ProcedureDate` overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procedure_dates: Option<PathBuf>,
    /// Replacement rule set. Built-in operative-report rules when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<RuleSetConfig>,
}

/// Wait and retry budgets. All waits are bounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Interval between table signature reads.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Pause between the two reads that confirm a signature is stable.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Budget for the table to settle after page-size changes and extraction.
    #[serde(default = "default_table_timeout_secs")]
    pub table_timeout_secs: u64,
    /// Budget for the table to change after clicking "next".
    #[serde(default = "default_advance_timeout_secs")]
    pub advance_timeout_secs: u64,
    /// Budget for an element to appear.
    #[serde(default = "default_element_timeout_secs")]
    pub element_timeout_secs: u64,
    /// Attempts at opening the attachment listing.
    #[serde(default = "default_attempts")]
    pub open_attempts: u32,
    /// Attempts at negotiating the page size.
    #[serde(default = "default_attempts")]
    pub page_size_attempts: u32,
    /// Attempts at opening a subject by identifier.
    #[serde(default = "default_attempts")]
    pub navigation_attempts: u32,
    /// Attempts for transient UI errors (stale elements, overlays).
    #[serde(default = "default_attempts")]
    pub transient_attempts: u32,
    /// Initial backoff between transient retries.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Wait after a fallback click before looking for a new context.
    #[serde(default = "default_context_wait_ms")]
    pub context_wait_ms: u64,
    /// Per-document HTTP timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            settle_ms: default_settle_ms(),
            table_timeout_secs: default_table_timeout_secs(),
            advance_timeout_secs: default_advance_timeout_secs(),
            element_timeout_secs: default_element_timeout_secs(),
            open_attempts: default_attempts(),
            page_size_attempts: default_attempts(),
            navigation_attempts: default_attempts(),
            transient_attempts: default_attempts(),
            backoff_ms: default_backoff_ms(),
            context_wait_ms: default_context_wait_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn table_timeout(&self) -> Duration {
        Duration::from_secs(self.table_timeout_secs)
    }

    pub fn advance_timeout(&self) -> Duration {
        Duration::from_secs(self.advance_timeout_secs)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.element_timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn context_wait(&self) -> Duration {
        Duration::from_millis(self.context_wait_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Millisecond-scale budgets for driving the in-memory listing in tests.
    #[cfg(test)]
    pub fn fast() -> Self {
        Self {
            poll_interval_ms: 1,
            settle_ms: 1,
            table_timeout_secs: 1,
            advance_timeout_secs: 1,
            element_timeout_secs: 1,
            backoff_ms: 1,
            context_wait_ms: 1,
            ..Self::default()
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_settle_ms() -> u64 {
    300
}

fn default_table_timeout_secs() -> u64 {
    12
}

fn default_advance_timeout_secs() -> u64 {
    10
}

fn default_element_timeout_secs() -> u64 {
    20
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    800
}

fn default_context_wait_ms() -> u64 {
    1200
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// Where harvested documents and run ledgers go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Root directory; one subdirectory per identifier. `~` is expanded.
    #[serde(default = "default_output_dir")]
    pub directory: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
        }
    }
}

impl OutputConfig {
    /// Output root with `~` and environment variables expanded.
    pub fn resolved_directory(&self) -> PathBuf {
        let expanded = shellexpand::full(&self.directory)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| self.directory.clone());
        PathBuf::from(expanded)
    }
}

fn default_output_dir() -> String {
    "./Activity_PDF_Output".to_string()
}

/// Login credentials. Only ever read from the environment in practice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl Credentials {
    pub fn is_complete(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.is_empty()) && self.password.is_some()
    }
}

impl HarvestConfig {
    /// Load from an explicit path, the default file, or defaults, then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                    Self::default()
                }
            }
        };
        config.apply_env_with(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: HarvestConfig = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Overlay `CHARTHARVEST_*` variables using the given lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.trim().is_empty())
        };

        if let Some(v) = var("AGGRESSIVE") {
            self.classifier.aggressive = matches!(v.trim(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = var("MIN_DATE") {
            match NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d") {
                Ok(d) => self.classifier.min_date = Some(d),
                Err(e) => warn!("Ignoring {}MIN_DATE={:?}: {}", ENV_PREFIX, v, e),
            }
        }
        if let Some(v) = var("MAX_AGE_YEARS") {
            match v.trim().parse::<u32>() {
                Ok(years) => self.classifier.max_age_years = Some(years),
                Err(e) => warn!("Ignoring {}MAX_AGE_YEARS={:?}: {}", ENV_PREFIX, v, e),
            }
        }
        if let Some(v) = var("PROCEDURE_DATES") {
            self.classifier.procedure_dates = Some(PathBuf::from(v));
        }
        if let Some(v) = var("OUTPUT_DIR") {
            self.output.directory = v;
        }
        if let Some(v) = var("USERNAME") {
            self.credentials.username = Some(v);
        }
        if let Some(v) = var("PASSWORD") {
            self.credentials.password = Some(v);
        }
        if let Some(v) = var("REMOTE_BROWSER") {
            self.browser.remote_url = Some(v);
        }
    }

    /// Render the effective configuration as TOML (passwords omitted).
    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}
