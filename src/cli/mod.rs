//! CLI parser and command dispatch.

mod classify;
mod config_cmd;
mod harvest;
mod helpers;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::HarvestConfig;

#[derive(Parser)]
#[command(name = "chartharvest")]
#[command(about = "Harvest and classify attachments from web-based patient record systems")]
#[command(version)]
pub struct Cli {
    /// Config file path (default: ./chartharvest.toml if present)
    #[arg(short, long, global = true, env = "CHARTHARVEST_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also append logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest attachments for one or more patient identifiers
    Harvest {
        /// Patient identifiers (MRNs)
        ids: Vec<String>,
        /// File with one identifier per line (a CSV's first column works too)
        #[arg(long)]
        ids_file: Option<PathBuf>,
        /// Output directory (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Skip the login form (e.g. when attached to a logged-in browser)
        #[arg(long)]
        no_login: bool,
        /// Use the looser classification threshold
        #[arg(long)]
        aggressive: bool,
    },

    /// Score a single attachment and print the result as JSON
    Classify {
        /// Attachment title
        #[arg(long)]
        title: String,
        /// Attachment category
        #[arg(long, default_value = "")]
        category: String,
        /// Preview text
        #[arg(long, default_value = "")]
        body: String,
        /// Document date as shown in the listing
        #[arg(long)]
        date: Option<String>,
        /// Patient identifier, for procedure date overrides
        #[arg(long)]
        id: Option<String>,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = HarvestConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Harvest {
            ids,
            ids_file,
            output,
            no_login,
            aggressive,
        } => {
            if aggressive {
                config.classifier.aggressive = true;
            }
            let ids = helpers::collect_ids(ids, ids_file.as_deref())?;
            harvest::cmd_harvest(&config, &ids, output, !no_login).await
        }
        Commands::Classify {
            title,
            category,
            body,
            date,
            id,
        } => classify::cmd_classify(&config, &title, &category, &body, date.as_deref(), id.as_deref()),
        Commands::Config { command } => match command {
            ConfigCommands::Show => config_cmd::cmd_config_show(&config),
        },
    }
}
