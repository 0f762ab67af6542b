use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracker_core::{Status, ValueKind};
use tracker_engine::DEFAULT_CONFIG_FILENAME;

#[derive(Debug, Parser)]
#[command(name = "tracker")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Track values on web pages and reconcile them against verified baselines", long_about = None)]
pub struct Cli {
    /// Configuration file (RON). Missing means defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILENAME)]
    pub config: PathBuf,

    /// Log file, `./tracker.log` by default
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Also log to stderr, at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Use the longer production extraction timeouts
    #[arg(long, global = true)]
    pub production: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write a configuration file with the default settings
    Init,

    /// Start tracking a value. New AUTO datapoints are scraped right away.
    Add {
        name: String,
        url: String,
        xpath: String,
        #[arg(long, default_value = "TXT")]
        kind: ValueKind,
        #[arg(long)]
        group: Option<String>,
        #[arg(long, default_value = "AUTO")]
        status: Status,
    },

    /// List every datapoint
    List,

    /// Re-extract one datapoint locally
    Scrape { id: u64 },

    /// Scrape everything in AUTO, VERIFY or FIX
    ScrapeAll {
        /// Send the batch to the scraper service
        #[arg(long)]
        remote: bool,
    },

    /// Periodic run over AUTO datapoints, retrying transient service failures
    RunAuto {
        /// Extract in-process instead of calling the scraper service
        #[arg(long)]
        local: bool,
    },

    /// Scrape the AUTO datapoints of one data group
    ScrapeGroup {
        name: String,
        #[arg(long)]
        remote: bool,
    },

    /// Accept the latest scraped value as the new baseline
    Verify { id: u64 },

    /// Take a datapoint out of automation, optionally with a hand-entered value
    Manual { id: u64, value: Option<String> },

    /// Hand a MANUAL datapoint back to automation
    Release { id: u64 },

    /// Test a selection rule against a page without storing anything
    Probe {
        url: String,
        xpath: String,
        #[arg(long, default_value = "TXT")]
        kind: ValueKind,
        #[arg(long)]
        remote: bool,
    },
}
