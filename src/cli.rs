use std::path::PathBuf;

use clap::builder::RangedU64ValueParser;
use clap::{Args, Parser, Subcommand};

use crate::context::DEFAULT_BASE_URL;
use crate::extract::DEFAULT_MIN_TEXT_CHARS;

#[derive(Parser, Debug)]
#[command(
    name = "normharvest",
    version,
    about = "Year-by-year harvesting of the ANTAQ regulatory norms portal"
)]
pub struct Cli {
    /// Root directory for checkpoint, command, lock, corpus and reports.
    #[arg(long, global = true, default_value = ".cache/normharvest")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Harvest a year range, continuing from the checkpoint when one exists.
    Harvest(HarvestArgs),
    /// Show checkpoint, writer liveness, pending command and corpus aggregates.
    Status(StatusArgs),
    /// Ask the running harvest to pause at the next year boundary.
    Pause,
    /// Ask the running harvest to stop at the next year boundary.
    Stop,
    /// Continue a paused or stopped harvest.
    Resume(ResumeArgs),
    /// Terminate the running harvest process.
    Kill(KillArgs),
    /// Remove checkpoint, pending command and stale lock.
    Clear,
    /// Write a report of records without content.
    Report(ReportArgs),
    /// Retry extraction for records that have a PDF URL but no content.
    Reprocess(ReprocessArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PortalArgs {
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Skip TLS certificate verification for the whole session.
    #[arg(long, default_value_t = false)]
    pub insecure: bool,

    #[arg(long, default_value_t = 60)]
    pub request_timeout_secs: u64,

    #[arg(long, default_value_t = 30)]
    pub pdf_timeout_secs: u64,

    #[arg(long, default_value_t = 500)]
    pub document_delay_ms: u64,

    #[arg(long, default_value = "por")]
    pub ocr_lang: String,

    #[arg(
        long,
        default_value_t = DEFAULT_MIN_TEXT_CHARS,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub min_text_chars: usize,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub portal: PortalArgs,

    /// Defaults to the checkpoint's range, else 2002.
    #[arg(long)]
    pub start_year: Option<i32>,

    /// Defaults to the checkpoint's range, else the current year.
    #[arg(long)]
    pub end_year: Option<i32>,

    #[arg(long, default_value_t = 1000)]
    pub page_delay_ms: u64,

    #[arg(long, default_value_t = 3000)]
    pub year_delay_ms: u64,

    /// Stop paging a year after this many result pages.
    #[arg(long)]
    pub max_pages: Option<u32>,

    /// Collect metadata only.
    #[arg(long, default_value_t = false)]
    pub skip_pdfs: bool,

    /// Copy the corpus snapshot to the backup directory every N years.
    #[arg(long)]
    pub backup_every: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct HarvestArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Ignore an existing checkpoint and start from `--start-year`.
    #[arg(long, default_value_t = false)]
    pub fresh: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ResumeArgs {
    /// Year to continue from; defaults to the year after the checkpoint.
    #[arg(value_name = "START_YEAR")]
    pub from_year: Option<i32>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct KillArgs {
    #[arg(long, default_value_t = false)]
    pub confirm: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ReportArgs {
    #[arg(long)]
    pub output_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ReprocessArgs {
    #[command(flatten)]
    pub portal: PortalArgs,

    #[arg(long)]
    pub limit: Option<usize>,
}
