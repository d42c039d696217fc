mod cli;
mod commands;
mod context;
mod control;
mod corpus;
mod extract;
mod model;
mod portal;
mod util;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::context::DataLayout;
use crate::model::ControlAction;

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let layout = DataLayout::new(&cli.data_dir);

    match cli.command {
        Commands::Harvest(args) => commands::harvest::run(&layout, args),
        Commands::Resume(args) => commands::harvest::resume(&layout, args),
        Commands::Status(args) => commands::status::run(&layout, args),
        Commands::Pause => commands::control::request(&layout, ControlAction::Pause),
        Commands::Stop => commands::control::request(&layout, ControlAction::Stop),
        Commands::Kill(args) => commands::control::kill(&layout, args),
        Commands::Clear => commands::control::clear(&layout),
        Commands::Report(args) => commands::report::run(&layout, args),
        Commands::Reprocess(args) => commands::reprocess::run(&layout, args),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
