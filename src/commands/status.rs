use std::fs;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::context::DataLayout;
use crate::control::lock::{process_alive, read_lock_owner};
use crate::control::{CheckpointStore, CommandFile};
use crate::corpus::{CorpusStats, CorpusStore};
use crate::model::{ControlCommand, ExtractionState};

#[derive(Debug, Serialize)]
struct StatusReport {
    checkpoint: Option<ExtractionState>,
    writer_pid: Option<u32>,
    writer_alive: bool,
    pending_command: Option<ControlCommand>,
    corpus_path: String,
    corpus_bytes: Option<u64>,
    corpus: Option<CorpusStats>,
}

pub fn run(layout: &DataLayout, args: StatusArgs) -> Result<()> {
    info!(data_dir = %layout.root().display(), "status requested");
    let report = collect(layout)?;

    if args.json {
        let rendered =
            serde_json::to_string_pretty(&report).context("failed to serialize status report")?;
        println!("{rendered}");
        return Ok(());
    }

    match &report.checkpoint {
        Some(state) => info!(
            status = state.status.as_str(),
            current_year = state.current_year,
            progress = state.progress_percent,
            total_records = state.total_records,
            range_start = ?state.range_start,
            range_end = ?state.range_end,
            run_id = %state.run_id.clone().unwrap_or_default(),
            failed_years = ?state.failed_years,
            updated_at = %state.timestamp,
            "loaded checkpoint"
        ),
        None => warn!(path = %layout.checkpoint_path().display(), "checkpoint missing"),
    }

    match report.writer_pid {
        Some(pid) if report.writer_alive => info!(pid, "harvest is running"),
        Some(pid) => warn!(pid, "stale writer lock, process is not alive"),
        None => info!("no harvest running"),
    }

    if let Some(command) = &report.pending_command {
        info!(
            action = command.action.as_str(),
            issued_at = %command.timestamp,
            "control command pending"
        );
    }

    match &report.corpus {
        Some(stats) => {
            info!(
                path = %report.corpus_path,
                bytes = report.corpus_bytes.unwrap_or_default(),
                total = stats.total,
                with_content = stats.with_content,
                indexed = stats.indexed,
                "corpus status"
            );
            info!(by_legal_status = ?stats.by_legal_status, "records by legal status");
            info!(by_extraction_method = ?stats.by_extraction_method, "records by extraction method");
            info!(by_material_type = ?stats.by_material_type, "records by material type");
            info!(by_publication_year = ?stats.by_publication_year, "records by publication year");
        }
        None => warn!(path = %report.corpus_path, "corpus snapshot missing"),
    }

    Ok(())
}

fn collect(layout: &DataLayout) -> Result<StatusReport> {
    let checkpoint = CheckpointStore::new(layout.checkpoint_path()).load()?;
    let writer_pid = read_lock_owner(&layout.lock_path())?;
    let pending_command = CommandFile::new(layout.command_path()).pending()?;

    let corpus = CorpusStore::new(layout.corpus_path());
    let (corpus_bytes, stats) = if corpus.exists() {
        let bytes = fs::metadata(corpus.path())
            .with_context(|| format!("failed to stat {}", corpus.path().display()))?
            .len();
        (Some(bytes), Some(corpus.stats()?))
    } else {
        (None, None)
    };

    Ok(StatusReport {
        checkpoint,
        writer_alive: writer_pid.is_some_and(process_alive),
        writer_pid,
        pending_command,
        corpus_path: corpus.path().display().to_string(),
        corpus_bytes,
        corpus: stats,
    })
}
