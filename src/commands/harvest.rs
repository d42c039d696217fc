use anyhow::{Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use super::{harvest_context, resolve_year_range, session_config};
use crate::cli::{HarvestArgs, ResumeArgs, RunArgs};
use crate::context::DataLayout;
use crate::control::lock::WriterLock;
use crate::control::pipeline::{BackupPolicy, RunSummary, YearLoop};
use crate::control::{CheckpointStore, CommandFile, ResumePlan, YearRange, plan_resume};
use crate::corpus::CorpusStore;
use crate::extract::PdfContentExtractor;
use crate::extract::tools::{collect_tool_versions, warn_missing_tools};
use crate::model::{HarvestCounts, HarvestPaths, HarvestRunManifest, RunStatus};
use crate::portal::PortalHarvester;
use crate::portal::session::HttpSession;
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

pub fn run(layout: &DataLayout, args: HarvestArgs) -> Result<()> {
    let checkpoints = CheckpointStore::new(layout.checkpoint_path());
    let checkpoint = if args.fresh {
        None
    } else {
        checkpoints
            .load()?
            .filter(|state| state.status != RunStatus::Complete)
    };

    let range = resolve_year_range(&args.run, checkpoint.as_ref())?;
    let first_year = match plan_resume(range, checkpoint.as_ref(), None)? {
        ResumePlan::StartAt(year) => year,
        ResumePlan::AlreadyComplete => range.start,
    };
    if checkpoint.is_some() && first_year != range.start {
        info!(first_year, "continuing from checkpoint");
    }

    let carried_failed_years = checkpoint
        .map(|state| state.failed_years)
        .unwrap_or_default();
    execute(
        layout,
        &args.run,
        range,
        first_year,
        carried_failed_years,
        render_command("harvest", &args.run, None, args.fresh),
    )
}

pub fn resume(layout: &DataLayout, args: ResumeArgs) -> Result<()> {
    let checkpoints = CheckpointStore::new(layout.checkpoint_path());
    let checkpoint = checkpoints.load()?;

    if checkpoint.is_none() && args.from_year.is_none() {
        bail!(
            "no checkpoint at {}; pass a start year or run `harvest`",
            checkpoints.path().display()
        );
    }

    let range = resolve_year_range(&args.run, checkpoint.as_ref())?;
    let first_year = match plan_resume(range, checkpoint.as_ref(), args.from_year)? {
        ResumePlan::StartAt(year) => year,
        ResumePlan::AlreadyComplete => {
            info!(
                start = range.start,
                end = range.end,
                "checkpoint already covers the whole range, nothing to resume"
            );
            return Ok(());
        }
    };

    info!(first_year, end = range.end, "resuming harvest");
    let carried_failed_years = checkpoint
        .map(|state| state.failed_years)
        .unwrap_or_default();
    execute(
        layout,
        &args.run,
        range,
        first_year,
        carried_failed_years,
        render_command("resume", &args.run, args.from_year, false),
    )
}

fn execute(
    layout: &DataLayout,
    run: &RunArgs,
    range: YearRange,
    first_year: i32,
    carried_failed_years: Vec<i32>,
    command: String,
) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let lock = WriterLock::acquire(&layout.lock_path())?;

    let commands_path = layout.command_path();
    let mut commands = CommandFile::new(commands_path.clone());
    if let Some(stale) = commands.pending()? {
        warn!(
            action = stale.action.as_str(),
            issued_at = %stale.timestamp,
            "discarding control command issued before this run"
        );
        commands.clear()?;
    }

    if !run.skip_pdfs {
        warn_missing_tools();
    }
    let tool_versions = collect_tool_versions();

    let context = harvest_context(run);
    let session = HttpSession::new(&session_config(&run.portal))?;
    let extractor = PdfContentExtractor::with_default_strategies(
        &run.portal.ocr_lang,
        run.portal.min_text_chars,
    );
    let mut harvester = PortalHarvester::new(&session, &context, extractor)?;

    let corpus = CorpusStore::new(layout.corpus_path());
    let checkpoints = CheckpointStore::new(layout.checkpoint_path());
    info!(
        run_id = %context.run_id,
        pid = lock.pid(),
        start = range.start,
        end = range.end,
        first_year,
        base_url = %context.base_url,
        "starting harvest"
    );

    let year_loop = YearLoop {
        range,
        first_year,
        context: &context,
        corpus: &corpus,
        checkpoints: &checkpoints,
        backup: run
            .backup_every
            .map(|every_years| (BackupPolicy { every_years }, layout.backup_dir())),
        carried_failed_years,
    };
    let summary = year_loop.run(&mut harvester, &mut commands)?;

    let manifest_dir = layout.run_manifest_dir();
    ensure_directory(&manifest_dir)?;
    let manifest_path = manifest_dir.join(format!(
        "harvest_run_{}.json",
        utc_compact_string(started_ts)
    ));
    let manifest = HarvestRunManifest {
        manifest_version: 1,
        run_id: context.run_id.clone(),
        status: summary.status.as_str().to_string(),
        started_at,
        updated_at: now_utc_string(),
        first_year,
        last_year: range.end,
        interrupted_by: summary
            .interrupted_by
            .map(|action| action.as_str().to_string()),
        command,
        tool_versions,
        paths: HarvestPaths {
            data_dir: layout.root().display().to_string(),
            corpus_path: corpus.path().display().to_string(),
            checkpoint_path: checkpoints.path().display().to_string(),
            command_path: commands_path.display().to_string(),
        },
        counts: run_counts(range, first_year, &summary),
        failed_years: summary.failed_years.clone(),
        empty_years: summary.empty_years.clone(),
    };
    write_json_pretty(&manifest_path, &manifest)?;

    info!(path = %manifest_path.display(), "wrote harvest run manifest");
    info!(
        status = summary.status.as_str(),
        years = summary.years_processed,
        years_with_new_records = summary.years_with_new_records,
        found = summary.records_found,
        added = summary.records_added,
        with_content = summary.records_with_content,
        total = summary.corpus_total,
        "harvest finished"
    );

    Ok(())
}

fn run_counts(range: YearRange, first_year: i32, summary: &RunSummary) -> HarvestCounts {
    HarvestCounts {
        years_planned: (range.end - first_year + 1).max(0) as usize,
        years_processed: summary.years_processed,
        years_with_new_records: summary.years_with_new_records,
        records_found: summary.records_found,
        records_added: summary.records_added,
        records_with_content: summary.records_with_content,
        corpus_total: summary.corpus_total,
    }
}

fn render_command(name: &str, run: &RunArgs, from_year: Option<i32>, fresh: bool) -> String {
    let mut command = vec!["normharvest".to_string(), name.to_string()];

    if let Some(year) = from_year {
        command.push(year.to_string());
    }
    if let Some(year) = run.start_year {
        command.push("--start-year".to_string());
        command.push(year.to_string());
    }
    if let Some(year) = run.end_year {
        command.push("--end-year".to_string());
        command.push(year.to_string());
    }
    command.push("--base-url".to_string());
    command.push(run.portal.base_url.clone());
    if run.portal.insecure {
        command.push("--insecure".to_string());
    }
    if let Some(max_pages) = run.max_pages {
        command.push("--max-pages".to_string());
        command.push(max_pages.to_string());
    }
    if run.skip_pdfs {
        command.push("--skip-pdfs".to_string());
    }
    if let Some(every) = run.backup_every {
        command.push("--backup-every".to_string());
        command.push(every.to_string());
    }
    command.push("--ocr-lang".to_string());
    command.push(run.portal.ocr_lang.clone());
    if fresh {
        command.push("--fresh".to_string());
    }

    command.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::PortalArgs;

    fn run_args() -> RunArgs {
        RunArgs {
            portal: PortalArgs {
                base_url: "https://portal.test".to_string(),
                insecure: true,
                request_timeout_secs: 60,
                pdf_timeout_secs: 30,
                document_delay_ms: 0,
                ocr_lang: "por".to_string(),
                min_text_chars: 50,
            },
            start_year: Some(2010),
            end_year: None,
            page_delay_ms: 0,
            year_delay_ms: 0,
            max_pages: Some(3),
            skip_pdfs: false,
            backup_every: None,
        }
    }

    #[test]
    fn render_command_lists_effective_flags() {
        let rendered = render_command("resume", &run_args(), Some(2013), false);
        assert_eq!(
            rendered,
            "normharvest resume 2013 --start-year 2010 --base-url https://portal.test --insecure --max-pages 3 --ocr-lang por"
        );
    }

    #[test]
    fn run_counts_plans_years_from_first_year() {
        let range = YearRange::new(2010, 2015).expect("range");
        let summary = RunSummary {
            status: RunStatus::Complete,
            last_completed_year: Some(2015),
            interrupted_by: None,
            years_processed: 3,
            years_with_new_records: 1,
            records_found: 4,
            records_added: 2,
            records_with_content: 1,
            corpus_total: 9,
            empty_years: vec![2014],
            failed_years: Vec::new(),
            backups: Vec::new(),
        };

        let counts = run_counts(range, 2013, &summary);
        assert_eq!(counts.years_planned, 3);
        assert_eq!(counts.records_added, 2);
        assert_eq!(counts.corpus_total, 9);
    }
}
