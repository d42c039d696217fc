use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Result;
use tracing::{info, warn};

use super::{CheckpointStore, CommandSource, YearRange, checkpoint_state};
use crate::context::HarvestContext;
use crate::corpus::{CorpusStore, filter_new_records};
use crate::model::{ControlAction, NormRecord, RunStatus};

/// Produces the records of one publication year.
pub trait YearSource {
    /// `known_codes` lets the source skip expensive work for records the
    /// corpus already holds.
    fn harvest_year(&mut self, year: i32, known_codes: &HashSet<String>)
    -> Result<Vec<NormRecord>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupPolicy {
    pub every_years: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub status: RunStatus,
    pub last_completed_year: Option<i32>,
    pub interrupted_by: Option<ControlAction>,
    pub years_processed: usize,
    pub years_with_new_records: usize,
    pub records_found: usize,
    pub records_added: usize,
    pub records_with_content: usize,
    pub corpus_total: usize,
    pub empty_years: Vec<i32>,
    pub failed_years: Vec<i32>,
    pub backups: Vec<PathBuf>,
}

impl RunSummary {
    fn new() -> Self {
        Self {
            status: RunStatus::Running,
            last_completed_year: None,
            interrupted_by: None,
            years_processed: 0,
            years_with_new_records: 0,
            records_found: 0,
            records_added: 0,
            records_with_content: 0,
            corpus_total: 0,
            empty_years: Vec::new(),
            failed_years: Vec::new(),
            backups: Vec::new(),
        }
    }
}

/// Drives a run year by year. Commands are read only at year boundaries and
/// a checkpoint is written after every year.
pub struct YearLoop<'a> {
    pub range: YearRange,
    pub first_year: i32,
    pub context: &'a HarvestContext,
    pub corpus: &'a CorpusStore,
    pub checkpoints: &'a CheckpointStore,
    pub backup: Option<(BackupPolicy, PathBuf)>,
    /// Failures recorded by an earlier, interrupted run of the same range.
    pub carried_failed_years: Vec<i32>,
}

impl YearLoop<'_> {
    pub fn run(
        &self,
        source: &mut dyn YearSource,
        commands: &mut dyn CommandSource,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::new();
        let mut failed_years = self.carried_failed_years.clone();
        let mut known_codes = self.corpus.load_keys()?;
        let mut previous_year = self.first_year - 1;

        info!(
            run_id = %self.context.run_id,
            first_year = self.first_year,
            last_year = self.range.end,
            known_records = known_codes.len(),
            "starting year loop"
        );

        for year in self.first_year..=self.range.end {
            if let Some(action) = commands.poll() {
                let status = match action {
                    ControlAction::Pause => RunStatus::Paused,
                    ControlAction::Stop => RunStatus::Stopped,
                };
                self.checkpoints.save(&checkpoint_state(
                    self.range,
                    previous_year,
                    status,
                    known_codes.len(),
                    &self.context.run_id,
                    &failed_years,
                ))?;

                info!(
                    action = action.as_str(),
                    next_year = year,
                    "run interrupted at year boundary"
                );
                summary.status = status;
                summary.interrupted_by = Some(action);
                summary.corpus_total = known_codes.len();
                summary.failed_years = failed_years;
                return Ok(summary);
            }

            info!(year, "processing year");
            match source.harvest_year(year, &known_codes) {
                Ok(batch) => {
                    summary.records_found += batch.len();
                    if batch.is_empty() {
                        summary.empty_years.push(year);
                    }

                    let new_records = filter_new_records(&known_codes, batch);
                    let persisted = self.corpus.persist(&new_records)?;
                    let with_content = new_records
                        .iter()
                        .filter(|record| record.has_content())
                        .count();

                    known_codes.extend(new_records.into_iter().map(|record| record.code));
                    summary.records_added += persisted.appended;
                    summary.records_with_content += with_content;
                    if persisted.appended > 0 {
                        summary.years_with_new_records += 1;
                    }

                    info!(
                        year,
                        added = persisted.appended,
                        with_content,
                        total = persisted.total,
                        "year finished"
                    );
                }
                Err(error) => {
                    warn!(year, error = %format!("{error:#}"), "year failed, continuing with next year");
                    if !failed_years.contains(&year) {
                        failed_years.push(year);
                    }
                }
            }

            summary.years_processed += 1;
            summary.last_completed_year = Some(year);
            previous_year = year;
            self.checkpoints.save(&checkpoint_state(
                self.range,
                year,
                RunStatus::Running,
                known_codes.len(),
                &self.context.run_id,
                &failed_years,
            ))?;

            if let Some((policy, backup_dir)) = &self.backup {
                let every = policy.every_years.max(1) as usize;
                if summary.years_processed % every == 0 || year == self.range.end {
                    if let Some(path) = self.corpus.backup_to(backup_dir, &year.to_string())? {
                        summary.backups.push(path);
                    }
                }
            }

            if year < self.range.end {
                self.context.pause_between_years();
            }
        }

        self.checkpoints.save(&checkpoint_state(
            self.range,
            self.range.end,
            RunStatus::Complete,
            known_codes.len(),
            &self.context.run_id,
            &failed_years,
        ))?;

        summary.status = RunStatus::Complete;
        summary.corpus_total = known_codes.len();
        summary.failed_years = failed_years;
        info!(
            years = summary.years_processed,
            added = summary.records_added,
            total = summary.corpus_total,
            last_year = ?summary.last_completed_year,
            backups = summary.backups.len(),
            failed_years = ?summary.failed_years,
            "run complete"
        );
        Ok(summary)
    }
}
