//! Run control: checkpoints, operator commands, the writer lock and the
//! year loop that ties them together.

pub mod lock;
pub mod pipeline;

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::model::{ControlAction, ControlCommand, ExtractionState, RunStatus};
use crate::util::{now_utc_string, read_json_optional, remove_file_if_exists, write_json_pretty};

/// Inclusive range of publication years a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    pub fn new(start: i32, end: i32) -> Result<Self> {
        if start > end {
            bail!("start year {start} is after end year {end}");
        }
        if start < 1800 {
            bail!("start year {start} is out of range");
        }
        Ok(Self { start, end })
    }

    pub fn len(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    pub fn contains(&self, year: i32) -> bool {
        (self.start..=self.end).contains(&year)
    }

    /// Share of the range finished once `last_completed` is done.
    pub fn progress_after(&self, last_completed: i32) -> f64 {
        let completed = (last_completed - self.start + 1).clamp(0, self.len() as i32);
        let percent = completed as f64 / self.len() as f64 * 100.0;
        (percent * 100.0).round() / 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePlan {
    StartAt(i32),
    AlreadyComplete,
}

/// Works out where a run continues. An explicit year wins over the
/// checkpoint; without either the range starts from the beginning.
pub fn plan_resume(
    range: YearRange,
    checkpoint: Option<&ExtractionState>,
    explicit_year: Option<i32>,
) -> Result<ResumePlan> {
    if let Some(year) = explicit_year {
        if !range.contains(year) {
            bail!(
                "resume year {year} is outside {}..={}",
                range.start,
                range.end
            );
        }
        return Ok(ResumePlan::StartAt(year));
    }

    let Some(state) = checkpoint else {
        return Ok(ResumePlan::StartAt(range.start));
    };

    let next = state.current_year + 1;
    if next > range.end {
        return Ok(ResumePlan::AlreadyComplete);
    }
    Ok(ResumePlan::StartAt(next.max(range.start)))
}

pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<ExtractionState>> {
        read_json_optional(&self.path)
    }

    pub fn save(&self, state: &ExtractionState) -> Result<()> {
        write_json_pretty(&self.path, state)?;
        info!(
            year = state.current_year,
            status = state.status.as_str(),
            progress = state.progress_percent,
            records = state.total_records,
            "checkpoint saved"
        );
        Ok(())
    }

    pub fn clear(&self) -> Result<bool> {
        remove_file_if_exists(&self.path)
    }
}

pub fn checkpoint_state(
    range: YearRange,
    current_year: i32,
    status: RunStatus,
    total_records: usize,
    run_id: &str,
    failed_years: &[i32],
) -> ExtractionState {
    let progress_percent = match status {
        RunStatus::Complete => 100.0,
        _ => range.progress_after(current_year),
    };

    ExtractionState {
        current_year,
        progress_percent,
        total_records,
        status,
        timestamp: now_utc_string(),
        range_start: Some(range.start),
        range_end: Some(range.end),
        run_id: Some(run_id.to_string()),
        failed_years: failed_years.to_vec(),
    }
}

/// Where the year loop looks for pause/stop requests between years.
pub trait CommandSource {
    /// Returns and consumes the pending command, if any.
    fn poll(&mut self) -> Option<ControlAction>;
}

/// The operator surface: a JSON command file written by `pause`/`stop` and
/// deleted once the running harvest has read it.
pub struct CommandFile {
    path: PathBuf,
}

impl CommandFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn issue(&self, action: ControlAction) -> Result<ControlCommand> {
        let command = ControlCommand {
            action,
            timestamp: now_utc_string(),
        };
        write_json_pretty(&self.path, &command)?;
        Ok(command)
    }

    pub fn pending(&self) -> Result<Option<ControlCommand>> {
        read_json_optional(&self.path)
    }

    pub fn clear(&self) -> Result<bool> {
        remove_file_if_exists(&self.path)
    }
}

impl CommandSource for CommandFile {
    fn poll(&mut self) -> Option<ControlAction> {
        let command = match self.pending() {
            Ok(command) => command,
            Err(error) => {
                warn!(path = %self.path.display(), error = %format!("{error:#}"), "discarding unreadable control command");
                None
            }
        };

        if let Err(error) = self.clear() {
            warn!(path = %self.path.display(), error = %format!("{error:#}"), "failed to remove control command");
        }

        command.map(|command| {
            info!(action = command.action.as_str(), issued_at = %command.timestamp, "control command received");
            command.action
        })
    }
}
