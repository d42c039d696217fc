//! The corpus snapshot: every known norm in one Parquet file, keyed by code.

pub mod merge;
pub mod schema;

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::model::NormRecord;
use crate::util::{ensure_directory, utc_compact_string};

pub use merge::filter_new_records;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistSummary {
    pub existing: usize,
    pub appended: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CorpusStats {
    pub total: usize,
    pub with_content: usize,
    pub indexed: usize,
    pub by_legal_status: BTreeMap<String, usize>,
    pub by_material_type: BTreeMap<String, usize>,
    pub by_publication_year: BTreeMap<String, usize>,
    pub by_extraction_method: BTreeMap<String, usize>,
}

pub struct CorpusStore {
    path: PathBuf,
}

impl CorpusStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Every record in the snapshot; an absent snapshot is an empty corpus.
    pub fn load(&self) -> Result<Vec<NormRecord>> {
        if !self.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .with_context(|| format!("failed to open corpus {}", self.path.display()))?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .with_context(|| format!("failed to read corpus metadata {}", self.path.display()))?
            .build()
            .with_context(|| format!("failed to open corpus reader {}", self.path.display()))?;

        let mut records = Vec::new();
        for batch in reader {
            let batch = batch
                .with_context(|| format!("failed to read corpus batch {}", self.path.display()))?;
            records.extend(schema::batch_to_records(&batch)?);
        }

        Ok(records)
    }

    pub fn load_keys(&self) -> Result<HashSet<String>> {
        Ok(self
            .load()?
            .into_iter()
            .map(|record| record.code)
            .collect())
    }

    /// Appends the records whose codes are not yet present and rewrites the
    /// snapshot. Existing entries are never overwritten. Nothing is written
    /// when no record is new.
    pub fn persist(&self, batch: &[NormRecord]) -> Result<PersistSummary> {
        let mut records = self.load()?;
        let existing = records.len();
        let mut codes: HashSet<String> = records.iter().map(|record| record.code.clone()).collect();

        for record in batch {
            if record.code.is_empty() || !codes.insert(record.code.clone()) {
                continue;
            }
            records.push(record.clone());
        }

        let summary = PersistSummary {
            existing,
            appended: records.len() - existing,
            total: records.len(),
        };

        if summary.appended == 0 {
            debug!(path = %self.path.display(), "no new records, snapshot unchanged");
            return Ok(summary);
        }

        self.write_snapshot(&records)?;
        info!(
            path = %self.path.display(),
            existing = summary.existing,
            appended = summary.appended,
            total = summary.total,
            "corpus snapshot written"
        );
        Ok(summary)
    }

    /// Applies `update` to every record and rewrites the snapshot when at
    /// least one call reports a change. Returns the number of changed records.
    pub fn update_where<F>(&self, mut update: F) -> Result<usize>
    where
        F: FnMut(&mut NormRecord) -> bool,
    {
        let mut records = self.load()?;
        let mut changed = 0;
        for record in &mut records {
            if update(record) {
                changed += 1;
            }
        }

        if changed > 0 {
            self.write_snapshot(&records)?;
        }
        Ok(changed)
    }

    pub fn stats(&self) -> Result<CorpusStats> {
        let records = self.load()?;
        let mut stats = CorpusStats {
            total: records.len(),
            ..CorpusStats::default()
        };

        for record in &records {
            if record.has_content() {
                stats.with_content += 1;
            }
            if record.indexed {
                stats.indexed += 1;
            }
            *stats
                .by_legal_status
                .entry(record.legal_status.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_material_type
                .entry(label_or_unknown(&record.material_type))
                .or_default() += 1;
            *stats
                .by_publication_year
                .entry(
                    record
                        .published_on
                        .map(|date| date.year().to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                )
                .or_default() += 1;
            *stats
                .by_extraction_method
                .entry(record.extraction_method.as_str().to_string())
                .or_default() += 1;
        }

        Ok(stats)
    }

    /// Copies the current snapshot into `backup_dir`. Returns `None` when
    /// there is no snapshot yet.
    pub fn backup_to(&self, backup_dir: &Path, label: &str) -> Result<Option<PathBuf>> {
        if !self.exists() {
            return Ok(None);
        }

        ensure_directory(backup_dir)?;
        let target = backup_dir.join(format!(
            "normas_{label}_{}.parquet",
            utc_compact_string(Utc::now())
        ));
        fs::copy(&self.path, &target).with_context(|| {
            format!(
                "failed to back up {} to {}",
                self.path.display(),
                target.display()
            )
        })?;

        info!(backup = %target.display(), "corpus backup written");
        Ok(Some(target))
    }

    /// Writes to a temporary sibling file and renames it over the snapshot,
    /// so readers see either the old or the new file.
    fn write_snapshot(&self, records: &[NormRecord]) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        ensure_directory(parent)?;

        let batch = schema::records_to_batch(records)?;
        let mut temp = NamedTempFile::new_in(parent)
            .with_context(|| format!("failed to create temp snapshot in {}", parent.display()))?;

        let mut writer = ArrowWriter::try_new(temp.as_file_mut(), batch.schema(), None)
            .with_context(|| format!("opening parquet writer for {}", self.path.display()))?;
        writer
            .write(&batch)
            .with_context(|| format!("writing corpus batch for {}", self.path.display()))?;
        writer
            .close()
            .with_context(|| format!("closing parquet writer for {}", self.path.display()))?;

        temp.persist(&self.path)
            .map_err(|error| error.error)
            .with_context(|| format!("failed to replace corpus {}", self.path.display()))?;
        Ok(())
    }
}

fn label_or_unknown(value: &str) -> String {
    if value.trim().is_empty() {
        "unknown".to_string()
    } else {
        value.trim().to_string()
    }
}

#[cfg(test)]
mod tests;
