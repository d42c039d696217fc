use std::collections::BTreeMap;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::cli::ReportArgs;
use crate::context::DataLayout;
use crate::corpus::CorpusStore;
use crate::extract::DOWNLOAD_FAILED;
use crate::model::NormRecord;
use crate::util::{now_utc_string, utc_compact_string, write_json_pretty};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyContentCategory {
    MissingUrl,
    DownloadFailed,
    ExtractionFailed,
    NotAttempted,
}

impl EmptyContentCategory {
    pub fn of(record: &NormRecord) -> Self {
        if record.pdf_url.trim().is_empty() {
            Self::MissingUrl
        } else if record.extraction_error.starts_with(DOWNLOAD_FAILED) {
            Self::DownloadFailed
        } else if !record.extraction_error.is_empty() {
            Self::ExtractionFailed
        } else {
            Self::NotAttempted
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingUrl => "missing_url",
            Self::DownloadFailed => "download_failed",
            Self::ExtractionFailed => "extraction_failed",
            Self::NotAttempted => "not_attempted",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EmptyContentEntry {
    pub code: String,
    pub title: String,
    pub search_year: Option<i32>,
    pub material_type: String,
    pub category: EmptyContentCategory,
    pub pdf_url: String,
    pub extraction_error: String,
}

#[derive(Debug, Serialize)]
pub struct EmptyContentReport {
    pub generated_at: String,
    pub corpus_path: String,
    pub total_records: usize,
    pub empty_content: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_search_year: BTreeMap<String, usize>,
    pub by_material_type: BTreeMap<String, usize>,
    pub records: Vec<EmptyContentEntry>,
}

pub fn run(layout: &DataLayout, args: ReportArgs) -> Result<()> {
    let corpus = CorpusStore::new(layout.corpus_path());
    let records = corpus.load()?;
    let report = build_report(&records, &corpus.path().display().to_string());

    let output_path = args.output_path.unwrap_or_else(|| {
        layout.report_dir().join(format!(
            "empty_content_{}.json",
            utc_compact_string(Utc::now())
        ))
    });
    write_json_pretty(&output_path, &report)?;

    info!(
        total = report.total_records,
        empty = report.empty_content,
        by_category = ?report.by_category,
        "empty-content report built"
    );
    info!(path = %output_path.display(), "wrote report");
    Ok(())
}

pub fn build_report(records: &[NormRecord], corpus_path: &str) -> EmptyContentReport {
    let mut by_category = BTreeMap::new();
    let mut by_search_year = BTreeMap::new();
    let mut by_material_type = BTreeMap::new();
    let mut entries = Vec::new();

    for record in records.iter().filter(|record| !record.has_content()) {
        let category = EmptyContentCategory::of(record);
        *by_category.entry(category.as_str().to_string()).or_insert(0) += 1;
        *by_search_year
            .entry(
                record
                    .search_year
                    .map(|year| year.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            )
            .or_insert(0) += 1;
        *by_material_type
            .entry(if record.material_type.is_empty() {
                "unknown".to_string()
            } else {
                record.material_type.clone()
            })
            .or_insert(0) += 1;

        entries.push(EmptyContentEntry {
            code: record.code.clone(),
            title: record.title.clone(),
            search_year: record.search_year,
            material_type: record.material_type.clone(),
            category,
            pdf_url: record.pdf_url.clone(),
            extraction_error: record.extraction_error.clone(),
        });
    }

    EmptyContentReport {
        generated_at: now_utc_string(),
        corpus_path: corpus_path.to_string(),
        total_records: records.len(),
        empty_content: entries.len(),
        by_category,
        by_search_year,
        by_material_type,
        records: entries,
    }
}
