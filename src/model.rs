use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Legal standing of a norm as reported by the portal card.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegalStatus {
    InForce,
    Revoked,
    #[default]
    Other,
}

impl LegalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InForce => "in_force",
            Self::Revoked => "revoked",
            Self::Other => "other",
        }
    }

    pub fn from_str_value(value: &str) -> Self {
        match value {
            "in_force" => Self::InForce,
            "revoked" => Self::Revoked,
            _ => Self::Other,
        }
    }

    /// Maps the free-text "Situação" label shown on the portal.
    pub fn from_portal_label(label: &str) -> Self {
        let normalized = label.trim().to_lowercase();
        if normalized.is_empty() {
            return Self::Other;
        }
        if normalized.contains("em vigor") || normalized.contains("não consta revogação") {
            return Self::InForce;
        }
        if normalized.contains("revogad") {
            return Self::Revoked;
        }
        Self::Other
    }
}

/// Which strategy produced `NormRecord::content`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    #[default]
    None,
    Pdftotext,
    PdfExtract,
    Ocr,
}

impl ExtractionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pdftotext => "pdftotext",
            Self::PdfExtract => "pdf_extract",
            Self::Ocr => "ocr",
        }
    }

    pub fn from_str_value(value: &str) -> Option<Self> {
        match value {
            "" | "none" => Some(Self::None),
            "pdftotext" => Some(Self::Pdftotext),
            "pdf_extract" => Some(Self::PdfExtract),
            "ocr" => Some(Self::Ocr),
            _ => None,
        }
    }
}

/// One regulatory document in the corpus. `code` is the corpus-wide key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormRecord {
    pub code: String,
    pub title: String,
    pub author: String,
    pub sphere: String,
    pub subject: String,
    pub legal_status: LegalStatus,
    pub legal_status_label: String,
    pub signed_on: Option<NaiveDate>,
    pub published_on: Option<NaiveDate>,
    pub pdf_url: String,
    pub material_type: String,
    pub search_year: Option<i32>,
    pub content: String,
    pub extraction_method: ExtractionMethod,
    pub pdf_size_bytes: u64,
    pub pages_extracted: u32,
    pub extraction_error: String,
    pub pdf_sha256: String,
    pub indexed: bool,
    pub indexed_checked_at: Option<String>,
}

impl NormRecord {
    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Paused,
    Stopped,
    Complete,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Complete => "complete",
        }
    }
}

/// Checkpoint written at every year boundary. `current_year` is the last
/// year whose processing finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionState {
    pub current_year: i32,
    pub progress_percent: f64,
    pub total_records: usize,
    pub status: RunStatus,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_start: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_end: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_years: Vec<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Pause,
    Stop,
}

impl ControlAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Stop => "stop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub action: ControlAction,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolVersions {
    pub pdftotext: Option<String>,
    pub pdftoppm: Option<String>,
    pub tesseract: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestPaths {
    pub data_dir: String,
    pub corpus_path: String,
    pub checkpoint_path: String,
    pub command_path: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HarvestCounts {
    pub years_planned: usize,
    pub years_processed: usize,
    pub years_with_new_records: usize,
    pub records_found: usize,
    pub records_added: usize,
    pub records_with_content: usize,
    pub corpus_total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub first_year: i32,
    pub last_year: i32,
    pub interrupted_by: Option<String>,
    pub command: String,
    pub tool_versions: ToolVersions,
    pub paths: HarvestPaths,
    pub counts: HarvestCounts,
    pub failed_years: Vec<i32>,
    pub empty_years: Vec<i32>,
}
