use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::Utc;

use crate::util::utc_compact_string;

pub const DEFAULT_BASE_URL: &str = "https://sophia.antaq.gov.br";

/// Pauses inserted between remote requests to respect the portal's load limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct Delays {
    pub page: Duration,
    pub document: Duration,
    pub year: Duration,
}

/// Per-run state threaded through the session, paginator, extractor and year loop.
#[derive(Debug, Clone)]
pub struct HarvestContext {
    pub run_id: String,
    pub base_url: String,
    pub delays: Delays,
    pub max_pages: Option<u32>,
    pub extract_pdfs: bool,
}

impl HarvestContext {
    pub fn new(base_url: &str, delays: Delays) -> Self {
        Self {
            run_id: format!("harvest-{}", utc_compact_string(Utc::now())),
            base_url: base_url.trim_end_matches('/').to_string(),
            delays,
            max_pages: None,
            extract_pdfs: true,
        }
    }

    pub fn pause_between_pages(&self) {
        pause(self.delays.page);
    }

    pub fn pause_between_documents(&self) {
        pause(self.delays.document);
    }

    pub fn pause_between_years(&self) {
        pause(self.delays.year);
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

/// On-disk layout of everything a harvest reads or writes.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.state_dir().join("extraction_state.json")
    }

    pub fn command_path(&self) -> PathBuf {
        self.state_dir().join("control_command.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir().join("writer.lock")
    }

    pub fn run_manifest_dir(&self) -> PathBuf {
        self.state_dir().join("runs")
    }

    pub fn corpus_path(&self) -> PathBuf {
        self.root.join("corpus").join("normas.parquet")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.root.join("corpus").join("backups")
    }

    pub fn report_dir(&self) -> PathBuf {
        self.root.join("reports")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_trims_trailing_slash_from_base_url() {
        let context = HarvestContext::new("https://example.test/", Delays::default());
        assert_eq!(context.base_url, "https://example.test");
        assert!(context.run_id.starts_with("harvest-"));
        assert!(context.extract_pdfs);
    }

    #[test]
    fn layout_keeps_state_and_corpus_apart() {
        let layout = DataLayout::new(Path::new("/tmp/nh"));
        assert_eq!(
            layout.checkpoint_path(),
            PathBuf::from("/tmp/nh/state/extraction_state.json")
        );
        assert_eq!(
            layout.corpus_path(),
            PathBuf::from("/tmp/nh/corpus/normas.parquet")
        );
        assert_eq!(layout.lock_path(), PathBuf::from("/tmp/nh/state/writer.lock"));
    }
}
