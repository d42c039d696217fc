use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use super::session_config;
use crate::cli::ReprocessArgs;
use crate::context::{DataLayout, Delays, HarvestContext};
use crate::control::lock::WriterLock;
use crate::corpus::CorpusStore;
use crate::extract::{ExtractionOutcome, PdfContentExtractor};
use crate::extract::tools::warn_missing_tools;
use crate::portal::session::{HttpSession, Transport};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReprocessSummary {
    pub candidates: usize,
    pub recovered: usize,
    pub still_empty: usize,
}

pub fn run(layout: &DataLayout, args: ReprocessArgs) -> Result<()> {
    let _lock = WriterLock::acquire(&layout.lock_path())?;
    warn_missing_tools();

    let context = HarvestContext::new(
        &args.portal.base_url,
        Delays {
            document: Duration::from_millis(args.portal.document_delay_ms),
            ..Delays::default()
        },
    );
    let session = HttpSession::new(&session_config(&args.portal))?;
    let mut extractor = PdfContentExtractor::with_default_strategies(
        &args.portal.ocr_lang,
        args.portal.min_text_chars,
    );
    let corpus = CorpusStore::new(layout.corpus_path());

    let summary = reprocess_empty_content(&corpus, &session, &mut extractor, &context, args.limit)?;
    info!(
        candidates = summary.candidates,
        recovered = summary.recovered,
        still_empty = summary.still_empty,
        "reprocess finished"
    );
    Ok(())
}

/// Retries extraction for records with a PDF URL and no content. Only
/// records that now succeed are rewritten, and only their content fields.
pub fn reprocess_empty_content(
    corpus: &CorpusStore,
    transport: &dyn Transport,
    extractor: &mut PdfContentExtractor,
    context: &HarvestContext,
    limit: Option<usize>,
) -> Result<ReprocessSummary> {
    let candidates: Vec<(String, String)> = corpus
        .load()?
        .into_iter()
        .filter(|record| !record.has_content() && !record.pdf_url.trim().is_empty())
        .take(limit.unwrap_or(usize::MAX))
        .map(|record| (record.code, record.pdf_url))
        .collect();

    let mut summary = ReprocessSummary {
        candidates: candidates.len(),
        ..ReprocessSummary::default()
    };
    info!(candidates = summary.candidates, "reprocessing records without content");

    let mut recovered: HashMap<String, ExtractionOutcome> = HashMap::new();
    for (index, (code, pdf_url)) in candidates.into_iter().enumerate() {
        if index > 0 {
            context.pause_between_documents();
        }

        let outcome = extractor.extract(transport, &pdf_url);
        if outcome.is_success() {
            info!(code = %code, method = outcome.method().as_str(), "content recovered");
            recovered.insert(code, outcome);
        } else {
            warn!(code = %code, attempted = ?outcome.attempted_methods(), "content still unavailable");
            summary.still_empty += 1;
        }
    }

    let updated = corpus.update_where(|record| match recovered.remove(&record.code) {
        Some(outcome) if !record.has_content() => {
            outcome.apply_to(record);
            true
        }
        _ => false,
    })?;
    summary.recovered = updated;
    info!(documents = extractor.cached_documents(), "downloaded documents this run");

    Ok(summary)
}
