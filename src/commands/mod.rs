pub mod control;
pub mod harvest;
pub mod report;
pub mod reprocess;
pub mod status;

use std::time::Duration;

use anyhow::Result;
use chrono::{Datelike, Utc};

use crate::cli::{PortalArgs, RunArgs};
use crate::context::{Delays, HarvestContext};
use crate::control::YearRange;
use crate::model::ExtractionState;
use crate::portal::session::SessionConfig;

/// First year the portal holds norms for.
pub const DEFAULT_START_YEAR: i32 = 2002;

pub(crate) fn session_config(portal: &PortalArgs) -> SessionConfig {
    SessionConfig {
        verify_tls: !portal.insecure,
        request_timeout: Duration::from_secs(portal.request_timeout_secs),
        pdf_timeout: Duration::from_secs(portal.pdf_timeout_secs),
    }
}

pub(crate) fn harvest_context(run: &RunArgs) -> HarvestContext {
    let mut context = HarvestContext::new(
        &run.portal.base_url,
        Delays {
            page: Duration::from_millis(run.page_delay_ms),
            document: Duration::from_millis(run.portal.document_delay_ms),
            year: Duration::from_millis(run.year_delay_ms),
        },
    );
    context.max_pages = run.max_pages;
    context.extract_pdfs = !run.skip_pdfs;
    context
}

/// Explicit flags win; otherwise the range recorded in the checkpoint,
/// otherwise 2002 through the current year.
pub(crate) fn resolve_year_range(
    run: &RunArgs,
    checkpoint: Option<&ExtractionState>,
) -> Result<YearRange> {
    let start = run
        .start_year
        .or_else(|| checkpoint.and_then(|state| state.range_start))
        .unwrap_or(DEFAULT_START_YEAR);
    let end = run
        .end_year
        .or_else(|| checkpoint.and_then(|state| state.range_end))
        .unwrap_or_else(|| Utc::now().year());
    YearRange::new(start, end)
}
