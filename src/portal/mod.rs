//! Portal access: session, token discovery, result paging and card parsing.

pub mod card;
pub mod paginator;
pub mod session;

use std::collections::HashSet;

use anyhow::Result;
use tracing::{info, warn};

use crate::context::HarvestContext;
use crate::control::pipeline::YearSource;
use crate::extract::PdfContentExtractor;
use crate::model::NormRecord;

use card::CardParser;
use paginator::Paginator;
use session::{TokenInitiator, Transport};

/// Produces the enriched records of one year from the live portal.
pub struct PortalHarvester<'a> {
    transport: &'a dyn Transport,
    context: &'a HarvestContext,
    tokens: TokenInitiator,
    parser: CardParser,
    extractor: PdfContentExtractor,
}

impl<'a> PortalHarvester<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        context: &'a HarvestContext,
        extractor: PdfContentExtractor,
    ) -> Result<Self> {
        Ok(Self {
            transport,
            context,
            tokens: TokenInitiator::new()?,
            parser: CardParser::new(&context.base_url)?,
            extractor,
        })
    }

    /// Runs the search for `year` and pages until a page is blank, has no
    /// card fragments or cannot be fetched. Only a failure before the first
    /// page is an error. Records carry metadata only.
    pub fn collect_year(&mut self, year: i32) -> Result<Vec<NormRecord>> {
        let base_url = self.context.base_url.as_str();
        let token = self.tokens.obtain_token(self.transport, base_url);
        let mut paginator = Paginator::new(self.transport, base_url, token);

        let results_url = paginator.search(year)?;
        let first_page = self.parser.parse_page(&self.transport.get_text(&results_url)?);
        info!(
            year,
            page = 1,
            cards = first_page.fragment_count,
            records = first_page.records.len(),
            "parsed results page"
        );

        let mut records = first_page.records;
        self.context.pause_between_pages();

        if first_page.fragment_count > 0 {
            let mut page_number = 2u32;
            loop {
                if self
                    .context
                    .max_pages
                    .is_some_and(|max_pages| page_number > max_pages)
                {
                    info!(year, max_pages = ?self.context.max_pages, "page limit reached");
                    break;
                }

                let body = match paginator.next_page(page_number) {
                    Ok(Some(body)) => body,
                    Ok(None) => {
                        info!(year, page = page_number, "blank page, no more results");
                        break;
                    }
                    Err(error) => {
                        warn!(
                            year,
                            page = page_number,
                            kept = records.len(),
                            error = %format!("{error:#}"),
                            "page request failed, keeping records collected so far"
                        );
                        break;
                    }
                };

                let page = self.parser.parse_page(&body);
                if page.fragment_count == 0 {
                    info!(year, page = page_number, "no cards on page, finishing year");
                    break;
                }

                info!(
                    year,
                    page = page_number,
                    cards = page.fragment_count,
                    records = page.records.len(),
                    "parsed results page"
                );
                records.extend(page.records);
                page_number += 1;
                self.context.pause_between_pages();
            }
        }

        for record in &mut records {
            record.search_year = Some(year);
        }

        Ok(records)
    }

    /// Fills the content fields of every record the corpus does not hold yet.
    /// Extraction failures are recorded on the record, never raised.
    fn enrich(&mut self, records: &mut [NormRecord], known_codes: &HashSet<String>) {
        if !self.context.extract_pdfs {
            return;
        }

        let mut seen = HashSet::new();
        for record in records.iter_mut() {
            if record.pdf_url.is_empty()
                || record.code.is_empty()
                || known_codes.contains(&record.code)
                || !seen.insert(record.code.clone())
            {
                continue;
            }

            info!(code = %record.code, title = %truncate(&record.title, 60), "extracting PDF content");
            let outcome = self.extractor.extract(self.transport, &record.pdf_url);
            outcome.apply_to(record);

            if record.has_content() {
                info!(
                    code = %record.code,
                    chars = record.content.chars().count(),
                    method = record.extraction_method.as_str(),
                    "PDF content extracted"
                );
            } else {
                warn!(code = %record.code, error = %record.extraction_error, "PDF content unavailable");
            }

            self.context.pause_between_documents();
        }
    }
}

impl YearSource for PortalHarvester<'_> {
    fn harvest_year(
        &mut self,
        year: i32,
        known_codes: &HashSet<String>,
    ) -> Result<Vec<NormRecord>> {
        let mut records = self.collect_year(year)?;
        self.enrich(&mut records, known_codes);
        Ok(records)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
