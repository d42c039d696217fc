//! PDF content extraction with a strict-priority fallback chain:
//! pdftotext text layer, then the in-process `pdf-extract` parser, then OCR.

mod ocr;
mod text_layer;
pub mod tools;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::model::{ExtractionMethod, NormRecord};
use crate::portal::session::Transport;
use crate::util::sha256_bytes;

pub use ocr::OcrStrategy;
pub use text_layer::{PdfExtractStrategy, PdftotextStrategy};

pub const DEFAULT_MIN_TEXT_CHARS: usize = 50;
pub const DOWNLOAD_FAILED: &str = "download failed";
pub const NO_STRATEGY_ACCEPTED: &str = "no extraction strategy produced enough text";

/// One way of turning PDF bytes into text.
pub trait ExtractionStrategy {
    fn method(&self) -> ExtractionMethod;

    fn extract(&self, pdf_bytes: &[u8]) -> Result<String>;

    fn estimate_pages(&self, text: &str) -> u32 {
        (text.matches('\n').count() / 20) as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyAttempt {
    pub method: ExtractionMethod,
    pub char_count: usize,
    pub error: Option<String>,
}

/// Terminal state of the fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionTerminal {
    Extracted {
        method: ExtractionMethod,
        text: String,
        pages: u32,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionOutcome {
    pub pdf_size_bytes: u64,
    pub pdf_sha256: String,
    pub attempts: Vec<StrategyAttempt>,
    pub terminal: ExtractionTerminal,
}

impl ExtractionOutcome {
    fn download_failed(error: &anyhow::Error) -> Self {
        Self {
            pdf_size_bytes: 0,
            pdf_sha256: String::new(),
            attempts: Vec::new(),
            terminal: ExtractionTerminal::Failed {
                reason: format!("{DOWNLOAD_FAILED}: {error:#}"),
            },
        }
    }

    pub fn method(&self) -> ExtractionMethod {
        match &self.terminal {
            ExtractionTerminal::Extracted { method, .. } => *method,
            ExtractionTerminal::Failed { .. } => ExtractionMethod::None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.terminal, ExtractionTerminal::Extracted { .. })
    }

    pub fn attempted_methods(&self) -> Vec<ExtractionMethod> {
        self.attempts.iter().map(|attempt| attempt.method).collect()
    }

    /// `(text, method, pages, error)`; exactly one of text and error is empty.
    pub fn into_parts(self) -> (String, ExtractionMethod, u32, String) {
        match self.terminal {
            ExtractionTerminal::Extracted {
                method,
                text,
                pages,
            } => (text, method, pages, String::new()),
            ExtractionTerminal::Failed { reason } => {
                (String::new(), ExtractionMethod::None, 0, reason)
            }
        }
    }

    pub fn apply_to(self, record: &mut NormRecord) {
        record.pdf_size_bytes = self.pdf_size_bytes;
        record.pdf_sha256 = self.pdf_sha256.clone();
        let (text, method, pages, error) = self.into_parts();
        record.content = text;
        record.extraction_method = method;
        record.pages_extracted = pages;
        record.extraction_error = error;
    }
}

pub struct PdfContentExtractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    min_text_chars: usize,
    cache: HashMap<String, Vec<u8>>,
}

impl PdfContentExtractor {
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>, min_text_chars: usize) -> Self {
        Self {
            strategies,
            min_text_chars,
            cache: HashMap::new(),
        }
    }

    pub fn with_default_strategies(ocr_lang: &str, min_text_chars: usize) -> Self {
        Self::new(
            vec![
                Box::new(PdftotextStrategy),
                Box::new(PdfExtractStrategy),
                Box::new(OcrStrategy::new(ocr_lang)),
            ],
            min_text_chars,
        )
    }

    pub fn cached_documents(&self) -> usize {
        self.cache.len()
    }

    /// Downloads (or reuses) the PDF at `url` and runs the fallback chain.
    /// Never fails: every problem ends in `ExtractionTerminal::Failed`.
    pub fn extract(&mut self, transport: &dyn Transport, url: &str) -> ExtractionOutcome {
        if url.trim().is_empty() {
            return ExtractionOutcome::download_failed(&anyhow::anyhow!("empty PDF URL"));
        }

        if !self.cache.contains_key(url) {
            match transport.get_bytes(url) {
                Ok(bytes) => {
                    debug!(url = %url, bytes = bytes.len(), "PDF downloaded");
                    self.cache.insert(url.to_string(), bytes);
                }
                Err(error) => {
                    warn!(url = %url, error = %error, "PDF download failed");
                    return ExtractionOutcome::download_failed(&error);
                }
            }
        } else {
            debug!(url = %url, "PDF served from run cache");
        }

        match self.cache.get(url) {
            Some(bytes) => self.extract_bytes(bytes),
            None => ExtractionOutcome::download_failed(&anyhow::anyhow!("PDF cache miss")),
        }
    }

    /// Runs the strategies in priority order until one yields at least
    /// `min_text_chars` characters. Empty text is never accepted.
    pub fn extract_bytes(&self, pdf_bytes: &[u8]) -> ExtractionOutcome {
        let mut attempts = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            let method = strategy.method();
            if method == ExtractionMethod::Ocr {
                info!("text layer below threshold, attempting OCR");
            }

            let result = panic::catch_unwind(AssertUnwindSafe(|| strategy.extract(pdf_bytes)));
            let attempt = match result {
                Ok(Ok(text)) => {
                    let text = text.trim().to_string();
                    let char_count = text.chars().count();
                    if char_count > 0 && char_count >= self.min_text_chars {
                        let pages = strategy.estimate_pages(&text);
                        attempts.push(StrategyAttempt {
                            method,
                            char_count,
                            error: None,
                        });
                        return ExtractionOutcome {
                            pdf_size_bytes: pdf_bytes.len() as u64,
                            pdf_sha256: sha256_bytes(pdf_bytes),
                            attempts,
                            terminal: ExtractionTerminal::Extracted {
                                method,
                                text,
                                pages,
                            },
                        };
                    }
                    StrategyAttempt {
                        method,
                        char_count,
                        error: None,
                    }
                }
                Ok(Err(error)) => StrategyAttempt {
                    method,
                    char_count: 0,
                    error: Some(format!("{error:#}")),
                },
                Err(_) => StrategyAttempt {
                    method,
                    char_count: 0,
                    error: Some("strategy panicked".to_string()),
                },
            };

            debug!(
                method = method.as_str(),
                chars = attempt.char_count,
                error = attempt.error.as_deref().unwrap_or_default(),
                "extraction strategy rejected"
            );
            attempts.push(attempt);
        }

        ExtractionOutcome {
            pdf_size_bytes: pdf_bytes.len() as u64,
            pdf_sha256: sha256_bytes(pdf_bytes),
            attempts,
            terminal: ExtractionTerminal::Failed {
                reason: NO_STRATEGY_ACCEPTED.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests;
