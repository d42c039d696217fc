use std::io::Write;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};
use tempfile::NamedTempFile;

use super::ExtractionStrategy;
use crate::model::ExtractionMethod;

/// Strategy A: poppler's `pdftotext` on the text layer.
pub struct PdftotextStrategy;

impl ExtractionStrategy for PdftotextStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Pdftotext
    }

    fn extract(&self, pdf_bytes: &[u8]) -> Result<String> {
        let pdf_file = write_temp_pdf(pdf_bytes)?;
        let pages = extract_pages_with_pdftotext(pdf_file.path())?;
        Ok(pages.join("\n"))
    }
}

/// Strategy B: the pure-Rust `pdf-extract` parser.
pub struct PdfExtractStrategy;

impl ExtractionStrategy for PdfExtractStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::PdfExtract
    }

    fn extract(&self, pdf_bytes: &[u8]) -> Result<String> {
        let text = pdf_extract::extract_text_from_mem(pdf_bytes)
            .context("pdf-extract could not read the text layer")?;

        Ok(text
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n")
            .replace('\u{0000}', ""))
    }
}

pub(super) fn write_temp_pdf(pdf_bytes: &[u8]) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("normharvest_")
        .suffix(".pdf")
        .tempfile()
        .context("failed to create temporary PDF file")?;
    file.write_all(pdf_bytes)
        .context("failed to write temporary PDF file")?;
    file.flush().context("failed to flush temporary PDF file")?;
    Ok(file)
}

fn extract_pages_with_pdftotext(pdf_path: &Path) -> Result<Vec<String>> {
    let output = Command::new("pdftotext")
        .arg("-enc")
        .arg("UTF-8")
        .arg(pdf_path)
        .arg("-")
        .output()
        .with_context(|| format!("failed to execute pdftotext for {}", pdf_path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "pdftotext returned non-zero exit status for {}: {}",
            pdf_path.display(),
            stderr.trim()
        );
    }

    Ok(split_pdftotext_pages(&String::from_utf8_lossy(&output.stdout)))
}

/// pdftotext separates pages with form feeds; trailing blank pages are dropped.
fn split_pdftotext_pages(raw: &str) -> Vec<String> {
    let mut pages: Vec<String> = raw
        .split('\u{000C}')
        .map(|chunk| chunk.replace('\u{0000}', ""))
        .collect();

    while let Some(last_page) = pages.last() {
        if last_page.trim().is_empty() {
            pages.pop();
            continue;
        }
        break;
    }

    pages
}
