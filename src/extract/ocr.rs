use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use tracing::debug;

use super::ExtractionStrategy;
use super::text_layer::write_temp_pdf;
use crate::model::ExtractionMethod;

const PAGE_MARKER: &str = "--- Page ";

/// Last resort for scanned documents: rasterise every page with `pdftoppm`
/// and recognise each image with `tesseract`.
pub struct OcrStrategy {
    lang: String,
    dpi: u32,
}

impl OcrStrategy {
    pub fn new(lang: &str) -> Self {
        Self {
            lang: lang.to_string(),
            dpi: 300,
        }
    }
}

impl ExtractionStrategy for OcrStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Ocr
    }

    fn extract(&self, pdf_bytes: &[u8]) -> Result<String> {
        let pdf_file = write_temp_pdf(pdf_bytes)?;
        let work_dir = tempfile::Builder::new()
            .prefix("normharvest_ocr_")
            .tempdir()
            .context("failed to create OCR work directory")?;

        let images = rasterize_pages(pdf_file.path(), work_dir.path(), self.dpi)?;
        let mut sections = Vec::with_capacity(images.len());

        for (index, image) in images.iter().enumerate() {
            let page_number = index + 1;
            match recognize_page(image, &self.lang) {
                Ok(text) if !text.trim().is_empty() => {
                    sections.push(format!("{PAGE_MARKER}{page_number} ---\n{}", text.trim()));
                }
                Ok(_) => debug!(page = page_number, "OCR produced no text"),
                Err(error) => debug!(page = page_number, error = %error, "OCR failed for page"),
            }
        }

        Ok(sections.join("\n\n"))
    }

    fn estimate_pages(&self, text: &str) -> u32 {
        count_ocr_pages(text)
    }
}

fn count_ocr_pages(text: &str) -> u32 {
    text.matches(PAGE_MARKER).count() as u32
}

fn rasterize_pages(pdf_path: &Path, output_dir: &Path, dpi: u32) -> Result<Vec<PathBuf>> {
    let output_root = output_dir.join("page");
    let output = Command::new("pdftoppm")
        .arg("-r")
        .arg(dpi.to_string())
        .arg("-png")
        .arg(pdf_path)
        .arg(&output_root)
        .output()
        .with_context(|| format!("failed to execute pdftoppm for {}", pdf_path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "pdftoppm returned non-zero exit status for {}: {}",
            pdf_path.display(),
            stderr.trim()
        );
    }

    let mut images = Vec::new();
    let entries = fs::read_dir(output_dir)
        .with_context(|| format!("failed to read {}", output_dir.display()))?;
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to read entry in {}", output_dir.display()))?
            .path();
        if let Some(page_number) = page_number_of(&path) {
            images.push((page_number, path));
        }
    }

    if images.is_empty() {
        bail!("pdftoppm produced no page images for {}", pdf_path.display());
    }

    images.sort_by_key(|(page_number, _)| *page_number);
    Ok(images.into_iter().map(|(_, path)| path).collect())
}

/// pdftoppm names images `page-1.png` or zero-padded `page-01.png`
/// depending on the page count.
fn page_number_of(path: &Path) -> Option<u32> {
    let is_png = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
    if !is_png {
        return None;
    }

    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.strip_prefix("page-"))
        .and_then(|number| number.parse::<u32>().ok())
}

fn recognize_page(image_path: &Path, lang: &str) -> Result<String> {
    let output = Command::new("tesseract")
        .arg(image_path)
        .arg("stdout")
        .arg("-l")
        .arg(lang)
        .output()
        .with_context(|| format!("failed to execute tesseract for {}", image_path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "tesseract returned non-zero exit status for {}: {}",
            image_path.display(),
            stderr.trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .replace('\u{0000}', "")
        .trim()
        .to_string())
}
