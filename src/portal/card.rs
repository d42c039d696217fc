use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::model::{LegalStatus, NormRecord};

/// Records parsed from one results page, plus the raw fragment count used by
/// the paginator's end-of-results rule.
#[derive(Debug, Default)]
pub struct ParsedPage {
    pub fragment_count: usize,
    pub records: Vec<NormRecord>,
}

pub struct CardParser {
    base_url: Url,
    card: Selector,
    title_link: Selector,
    author_link: Selector,
    material: Selector,
    sphere: Selector,
    status: Selector,
    signed: Selector,
    published: Selector,
    subject_link: Selector,
    attachment_link: Selector,
    code_pattern: Regex,
}

impl CardParser {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            base_url: Url::parse(base_url)
                .with_context(|| format!("invalid portal base URL: {base_url}"))?,
            card: selector("div.ficha-acervo-detalhe")?,
            title_link: selector("p.titulo a")?,
            author_link: selector("p.autor a.link-autor")?,
            material: selector("p.material")?,
            sphere: selector("p.esfera")?,
            status: selector("p.situacao span.destaque-situacao")?,
            signed: selector("p.assinatura")?,
            published: selector("p.publicacao")?,
            subject_link: selector("p.assunto a")?,
            attachment_link: selector("div.arquivos a")?,
            code_pattern: Regex::new(r"detalhe/(\d+)")
                .context("failed to compile record code regex")?,
        })
    }

    /// Parses every card on a results page. Cards without a title are counted
    /// as fragments but produce no record.
    pub fn parse_page(&self, html: &str) -> ParsedPage {
        let document = Html::parse_document(html);
        let mut page = ParsedPage::default();

        for card in document.select(&self.card) {
            page.fragment_count += 1;
            let record = self.parse(card);
            if !record.title.is_empty() {
                page.records.push(record);
            }
        }

        page
    }

    /// Maps one card onto a record. Every field is optional in the markup; a
    /// missing element leaves the default value in place.
    pub fn parse(&self, card: ElementRef<'_>) -> NormRecord {
        let mut record = NormRecord::default();

        if let Some(link) = card.select(&self.title_link).next() {
            record.title = element_text(link);
            if let Some(href) = link.value().attr("href") {
                record.code = self
                    .code_pattern
                    .captures(href)
                    .and_then(|captures| captures.get(1))
                    .map(|code| code.as_str().to_string())
                    .unwrap_or_default();
            }
        }

        record.author = self.first_text(card, &self.author_link);
        record.material_type = self.first_text(card, &self.material);
        record.sphere = strip_label(&self.first_text(card, &self.sphere), "Esfera:");
        record.legal_status_label = self.first_text(card, &self.status);
        record.legal_status = LegalStatus::from_portal_label(&record.legal_status_label);
        record.signed_on =
            parse_portal_date(&strip_label(&self.first_text(card, &self.signed), "Assinatura:"));
        record.published_on = parse_portal_date(&strip_label(
            &self.first_text(card, &self.published),
            "Publicação:",
        ));
        record.subject = self.first_text(card, &self.subject_link);

        if let Some(href) = card
            .select(&self.attachment_link)
            .next()
            .and_then(|link| link.value().attr("href"))
            .map(str::trim)
            .filter(|href| !href.is_empty())
        {
            record.pdf_url = self
                .base_url
                .join(href)
                .map(String::from)
                .unwrap_or_default();
        }

        record
    }

    #[cfg(test)]
    pub fn parse_fragment(&self, fragment: &str) -> Option<NormRecord> {
        let document = Html::parse_fragment(fragment);
        document.select(&self.card).next().map(|card| self.parse(card))
    }

    fn first_text(&self, card: ElementRef<'_>, selector: &Selector) -> String {
        card.select(selector)
            .next()
            .map(element_text)
            .unwrap_or_default()
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|error| anyhow!("invalid card selector {css}: {error}"))
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_label(text: &str, label: &str) -> String {
    text.trim()
        .strip_prefix(label)
        .unwrap_or(text.trim())
        .trim()
        .to_string()
}

/// Portal dates are `dd/mm/YYYY`; anything else is treated as absent.
pub fn parse_portal_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%d/%m/%Y").ok()
}
