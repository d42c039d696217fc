use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Result, bail};

use super::*;
use crate::portal::tests::FakeTransport;

const PDF_URL: &str = "https://portal.test/files/1.pdf";

enum Behaviour {
    Text(String),
    Fail,
    Panic,
}

/// Strategy double that records every invocation into a shared log.
struct RecordingStrategy {
    method: ExtractionMethod,
    behaviour: Behaviour,
    calls: Rc<RefCell<Vec<ExtractionMethod>>>,
}

impl ExtractionStrategy for RecordingStrategy {
    fn method(&self) -> ExtractionMethod {
        self.method
    }

    fn extract(&self, _pdf_bytes: &[u8]) -> Result<String> {
        self.calls.borrow_mut().push(self.method);
        match &self.behaviour {
            Behaviour::Text(text) => Ok(text.clone()),
            Behaviour::Fail => bail!("{} is unavailable", self.method.as_str()),
            Behaviour::Panic => panic!("parser blew up"),
        }
    }
}

fn chain(
    behaviours: Vec<(ExtractionMethod, Behaviour)>,
) -> (PdfContentExtractor, Rc<RefCell<Vec<ExtractionMethod>>>) {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let strategies = behaviours
        .into_iter()
        .map(|(method, behaviour)| {
            Box::new(RecordingStrategy {
                method,
                behaviour,
                calls: Rc::clone(&calls),
            }) as Box<dyn ExtractionStrategy>
        })
        .collect();
    (PdfContentExtractor::new(strategies, DEFAULT_MIN_TEXT_CHARS), calls)
}

fn long_text(word: &str) -> String {
    format!("{word} ").repeat(20)
}

#[test]
fn first_strategy_above_threshold_wins() {
    let (extractor, calls) = chain(vec![
        (ExtractionMethod::Pdftotext, Behaviour::Text(long_text("texto"))),
        (ExtractionMethod::PdfExtract, Behaviour::Text(long_text("outro"))),
        (ExtractionMethod::Ocr, Behaviour::Text(long_text("ocr"))),
    ]);

    let outcome = extractor.extract_bytes(b"%PDF");
    assert_eq!(outcome.method(), ExtractionMethod::Pdftotext);
    assert_eq!(*calls.borrow(), vec![ExtractionMethod::Pdftotext]);

    let (text, _, _, error) = outcome.into_parts();
    assert!(text.starts_with("texto"));
    assert!(error.is_empty());
}

#[test]
fn falls_back_in_priority_order_until_ocr_succeeds() {
    let (extractor, calls) = chain(vec![
        (ExtractionMethod::Pdftotext, Behaviour::Text("curto".to_string())),
        (ExtractionMethod::PdfExtract, Behaviour::Text("   quase nada   ".to_string())),
        (
            ExtractionMethod::Ocr,
            Behaviour::Text(format!("--- Page 1 ---\n{}", long_text("digitalizado"))),
        ),
    ]);

    let outcome = extractor.extract_bytes(b"%PDF-scan");

    assert_eq!(outcome.method(), ExtractionMethod::Ocr);
    assert_eq!(
        outcome.attempted_methods(),
        vec![
            ExtractionMethod::Pdftotext,
            ExtractionMethod::PdfExtract,
            ExtractionMethod::Ocr
        ]
    );
    assert_eq!(outcome.attempts[1].char_count, "quase nada".len());
    assert_eq!(*calls.borrow(), outcome.attempted_methods());
    assert_eq!(outcome.pdf_size_bytes, 9);
    assert_eq!(outcome.pdf_sha256, sha256_bytes(b"%PDF-scan"));
}

#[test]
fn text_exactly_at_threshold_is_accepted() {
    let (extractor, _) = chain(vec![(
        ExtractionMethod::PdfExtract,
        Behaviour::Text("x".repeat(DEFAULT_MIN_TEXT_CHARS)),
    )]);

    assert!(extractor.extract_bytes(b"%PDF").is_success());
}

#[test]
fn all_strategies_failing_leaves_content_empty_and_method_none() {
    let (extractor, calls) = chain(vec![
        (ExtractionMethod::Pdftotext, Behaviour::Fail),
        (ExtractionMethod::PdfExtract, Behaviour::Text("pouco".to_string())),
        (ExtractionMethod::Ocr, Behaviour::Fail),
    ]);

    let outcome = extractor.extract_bytes(b"%PDF");
    assert_eq!(calls.borrow().len(), 3);
    assert!(outcome.attempts[0].error.is_some());

    let mut record = NormRecord::default();
    outcome.apply_to(&mut record);
    assert!(record.content.is_empty());
    assert_eq!(record.extraction_method, ExtractionMethod::None);
    assert_eq!(record.extraction_error, NO_STRATEGY_ACCEPTED);
    assert_eq!(record.pdf_size_bytes, 4);
}

#[test]
fn panicking_strategy_is_treated_as_failed_attempt() {
    let (extractor, _) = chain(vec![
        (ExtractionMethod::PdfExtract, Behaviour::Panic),
        (ExtractionMethod::Ocr, Behaviour::Text(long_text("recuperado"))),
    ]);

    let outcome = extractor.extract_bytes(b"%PDF");
    assert_eq!(outcome.method(), ExtractionMethod::Ocr);
    assert_eq!(
        outcome.attempts[0].error.as_deref(),
        Some("strategy panicked")
    );
}

#[test]
fn download_failure_skips_every_strategy() {
    let (mut extractor, calls) = chain(vec![(
        ExtractionMethod::Pdftotext,
        Behaviour::Text(long_text("texto")),
    )]);
    let transport = FakeTransport::default();

    let outcome = extractor.extract(&transport, PDF_URL);
    assert!(!outcome.is_success());
    assert!(calls.borrow().is_empty());

    let (text, method, _, error) = outcome.into_parts();
    assert!(text.is_empty());
    assert_eq!(method, ExtractionMethod::None);
    assert!(error.starts_with(DOWNLOAD_FAILED));
}

#[test]
fn same_url_is_downloaded_once_per_run() {
    let (mut extractor, calls) = chain(vec![(
        ExtractionMethod::Pdftotext,
        Behaviour::Text(long_text("texto")),
    )]);
    let transport = FakeTransport::default().with_download(PDF_URL, b"%PDF-1.7");

    let first = extractor.extract(&transport, PDF_URL);
    let second = extractor.extract(&transport, PDF_URL);

    assert_eq!(first, second);
    assert_eq!(transport.download_count(), 1);
    assert_eq!(extractor.cached_documents(), 1);
    assert_eq!(calls.borrow().len(), 2);
}

#[test]
fn content_is_non_empty_exactly_when_method_is_set() {
    let cases = vec![
        Behaviour::Text(long_text("ok")),
        Behaviour::Text("tiny".to_string()),
        Behaviour::Fail,
    ];

    for behaviour in cases {
        let (extractor, _) = chain(vec![(ExtractionMethod::Pdftotext, behaviour)]);
        let mut record = NormRecord::default();
        extractor.extract_bytes(b"%PDF").apply_to(&mut record);

        assert_eq!(
            record.has_content(),
            record.extraction_method != ExtractionMethod::None
        );
        assert_eq!(record.has_content(), record.extraction_error.is_empty());
    }
}

#[test]
fn empty_text_is_rejected_even_with_zero_threshold() {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let extractor = PdfContentExtractor::new(
        vec![Box::new(RecordingStrategy {
            method: ExtractionMethod::Pdftotext,
            behaviour: Behaviour::Text("  \n ".to_string()),
            calls: Rc::clone(&calls),
        })],
        0,
    );

    let mut record = NormRecord::default();
    let outcome = extractor.extract_bytes(b"%PDF");
    assert!(!outcome.is_success());
    outcome.apply_to(&mut record);

    assert!(record.content.is_empty());
    assert_eq!(record.extraction_method, ExtractionMethod::None);
    assert_eq!(record.extraction_error, NO_STRATEGY_ACCEPTED);
}
