use std::collections::HashSet;

use chrono::NaiveDate;
use tempfile::TempDir;

use super::*;
use crate::model::{ExtractionMethod, LegalStatus};

fn store(dir: &TempDir) -> CorpusStore {
    CorpusStore::new(dir.path().join("corpus").join("normas.parquet"))
}

fn record(code: &str) -> NormRecord {
    NormRecord {
        code: code.to_string(),
        title: format!("Resolução {code}"),
        material_type: "Resolução".to_string(),
        legal_status: LegalStatus::InForce,
        published_on: NaiveDate::from_ymd_opt(2020, 3, 1),
        ..NormRecord::default()
    }
}

fn with_content(code: &str) -> NormRecord {
    NormRecord {
        content: "texto integral".to_string(),
        extraction_method: ExtractionMethod::Pdftotext,
        ..record(code)
    }
}

#[test]
fn missing_snapshot_is_an_empty_corpus() {
    let dir = TempDir::new().expect("tempdir");
    let store = store(&dir);

    assert!(!store.exists());
    assert!(store.load().expect("load").is_empty());
    assert!(store.load_keys().expect("keys").is_empty());
}

#[test]
fn persist_never_stores_a_code_twice() {
    let dir = TempDir::new().expect("tempdir");
    let store = store(&dir);

    let first = store
        .persist(&[record("1"), record("2")])
        .expect("first persist");
    assert_eq!(first, PersistSummary { existing: 0, appended: 2, total: 2 });

    let second = store
        .persist(&[record("2"), record("3"), record("3")])
        .expect("second persist");
    assert_eq!(second, PersistSummary { existing: 2, appended: 1, total: 3 });

    let codes: Vec<String> = store
        .load()
        .expect("load")
        .into_iter()
        .map(|record| record.code)
        .collect();
    assert_eq!(codes, vec!["1", "2", "3"]);
    assert_eq!(codes.iter().collect::<HashSet<_>>().len(), codes.len());
}

#[test]
fn persisting_the_same_batch_twice_leaves_snapshot_untouched() {
    let dir = TempDir::new().expect("tempdir");
    let store = store(&dir);
    let batch = vec![with_content("10"), record("11")];

    store.persist(&batch).expect("first persist");
    let before = std::fs::read(store.path()).expect("snapshot bytes");

    let summary = store.persist(&batch).expect("second persist");
    let after = std::fs::read(store.path()).expect("snapshot bytes");

    assert_eq!(summary.appended, 0);
    assert_eq!(before, after);
}

#[test]
fn persist_does_not_overwrite_existing_entries_or_index_flags() {
    let dir = TempDir::new().expect("tempdir");
    let store = store(&dir);
    store.persist(&[record("A")]).expect("persist");

    let marked = store
        .update_where(|stored| {
            stored.indexed = true;
            stored.indexed_checked_at = Some("2024-05-01T00:00:00Z".to_string());
            true
        })
        .expect("indexer write-back");
    assert_eq!(marked, 1);

    let refreshed = NormRecord {
        title: "Título alterado".to_string(),
        ..with_content("A")
    };
    store
        .persist(&[refreshed, record("B")])
        .expect("persist");

    let records = store.load().expect("load");
    assert_eq!(records[0].title, "Resolução A");
    assert!(records[0].indexed);
    assert_eq!(
        records[0].indexed_checked_at.as_deref(),
        Some("2024-05-01T00:00:00Z")
    );
    assert!(!records[1].indexed);
    assert_eq!(records[1].indexed_checked_at, None);
}

#[test]
fn update_where_without_changes_does_not_rewrite() {
    let dir = TempDir::new().expect("tempdir");
    let store = store(&dir);
    store.persist(&[record("1")]).expect("persist");
    let before = std::fs::read(store.path()).expect("snapshot bytes");

    let changed = store.update_where(|_| false).expect("update");
    assert_eq!(changed, 0);
    assert_eq!(std::fs::read(store.path()).expect("snapshot bytes"), before);
}

#[test]
fn stats_aggregates_by_category() {
    let dir = TempDir::new().expect("tempdir");
    let store = store(&dir);
    let revoked = NormRecord {
        legal_status: LegalStatus::Revoked,
        material_type: String::new(),
        published_on: None,
        ..record("3")
    };
    store
        .persist(&[with_content("1"), record("2"), revoked])
        .expect("persist");

    let stats = store.stats().expect("stats");
    assert_eq!(stats.total, 3);
    assert_eq!(stats.with_content, 1);
    assert_eq!(stats.indexed, 0);
    assert_eq!(stats.by_legal_status.get("in_force"), Some(&2));
    assert_eq!(stats.by_legal_status.get("revoked"), Some(&1));
    assert_eq!(stats.by_material_type.get("unknown"), Some(&1));
    assert_eq!(stats.by_publication_year.get("2020"), Some(&2));
    assert_eq!(stats.by_extraction_method.get("pdftotext"), Some(&1));
    assert_eq!(stats.by_extraction_method.get("none"), Some(&2));
}

#[test]
fn backup_copies_existing_snapshot_only() {
    let dir = TempDir::new().expect("tempdir");
    let store = store(&dir);
    let backups = dir.path().join("backups");

    assert_eq!(store.backup_to(&backups, "2019").expect("backup"), None);

    store.persist(&[record("1")]).expect("persist");
    let backup = store
        .backup_to(&backups, "2019")
        .expect("backup")
        .expect("backup path");

    assert!(backup.starts_with(&backups));
    assert_eq!(
        std::fs::read(&backup).expect("backup bytes"),
        std::fs::read(store.path()).expect("snapshot bytes")
    );
    assert_eq!(
        CorpusStore::new(backup).load().expect("backup loads"),
        store.load().expect("snapshot loads")
    );
}
