//! Arrow layout of the corpus snapshot.
//!
//! Reading is lenient: a column missing from an older snapshot yields the
//! field's default so earlier files stay loadable.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Int32Array, LargeStringArray, StringArray,
    UInt32Array, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use chrono::{Datelike, NaiveDate};

use crate::model::{ExtractionMethod, LegalStatus, NormRecord};

/// Days between 0001-01-01 (CE day 1) and the Unix epoch.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

pub fn corpus_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("code", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, false),
        Field::new("author", DataType::Utf8, false),
        Field::new("sphere", DataType::Utf8, false),
        Field::new("subject", DataType::Utf8, false),
        Field::new("legal_status", DataType::Utf8, false),
        Field::new("legal_status_label", DataType::Utf8, false),
        Field::new("signed_on", DataType::Date32, true),
        Field::new("published_on", DataType::Date32, true),
        Field::new("pdf_url", DataType::Utf8, false),
        Field::new("material_type", DataType::Utf8, false),
        Field::new("search_year", DataType::Int32, true),
        Field::new("content", DataType::Utf8, false),
        Field::new("extraction_method", DataType::Utf8, false),
        Field::new("pdf_size_bytes", DataType::UInt64, false),
        Field::new("pages_extracted", DataType::UInt32, false),
        Field::new("extraction_error", DataType::Utf8, false),
        Field::new("pdf_sha256", DataType::Utf8, false),
        Field::new("indexed", DataType::Boolean, false),
        Field::new("indexed_checked_at", DataType::Utf8, true),
    ]))
}

pub fn records_to_batch(records: &[NormRecord]) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = vec![
        string_array(records, |record| &record.code),
        string_array(records, |record| &record.title),
        string_array(records, |record| &record.author),
        string_array(records, |record| &record.sphere),
        string_array(records, |record| &record.subject),
        string_array(records, |record| record.legal_status.as_str()),
        string_array(records, |record| &record.legal_status_label),
        Arc::new(Date32Array::from(
            records
                .iter()
                .map(|record| record.signed_on.map(date_to_days))
                .collect::<Vec<_>>(),
        )),
        Arc::new(Date32Array::from(
            records
                .iter()
                .map(|record| record.published_on.map(date_to_days))
                .collect::<Vec<_>>(),
        )),
        string_array(records, |record| &record.pdf_url),
        string_array(records, |record| &record.material_type),
        Arc::new(Int32Array::from(
            records
                .iter()
                .map(|record| record.search_year)
                .collect::<Vec<_>>(),
        )),
        string_array(records, |record| &record.content),
        string_array(records, |record| record.extraction_method.as_str()),
        Arc::new(UInt64Array::from(
            records
                .iter()
                .map(|record| record.pdf_size_bytes)
                .collect::<Vec<_>>(),
        )),
        Arc::new(UInt32Array::from(
            records
                .iter()
                .map(|record| record.pages_extracted)
                .collect::<Vec<_>>(),
        )),
        string_array(records, |record| &record.extraction_error),
        string_array(records, |record| &record.pdf_sha256),
        Arc::new(BooleanArray::from(
            records.iter().map(|record| record.indexed).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            records
                .iter()
                .map(|record| record.indexed_checked_at.as_deref())
                .collect::<Vec<_>>(),
        )),
    ];

    RecordBatch::try_new(corpus_schema(), columns).context("building corpus record batch")
}

fn string_array(records: &[NormRecord], get: impl Fn(&NormRecord) -> &str) -> ArrayRef {
    Arc::new(StringArray::from(
        records
            .iter()
            .map(|record| Some(get(record)))
            .collect::<Vec<_>>(),
    ))
}

pub fn batch_to_records(batch: &RecordBatch) -> Result<Vec<NormRecord>> {
    let code = string_column(batch, "code")?
        .ok_or_else(|| anyhow!("corpus snapshot has no `code` column"))?;
    let title = string_column(batch, "title")?;
    let author = string_column(batch, "author")?;
    let sphere = string_column(batch, "sphere")?;
    let subject = string_column(batch, "subject")?;
    let legal_status = string_column(batch, "legal_status")?;
    let legal_status_label = string_column(batch, "legal_status_label")?;
    let signed_on = typed_column::<Date32Array>(batch, "signed_on")?;
    let published_on = typed_column::<Date32Array>(batch, "published_on")?;
    let pdf_url = string_column(batch, "pdf_url")?;
    let material_type = string_column(batch, "material_type")?;
    let search_year = typed_column::<Int32Array>(batch, "search_year")?;
    let content = string_column(batch, "content")?;
    let extraction_method = string_column(batch, "extraction_method")?;
    let pdf_size_bytes = typed_column::<UInt64Array>(batch, "pdf_size_bytes")?;
    let pages_extracted = typed_column::<UInt32Array>(batch, "pages_extracted")?;
    let extraction_error = string_column(batch, "extraction_error")?;
    let pdf_sha256 = string_column(batch, "pdf_sha256")?;
    let indexed = typed_column::<BooleanArray>(batch, "indexed")?;
    let indexed_checked_at = string_column(batch, "indexed_checked_at")?;

    let mut records = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let text = |column: &Option<StringColumn<'_>>| -> String {
            column
                .as_ref()
                .and_then(|column| column.value(row))
                .unwrap_or_default()
                .to_string()
        };

        let method_label = text(&extraction_method);
        let extraction_method = ExtractionMethod::from_str_value(&method_label)
            .ok_or_else(|| anyhow!("unknown extraction method `{method_label}` in row {row}"))?;

        records.push(NormRecord {
            code: code.value(row).unwrap_or_default().to_string(),
            title: text(&title),
            author: text(&author),
            sphere: text(&sphere),
            subject: text(&subject),
            legal_status: LegalStatus::from_str_value(&text(&legal_status)),
            legal_status_label: text(&legal_status_label),
            signed_on: signed_on
                .and_then(|column| nullable(column, row).map(|index| column.value(index)))
                .and_then(days_to_date),
            published_on: published_on
                .and_then(|column| nullable(column, row).map(|index| column.value(index)))
                .and_then(days_to_date),
            pdf_url: text(&pdf_url),
            material_type: text(&material_type),
            search_year: search_year
                .and_then(|column| nullable(column, row).map(|index| column.value(index))),
            content: text(&content),
            extraction_method,
            pdf_size_bytes: pdf_size_bytes
                .and_then(|column| nullable(column, row).map(|index| column.value(index)))
                .unwrap_or_default(),
            pages_extracted: pages_extracted
                .and_then(|column| nullable(column, row).map(|index| column.value(index)))
                .unwrap_or_default(),
            extraction_error: text(&extraction_error),
            pdf_sha256: text(&pdf_sha256),
            indexed: indexed
                .and_then(|column| nullable(column, row).map(|index| column.value(index)))
                .unwrap_or_default(),
            indexed_checked_at: indexed_checked_at
                .as_ref()
                .and_then(|column| column.value(row))
                .map(str::to_string),
        });
    }

    Ok(records)
}

/// Snapshots written by other tools may carry large-utf8 columns.
#[derive(Clone, Copy)]
enum StringColumn<'a> {
    Utf8(&'a StringArray),
    LargeUtf8(&'a LargeStringArray),
}

impl<'a> StringColumn<'a> {
    fn value(&self, row: usize) -> Option<&'a str> {
        match *self {
            Self::Utf8(array) => (!array.is_null(row)).then(|| array.value(row)),
            Self::LargeUtf8(array) => (!array.is_null(row)).then(|| array.value(row)),
        }
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<Option<StringColumn<'a>>> {
    let Some(column) = batch.column_by_name(name) else {
        return Ok(None);
    };

    if let Some(array) = column.as_any().downcast_ref::<StringArray>() {
        return Ok(Some(StringColumn::Utf8(array)));
    }
    if let Some(array) = column.as_any().downcast_ref::<LargeStringArray>() {
        return Ok(Some(StringColumn::LargeUtf8(array)));
    }

    Err(anyhow!(
        "corpus column `{name}` has type {}, expected a string type",
        column.data_type()
    ))
}

fn typed_column<'a, T: Array + 'static>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<Option<&'a T>> {
    let Some(column) = batch.column_by_name(name) else {
        return Ok(None);
    };

    column
        .as_any()
        .downcast_ref::<T>()
        .map(Some)
        .ok_or_else(|| {
            anyhow!(
                "corpus column `{name}` has unexpected type {}",
                column.data_type()
            )
        })
}

/// `Some(row)` when the cell holds a value.
fn nullable<T: Array>(column: &T, row: usize) -> Option<usize> {
    (!column.is_null(row)).then_some(row)
}

fn date_to_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

fn days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> NormRecord {
        NormRecord {
            code: "41532".to_string(),
            title: "Resolução Normativa nº 18".to_string(),
            legal_status: LegalStatus::InForce,
            legal_status_label: "Em vigor".to_string(),
            signed_on: NaiveDate::from_ymd_opt(2017, 12, 21),
            search_year: Some(2017),
            content: "texto".to_string(),
            extraction_method: ExtractionMethod::Ocr,
            pdf_size_bytes: 1024,
            pages_extracted: 3,
            indexed: true,
            indexed_checked_at: Some("2024-01-01T00:00:00Z".to_string()),
            ..NormRecord::default()
        }
    }

    #[test]
    fn date_conversion_is_anchored_at_unix_epoch() {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid date");
        assert_eq!(date_to_days(epoch), 0);
        assert_eq!(days_to_date(0), Some(epoch));
    }

    #[test]
    fn batch_preserves_every_field() {
        let records = vec![sample_record(), NormRecord {
            code: "7".to_string(),
            ..NormRecord::default()
        }];

        let batch = records_to_batch(&records).expect("batch should build");
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema(), corpus_schema());

        let restored = batch_to_records(&batch).expect("batch should decode");
        assert_eq!(restored, records);
    }

    #[test]
    fn missing_optional_columns_fall_back_to_defaults() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("code", DataType::Utf8, false),
            Field::new("title", DataType::LargeUtf8, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["1"])),
                Arc::new(LargeStringArray::from(vec!["Portaria"])),
            ],
        )
        .expect("batch should build");

        let records = batch_to_records(&batch).expect("batch should decode");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Portaria");
        assert_eq!(records[0].extraction_method, ExtractionMethod::None);
        assert!(!records[0].indexed);
    }

    #[test]
    fn batch_without_code_column_is_rejected() {
        let schema = Arc::new(Schema::new(vec![Field::new("title", DataType::Utf8, false)]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(StringArray::from(vec!["x"]))])
            .expect("batch should build");

        assert!(batch_to_records(&batch).is_err());
    }
}
