use std::collections::HashSet;

use tracing::warn;

use crate::model::NormRecord;

/// Keeps the records whose code is non-empty, unknown to the corpus and not
/// already accepted earlier in `batch`. Order is preserved; the first
/// occurrence of a code wins.
pub fn filter_new_records(
    existing_codes: &HashSet<String>,
    batch: Vec<NormRecord>,
) -> Vec<NormRecord> {
    let mut accepted_codes = HashSet::new();
    let mut accepted = Vec::with_capacity(batch.len());

    for record in batch {
        if record.code.is_empty() {
            warn!(title = %record.title, "dropping record without code");
            continue;
        }
        if existing_codes.contains(&record.code) {
            continue;
        }
        if !accepted_codes.insert(record.code.clone()) {
            continue;
        }
        accepted.push(record);
    }

    accepted
}
