use std::collections::HashSet;

use ghg_core::EmissionRecord;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("no source produced any rows; nothing to merge")]
    NoData,
}

/// Concatenates the cleaned tables, keeps the highest-priority row for each
/// (country, year) and returns the result sorted by country then year.
///
/// Two rows sharing an iso code and year are the same country-year even when
/// providers spell the name differently.
pub fn merge_sources(tables: Vec<Vec<EmissionRecord>>) -> Result<Vec<EmissionRecord>, MergeError> {
    let mut combined: Vec<EmissionRecord> = tables.into_iter().flatten().collect();
    if combined.is_empty() {
        warn!("all source tables are empty");
        return Err(MergeError::NoData);
    }
    let before = combined.len();

    // stable: equal priorities keep input order
    combined.sort_by_key(|record| record.source.priority());

    let mut seen_names: HashSet<(String, i32)> = HashSet::with_capacity(combined.len());
    let mut seen_isos: HashSet<(String, i32)> = HashSet::with_capacity(combined.len());
    combined.retain(|record| {
        let name_key = (record.country.clone(), record.year);
        let iso_key = record.iso.clone().map(|iso| (iso, record.year));
        let duplicate = seen_names.contains(&name_key)
            || iso_key.as_ref().is_some_and(|key| seen_isos.contains(key));
        if duplicate {
            return false;
        }
        seen_names.insert(name_key);
        if let Some(key) = iso_key {
            seen_isos.insert(key);
        }
        true
    });
    combined.sort_by(|a, b| a.country.cmp(&b.country).then(a.year.cmp(&b.year)));

    info!(
        rows_in = before,
        rows_out = combined.len(),
        dropped = before - combined.len(),
        "merged source tables"
    );
    Ok(combined)
}
