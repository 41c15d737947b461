//! Source cleaners: project each provider's raw file onto [`EmissionRecord`]s.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Datelike;
use ghg_core::{vocab, EmissionRecord, Source, MIN_YEAR};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

pub mod edgar;
pub mod grid;
pub mod owid;
pub mod table;

pub use edgar::EdgarWorkbookCleaner;
pub use owid::OwidCsvCleaner;
pub use table::ProviderTableCleaner;

pub const CRATE_NAME: &str = "ghg-adapters";

/// Raw layout of a provider file; selects the cleaner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    OwidCsv,
    EdgarWorkbook,
    ProviderTable,
}

#[derive(Debug, Error)]
pub enum CleanError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Workbook(#[from] calamine::Error),
    #[error("{provider} file is missing required columns: {}", .columns.join(", "))]
    MissingColumns {
        provider: Source,
        columns: Vec<&'static str>,
    },
    #[error("{provider} file has an unexpected structure: {detail}")]
    Structure { provider: Source, detail: String },
}

/// Inclusive range of reporting years a cleaner keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearWindow {
    pub min: i32,
    pub max: i32,
}

impl YearWindow {
    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    /// 1990 through the current calendar year.
    pub fn through_current_year() -> Self {
        Self::new(MIN_YEAR, chrono::Utc::now().year())
    }

    pub fn contains(&self, year: i32) -> bool {
        (self.min..=self.max).contains(&year)
    }
}

impl Default for YearWindow {
    fn default() -> Self {
        Self::through_current_year()
    }
}

impl fmt::Display for YearWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

pub trait SourceCleaner: Send + Sync {
    fn source(&self) -> Source;

    fn clean(&self, path: &Path) -> Result<Vec<EmissionRecord>, CleanError>;
}

/// Cleaning boundary used by the pipeline: failures are logged and the source
/// contributes an empty table instead of aborting the run.
pub fn clean_or_empty(cleaner: &dyn SourceCleaner, path: &Path) -> Vec<EmissionRecord> {
    match cleaner.clean(path) {
        Ok(records) => {
            info!(
                source = %cleaner.source(),
                path = %path.display(),
                rows = records.len(),
                countries = distinct_countries(&records),
                "cleaned source file"
            );
            records
        }
        Err(err) => {
            error!(
                source = %cleaner.source(),
                path = %path.display(),
                error = %err,
                "source file could not be cleaned; contributing no rows"
            );
            Vec::new()
        }
    }
}

pub fn cleaner_for(format: SourceFormat, source: Source, window: YearWindow) -> Box<dyn SourceCleaner> {
    match format {
        SourceFormat::OwidCsv => Box::new(OwidCsvCleaner::new(window)),
        SourceFormat::EdgarWorkbook => Box::new(EdgarWorkbookCleaner::new(window)),
        SourceFormat::ProviderTable => Box::new(ProviderTableCleaner::new(source, window)),
    }
}

fn distinct_countries(records: &[EmissionRecord]) -> usize {
    let mut names = records.iter().map(|r| r.country.as_str()).collect::<Vec<_>>();
    names.sort_unstable();
    names.dedup();
    names.len()
}

/// Float coercion shared by every cleaner: blank, placeholder and non-finite
/// values are unknown (`None`), never zero.
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Some(v),
        _ => None,
    }
}

/// Gas amounts are non-negative; anything else is treated as unknown.
pub fn emission_amount(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v >= 0.0)
}

pub fn parse_year(raw: &str) -> Option<i32> {
    let trimmed = raw.trim();
    if let Ok(year) = trimmed.parse::<i32>() {
        return Some(year);
    }
    let value = trimmed.parse::<f64>().ok()?;
    if value.fract() == 0.0 && value.abs() < i32::MAX as f64 {
        Some(value as i32)
    } else {
        None
    }
}

/// Identity of an accepted row after the shared filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowIdentity {
    pub country: String,
    pub iso: String,
}

/// Applies the row filters every source shares: a real three-letter iso, a
/// non-aggregate country name and a year inside `window`. A country given
/// only as its code takes the canonical name for that code.
pub fn accept_row(
    country: &str,
    iso: Option<&str>,
    year: Option<i32>,
    window: YearWindow,
) -> Option<RowIdentity> {
    let year = year?;
    if !window.contains(year) {
        return None;
    }
    let iso = vocab::normalize_iso(iso?)?;
    if vocab::is_aggregate_label(country) {
        return None;
    }
    let country = if country.trim().eq_ignore_ascii_case(&iso) {
        vocab::country_name_for_iso(&iso).map_or_else(|| iso.clone(), str::to_string)
    } else {
        vocab::standardize_country_name(country).into_owned()
    };
    Some(RowIdentity { country, iso })
}

/// Lower-cased header with `_` and repeated spaces folded to one space.
pub(crate) fn header_key(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn find_column(headers: &[String], aliases: &[&str]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|alias| headers.iter().position(|h| h == alias))
}

pub(crate) const COUNTRY_ALIASES: &[&str] = &["country", "country name", "name", "party", "area"];
pub(crate) const ISO_ALIASES: &[&str] = &[
    "iso",
    "iso code",
    "iso3",
    "iso a3",
    "iso3 code",
    "country code a3",
    "edgar country code",
    "country code",
    "code",
];
pub(crate) const GAS_ALIASES: &[&str] = &["gas", "substance"];
pub(crate) const SECTOR_ALIASES: &[&str] = &["sector", "category"];
pub(crate) const VALUE_ALIASES: &[&str] = &["value", "emissions", "emission value"];
pub(crate) const YEAR_ALIASES: &[&str] = &["year"];

/// Provider tables repeat every sector; only the national total rows describe
/// the whole economy. A missing sector label counts as a total.
pub(crate) fn is_total_sector(label: Option<&str>) -> bool {
    match label.map(str::trim) {
        None | Some("") => true,
        Some(label) => label.to_lowercase().starts_with("total"),
    }
}

/// A three-letter upper-case value standing in a country column is a code.
pub(crate) fn looks_like_iso(value: &str) -> bool {
    let value = value.trim();
    value.len() == 3 && value.chars().all(|c| c.is_ascii_uppercase())
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> CleanError {
    CleanError::Io {
        path: path.to_path_buf(),
        source,
    }
}
