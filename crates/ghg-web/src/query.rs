//! Filter, sort and paginate over the tables of a [`DataSnapshot`].
//!
//! [`DataSnapshot`]: crate::service::DataSnapshot

use std::cmp::Ordering;
use std::collections::BTreeMap;

use ghg_core::vocab::{gas_from_label, sector_from_label};
use ghg_core::{Continent, EmissionRecord, Gas, GasRecord, Sector, SectorRecord};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

pub const DEFAULT_LIMIT: usize = 1000;
pub const MAX_LIMIT: usize = 10_000;
pub const DEFAULT_SORT_COLUMN: &str = "year";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("limit must be between 1 and {MAX_LIMIT}, got {0}")]
    LimitOutOfRange(usize),
    #[error("unknown {kind} `{value}`")]
    UnknownLabel { kind: &'static str, value: String },
}

/// Query string of `GET /data`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataQuery {
    pub country: Option<String>,
    pub iso: Option<String>,
    pub continent: Option<String>,
    pub year: Option<i32>,
    pub year_start: Option<i32>,
    pub year_end: Option<i32>,
    pub sector: Option<String>,
    pub gas: Option<String>,
    pub min_emissions: Option<f64>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub sort_by: Option<String>,
    pub sort_desc: Option<bool>,
}

/// Which table a query runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Emissions,
    Sectors,
    Gases,
}

/// A validated [`DataQuery`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub view: View,
    country: Option<String>,
    iso: Option<String>,
    continent: Option<Continent>,
    year_min: Option<i32>,
    year_max: Option<i32>,
    sector: Option<Sector>,
    gas: Option<Gas>,
    min_emissions: Option<f64>,
    sort_by: String,
    sort_desc: bool,
    limit: usize,
    offset: usize,
    applied: BTreeMap<String, Value>,
}

impl DataQuery {
    pub fn parse(&self) -> Result<ParsedQuery, QueryError> {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(QueryError::LimitOutOfRange(limit));
        }

        let mut applied = BTreeMap::new();
        let country = non_empty(&self.country);
        if let Some(country) = country {
            applied.insert("country".to_string(), json!(country));
        }
        let iso = non_empty(&self.iso);
        if let Some(iso) = iso {
            applied.insert("iso".to_string(), json!(iso));
        }

        let continent = match non_empty(&self.continent) {
            Some(label) if !label.eq_ignore_ascii_case("all") => {
                let continent = label
                    .parse::<Continent>()
                    .map_err(|_| unknown("continent", label))?;
                applied.insert("continent".to_string(), json!(continent.label()));
                Some(continent)
            }
            _ => None,
        };

        let (year_min, year_max) = match self.year {
            Some(year) => {
                applied.insert("year".to_string(), json!(year));
                (Some(year), Some(year))
            }
            None => {
                if let Some(start) = self.year_start {
                    applied.insert("year_start".to_string(), json!(start));
                }
                if let Some(end) = self.year_end {
                    applied.insert("year_end".to_string(), json!(end));
                }
                (self.year_start, self.year_end)
            }
        };

        let sector = match non_empty(&self.sector) {
            Some(label) if !label.eq_ignore_ascii_case("all") => {
                let sector = label
                    .parse::<Sector>()
                    .ok()
                    .or_else(|| sector_from_label(label))
                    .ok_or_else(|| unknown("sector", label))?;
                applied.insert("sector".to_string(), json!(sector.label()));
                Some(sector)
            }
            _ => None,
        };
        let gas = match non_empty(&self.gas) {
            Some(label) => {
                let gas = label
                    .parse::<Gas>()
                    .ok()
                    .or_else(|| gas_from_label(label))
                    .ok_or_else(|| unknown("gas", label))?;
                applied.insert("gas".to_string(), json!(gas.label()));
                Some(gas)
            }
            None => None,
        };
        if let Some(min) = self.min_emissions {
            applied.insert("min_emissions".to_string(), json!(min));
        }

        let view = match (sector, gas) {
            (Some(_), _) => View::Sectors,
            (None, Some(_)) => View::Gases,
            (None, None) => View::Emissions,
        };

        Ok(ParsedQuery {
            view,
            country: country.map(str::to_lowercase),
            iso: iso.map(str::to_string),
            continent,
            year_min,
            year_max,
            sector,
            gas,
            min_emissions: self.min_emissions,
            sort_by: non_empty(&self.sort_by)
                .unwrap_or(DEFAULT_SORT_COLUMN)
                .to_string(),
            sort_desc: self.sort_desc.unwrap_or(true),
            limit,
            offset: self.offset.unwrap_or(0),
            applied,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn unknown(kind: &'static str, value: &str) -> QueryError {
    QueryError::UnknownLabel {
        kind,
        value: value.to_string(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub total_records: usize,
    pub filters_applied: BTreeMap<String, Value>,
    pub data: Vec<T>,
}

/// Sortable cell value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SortKey<'a> {
    Int(i64),
    Num(f64),
    Text(&'a str),
}

impl SortKey<'_> {
    fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Int(a), SortKey::Int(b)) => a.cmp(b),
            (SortKey::Num(a), SortKey::Num(b)) => a.total_cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

/// A row of one of the queryable tables.
pub trait QueryRow: Serialize + Clone {
    fn country(&self) -> &str;
    fn iso(&self) -> Option<&str>;
    fn continent(&self) -> Continent;
    fn year(&self) -> i32;
    fn sector(&self) -> Option<Sector> {
        None
    }
    fn gas(&self) -> Option<Gas> {
        None
    }
    /// Value compared against `min_emissions`.
    fn measure(&self) -> Option<f64>;
    /// `None` for a column the table does not have, `Some(None)` for a null.
    fn column(&self, name: &str) -> Option<Option<SortKey<'_>>>;
}

fn num(value: Option<f64>) -> Option<SortKey<'static>> {
    value.map(SortKey::Num)
}

fn text(value: &str) -> Option<SortKey<'_>> {
    Some(SortKey::Text(value))
}

impl QueryRow for EmissionRecord {
    fn country(&self) -> &str {
        &self.country
    }
    fn iso(&self) -> Option<&str> {
        self.iso.as_deref()
    }
    fn continent(&self) -> Continent {
        self.continent
    }
    fn year(&self) -> i32 {
        self.year
    }
    fn measure(&self) -> Option<f64> {
        self.ghg_total_mt
    }
    fn column(&self, name: &str) -> Option<Option<SortKey<'_>>> {
        Some(match name {
            "country" => text(&self.country),
            "iso" => self.iso.as_deref().map(SortKey::Text),
            "year" => Some(SortKey::Int(self.year.into())),
            "continent" => text(self.continent.label()),
            "co2_mt" => num(self.co2_mt),
            "ch4_mt" => num(self.ch4_mt),
            "n2o_mt" => num(self.n2o_mt),
            "ghg_total_mt" => num(self.ghg_total_mt),
            "population" => num(self.population),
            "gdp" => num(self.gdp),
            "source" => text(self.source.label()),
            _ => return None,
        })
    }
}

impl QueryRow for SectorRecord {
    fn country(&self) -> &str {
        &self.country
    }
    fn iso(&self) -> Option<&str> {
        self.iso.as_deref()
    }
    fn continent(&self) -> Continent {
        self.continent
    }
    fn year(&self) -> i32 {
        self.year
    }
    fn sector(&self) -> Option<Sector> {
        Some(self.sector)
    }
    fn gas(&self) -> Option<Gas> {
        Some(self.gas)
    }
    fn measure(&self) -> Option<f64> {
        Some(self.emission_value)
    }
    fn column(&self, name: &str) -> Option<Option<SortKey<'_>>> {
        Some(match name {
            "country" => text(&self.country),
            "iso" => self.iso.as_deref().map(SortKey::Text),
            "continent" => text(self.continent.label()),
            "year" => Some(SortKey::Int(self.year.into())),
            "sector" => text(self.sector.label()),
            "emission_value" => num(Some(self.emission_value)),
            "gas" => text(self.gas.label()),
            "source" => text(self.source.label()),
            _ => return None,
        })
    }
}

impl QueryRow for GasRecord {
    fn country(&self) -> &str {
        &self.country
    }
    fn iso(&self) -> Option<&str> {
        self.iso.as_deref()
    }
    fn continent(&self) -> Continent {
        self.continent
    }
    fn year(&self) -> i32 {
        self.year
    }
    fn gas(&self) -> Option<Gas> {
        Some(self.gas)
    }
    fn measure(&self) -> Option<f64> {
        Some(self.emission_value)
    }
    fn column(&self, name: &str) -> Option<Option<SortKey<'_>>> {
        Some(match name {
            "country" => text(&self.country),
            "iso" => self.iso.as_deref().map(SortKey::Text),
            "continent" => text(self.continent.label()),
            "year" => Some(SortKey::Int(self.year.into())),
            "gas" => text(self.gas.label()),
            "emission_value" => num(Some(self.emission_value)),
            "source" => text(self.source.label()),
            _ => return None,
        })
    }
}

impl ParsedQuery {
    fn matches<T: QueryRow>(&self, row: &T) -> bool {
        if let Some(country) = &self.country {
            if row.country().to_lowercase() != *country {
                return false;
            }
        }
        if let Some(iso) = &self.iso {
            if !row.iso().is_some_and(|v| v.eq_ignore_ascii_case(iso)) {
                return false;
            }
        }
        if self.continent.is_some_and(|c| c != row.continent()) {
            return false;
        }
        if self.year_min.is_some_and(|min| row.year() < min)
            || self.year_max.is_some_and(|max| row.year() > max)
        {
            return false;
        }
        if self.sector.is_some() && row.sector() != self.sector {
            return false;
        }
        if self.gas.is_some() && row.gas() != self.gas {
            return false;
        }
        if let Some(min) = self.min_emissions {
            if !row.measure().is_some_and(|v| v >= min) {
                return false;
            }
        }
        true
    }

    /// Stable sort on one column with nulls last in either direction. An
    /// unknown column leaves the order untouched.
    fn sort<T: QueryRow>(&self, rows: &mut [&T]) {
        if rows.first().is_some_and(|r| r.column(&self.sort_by).is_none()) {
            return;
        }
        rows.sort_by(|a, b| {
            let a = a.column(&self.sort_by).flatten();
            let b = b.column(&self.sort_by).flatten();
            match (a, b) {
                (Some(a), Some(b)) => {
                    let ord = a.compare(&b);
                    if self.sort_desc {
                        ord.reverse()
                    } else {
                        ord
                    }
                }
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        });
    }

    pub fn run<T: QueryRow>(&self, rows: &[T]) -> Page<T> {
        let mut matched: Vec<&T> = rows.iter().filter(|r| self.matches(*r)).collect();
        self.sort(&mut matched);
        Page {
            total_records: matched.len(),
            filters_applied: self.applied.clone(),
            data: matched
                .into_iter()
                .skip(self.offset)
                .take(self.limit)
                .cloned()
                .collect(),
        }
    }
}
