//! Core domain model for the emissions pipeline: canonical records, closed
//! vocabularies and the insights snapshot shared by the pipeline and the API.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod vocab;

pub const CRATE_NAME: &str = "ghg-core";

/// First reporting year kept by every cleaner.
pub const MIN_YEAR: i32 = 1990;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized {kind} label: {label:?}")]
pub struct ParseLabelError {
    pub kind: &'static str,
    pub label: String,
}

impl ParseLabelError {
    fn new(kind: &'static str, label: &str) -> Self {
        Self {
            kind,
            label: label.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Continent {
    Africa,
    Asia,
    Europe,
    #[serde(rename = "North America")]
    NorthAmerica,
    #[serde(rename = "South America")]
    SouthAmerica,
    Oceania,
    Unknown,
}

impl Continent {
    pub const ALL: [Continent; 7] = [
        Continent::Africa,
        Continent::Asia,
        Continent::Europe,
        Continent::NorthAmerica,
        Continent::SouthAmerica,
        Continent::Oceania,
        Continent::Unknown,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Continent::Africa => "Africa",
            Continent::Asia => "Asia",
            Continent::Europe => "Europe",
            Continent::NorthAmerica => "North America",
            Continent::SouthAmerica => "South America",
            Continent::Oceania => "Oceania",
            Continent::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Continent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Continent {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Continent::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseLabelError::new("continent", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Sector {
    Energy,
    Industry,
    Transport,
    Agriculture,
    Buildings,
    Waste,
    #[serde(rename = "Land Use")]
    LandUse,
}

impl Sector {
    /// Canonical sectors in apportionment order.
    pub const ALL: [Sector; 7] = [
        Sector::Energy,
        Sector::Industry,
        Sector::Transport,
        Sector::Agriculture,
        Sector::Buildings,
        Sector::Waste,
        Sector::LandUse,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Sector::Energy => "Energy",
            Sector::Industry => "Industry",
            Sector::Transport => "Transport",
            Sector::Agriculture => "Agriculture",
            Sector::Buildings => "Buildings",
            Sector::Waste => "Waste",
            Sector::LandUse => "Land Use",
        }
    }

    /// Fixed global share of total GHG emissions. Shares sum to 1.0.
    pub fn share(self) -> f64 {
        match self {
            Sector::Energy => 0.34,
            Sector::Industry => 0.21,
            Sector::Transport => 0.16,
            Sector::Agriculture => 0.11,
            Sector::Buildings => 0.06,
            Sector::Waste => 0.03,
            Sector::LandUse => 0.09,
        }
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Sector {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Sector::ALL
            .into_iter()
            .find(|sector| sector.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseLabelError::new("sector", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Gas {
    #[serde(rename = "CO2")]
    Co2,
    #[serde(rename = "CH4")]
    Ch4,
    #[serde(rename = "N2O")]
    N2o,
    #[serde(rename = "GHG Total")]
    GhgTotal,
    #[serde(rename = "F-gases")]
    FGases,
}

impl Gas {
    pub const ALL: [Gas; 5] = [Gas::Co2, Gas::Ch4, Gas::N2o, Gas::GhgTotal, Gas::FGases];

    /// Gases that have a column on [`EmissionRecord`], in column order.
    pub const COLUMNS: [Gas; 4] = [Gas::Co2, Gas::Ch4, Gas::N2o, Gas::GhgTotal];

    pub fn label(self) -> &'static str {
        match self {
            Gas::Co2 => "CO2",
            Gas::Ch4 => "CH4",
            Gas::N2o => "N2O",
            Gas::GhgTotal => "GHG Total",
            Gas::FGases => "F-gases",
        }
    }
}

impl fmt::Display for Gas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Gas {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Gas::ALL
            .into_iter()
            .find(|gas| gas.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseLabelError::new("gas", s))
    }
}

/// Upstream provider tag. Doubles as the deduplication priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "OWID")]
    Owid,
    #[serde(rename = "EDGAR")]
    Edgar,
    #[serde(rename = "Climate Watch")]
    ClimateWatch,
    #[serde(rename = "UNFCCC")]
    Unfccc,
}

impl Source {
    pub const ALL: [Source; 4] = [
        Source::Owid,
        Source::Edgar,
        Source::ClimateWatch,
        Source::Unfccc,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Source::Owid => "OWID",
            Source::Edgar => "EDGAR",
            Source::ClimateWatch => "Climate Watch",
            Source::Unfccc => "UNFCCC",
        }
    }

    /// Lower wins during deduplication.
    pub fn priority(self) -> u8 {
        match self {
            Source::Owid => 1,
            Source::Edgar => 2,
            Source::ClimateWatch => 3,
            Source::Unfccc => 4,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Source {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Source::ALL
            .into_iter()
            .find(|source| {
                source.label().eq_ignore_ascii_case(wanted)
                    || format!("{source:?}").eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| ParseLabelError::new("source", s))
    }
}

/// One country-year row of the merged dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionRecord {
    pub country: String,
    pub iso: Option<String>,
    pub year: i32,
    pub continent: Continent,
    pub co2_mt: Option<f64>,
    pub ch4_mt: Option<f64>,
    pub n2o_mt: Option<f64>,
    pub ghg_total_mt: Option<f64>,
    pub population: Option<f64>,
    pub gdp: Option<f64>,
    pub source: Source,
}

impl EmissionRecord {
    pub fn new(
        country: impl Into<String>,
        iso: Option<String>,
        year: i32,
        source: Source,
    ) -> Self {
        let continent = iso
            .as_deref()
            .map(vocab::continent_for_iso)
            .unwrap_or(Continent::Unknown);
        Self {
            country: country.into(),
            iso,
            year,
            continent,
            co2_mt: None,
            ch4_mt: None,
            n2o_mt: None,
            ghg_total_mt: None,
            population: None,
            gdp: None,
            source,
        }
    }

    /// Deduplication key.
    pub fn key(&self) -> (&str, i32) {
        (self.country.as_str(), self.year)
    }

    /// Value of a gas column; `F-gases` has no column and is always `None`.
    pub fn gas_value(&self, gas: Gas) -> Option<f64> {
        match gas {
            Gas::Co2 => self.co2_mt,
            Gas::Ch4 => self.ch4_mt,
            Gas::N2o => self.n2o_mt,
            Gas::GhgTotal => self.ghg_total_mt,
            Gas::FGases => None,
        }
    }

    /// Returns false when the gas has no column on this record.
    pub fn set_gas_value(&mut self, gas: Gas, value: Option<f64>) -> bool {
        let slot = match gas {
            Gas::Co2 => &mut self.co2_mt,
            Gas::Ch4 => &mut self.ch4_mt,
            Gas::N2o => &mut self.n2o_mt,
            Gas::GhgTotal => &mut self.ghg_total_mt,
            Gas::FGases => return false,
        };
        *slot = value;
        true
    }

    pub fn has_gas_data(&self) -> bool {
        Gas::COLUMNS.iter().any(|gas| self.gas_value(*gas).is_some())
    }
}

/// Total GHG apportioned to one canonical sector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorRecord {
    pub country: String,
    pub iso: Option<String>,
    pub continent: Continent,
    pub year: i32,
    pub sector: Sector,
    pub emission_value: f64,
    pub gas: Gas,
    pub source: Source,
}

/// One populated gas column of an [`EmissionRecord`], melted to a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasRecord {
    pub country: String,
    pub iso: Option<String>,
    pub continent: Continent,
    pub year: i32,
    pub gas: Gas,
    pub emission_value: f64,
    pub source: Source,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub total_records: usize,
    pub null_counts: BTreeMap<String, usize>,
    pub duplicate_count: usize,
    pub year_range: Option<(i32, i32)>,
    pub countries: usize,
    pub continents: BTreeMap<Continent, usize>,
    pub sources: BTreeMap<Source, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emission_stats: Option<EmissionStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopEmitter {
    pub country: String,
    pub iso: Option<String>,
    pub continent: Continent,
    pub ghg_total_mt: f64,
}

/// Percent changes of the aggregated global total. A trend whose baseline is
/// zero or missing is left out rather than reported as infinite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trends {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yoy_change_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decade_change_percent: Option<f64>,
}

/// Persisted summary of one pipeline run (`data_insights.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightsSnapshot {
    pub generated_at: DateTime<Utc>,
    pub latest_year: i32,
    pub total_countries: usize,
    pub total_records: usize,
    pub year_range: String,
    pub global_total_mt: Option<f64>,
    pub top_emitters: Vec<TopEmitter>,
    pub continent_breakdown: BTreeMap<Continent, f64>,
    pub trends: Trends,
    pub quality_report: QualityReport,
}

/// Insights for one requested year, computed on demand by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearInsights {
    pub year: i32,
    pub global_emissions_mt: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yoy_change_percent: Option<f64>,
    pub top_emitters: Vec<TopEmitter>,
    pub continent_breakdown: BTreeMap<Continent, f64>,
    pub sector_breakdown: Option<BTreeMap<Sector, f64>>,
    pub key_findings: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_shares_sum_to_one() {
        let total: f64 = Sector::ALL.iter().map(|s| s.share()).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn canonical_labels_round_trip_through_from_str() {
        for continent in Continent::ALL {
            assert_eq!(continent.label().parse::<Continent>().unwrap(), continent);
        }
        assert_eq!("land use".parse::<Sector>().unwrap(), Sector::LandUse);
        assert_eq!("ghg total".parse::<Gas>().unwrap(), Gas::GhgTotal);
        assert_eq!("ClimateWatch".parse::<Source>().unwrap(), Source::ClimateWatch);
        assert!("Atlantis".parse::<Continent>().is_err());
    }

    #[test]
    fn priorities_follow_declaration_order() {
        let priorities: Vec<u8> = Source::ALL.iter().map(|s| s.priority()).collect();
        assert_eq!(priorities, vec![1, 2, 3, 4]);
    }

    #[test]
    fn new_record_derives_continent_from_iso() {
        let rec = EmissionRecord::new("France", Some("FRA".into()), 2020, Source::Owid);
        assert_eq!(rec.continent, Continent::Europe);
        let rec = EmissionRecord::new("Nowhere", None, 2020, Source::Owid);
        assert_eq!(rec.continent, Continent::Unknown);
    }

    #[test]
    fn fgases_have_no_column() {
        let mut rec = EmissionRecord::new("France", Some("FRA".into()), 2020, Source::Owid);
        assert!(!rec.set_gas_value(Gas::FGases, Some(1.0)));
        assert!(!rec.has_gas_data());
        assert!(rec.set_gas_value(Gas::Ch4, Some(2.5)));
        assert_eq!(rec.gas_value(Gas::Ch4), Some(2.5));
        assert!(rec.has_gas_data());
    }

    #[test]
    fn trends_omit_missing_keys_in_json() {
        let json = serde_json::to_value(Trends {
            yoy_change_percent: None,
            decade_change_percent: Some(3.5),
        })
        .unwrap();
        assert!(json.get("yoy_change_percent").is_none());
        assert_eq!(json["decade_change_percent"], 3.5);
    }

    #[test]
    fn continent_keys_serialize_as_labels() {
        let mut map = BTreeMap::new();
        map.insert(Continent::NorthAmerica, 10.0);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"North America":10.0}"#);
    }
}
