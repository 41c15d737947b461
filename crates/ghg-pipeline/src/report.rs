//! Quality report and insights over the merged table.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use ghg_core::{
    Continent, EmissionRecord, EmissionStats, InsightsSnapshot, QualityReport, Sector,
    SectorRecord, TopEmitter, Trends, YearInsights,
};
use tracing::warn;

pub const TOP_EMITTERS: usize = 10;

/// Aggregated years needed before a decade trend is reported.
pub const DECADE_YEARS: usize = 10;

const COLUMNS: [&str; 11] = [
    "country",
    "iso",
    "year",
    "continent",
    "co2_mt",
    "ch4_mt",
    "n2o_mt",
    "ghg_total_mt",
    "population",
    "gdp",
    "source",
];

pub fn quality_report(records: &[EmissionRecord]) -> QualityReport {
    let mut null_counts: BTreeMap<String, usize> =
        COLUMNS.iter().map(|c| (c.to_string(), 0)).collect();
    let mut bump = |column: &str, is_null: bool| {
        if is_null {
            if let Some(count) = null_counts.get_mut(column) {
                *count += 1;
            }
        }
    };

    let mut seen = HashSet::with_capacity(records.len());
    let mut duplicate_count = 0usize;
    let mut continents = BTreeMap::new();
    let mut sources = BTreeMap::new();
    let mut countries = BTreeSet::new();
    let mut totals = Vec::new();

    for r in records {
        bump("country", r.country.trim().is_empty());
        bump("iso", r.iso.as_deref().map_or(true, |iso| iso.trim().is_empty()));
        bump("co2_mt", r.co2_mt.is_none());
        bump("ch4_mt", r.ch4_mt.is_none());
        bump("n2o_mt", r.n2o_mt.is_none());
        bump("ghg_total_mt", r.ghg_total_mt.is_none());
        bump("population", r.population.is_none());
        bump("gdp", r.gdp.is_none());

        if !seen.insert(r.key()) {
            duplicate_count += 1;
        }
        *continents.entry(r.continent).or_insert(0) += 1;
        *sources.entry(r.source).or_insert(0) += 1;
        countries.insert(r.country.as_str());
        totals.extend(r.ghg_total_mt);
    }

    if duplicate_count > 0 {
        warn!(duplicate_count, "duplicate (country, year) keys in merged table");
    }

    let year_range = records
        .iter()
        .map(|r| r.year)
        .min()
        .zip(records.iter().map(|r| r.year).max());

    QualityReport {
        total_records: records.len(),
        null_counts,
        duplicate_count,
        year_range,
        countries: countries.len(),
        continents,
        sources,
        emission_stats: emission_stats(totals),
    }
}

fn emission_stats(mut values: Vec<f64>) -> Option<EmissionStats> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = values.len();
    let median = if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    };
    Some(EmissionStats {
        min: values[0],
        max: values[n - 1],
        mean: values.iter().sum::<f64>() / n as f64,
        median,
    })
}

/// Sum of non-null totals per year, for years with at least one value.
pub fn yearly_totals(records: &[EmissionRecord]) -> BTreeMap<i32, f64> {
    let mut totals = BTreeMap::new();
    for r in records {
        if let Some(v) = r.ghg_total_mt {
            *totals.entry(r.year).or_insert(0.0) += v;
        }
    }
    totals
}

/// Percent change from `base` to `current`; `None` for a zero base.
pub fn percent_change(base: f64, current: f64) -> Option<f64> {
    (base != 0.0).then(|| (current - base) / base * 100.0)
}

fn top_emitters(rows: &[&EmissionRecord]) -> Vec<TopEmitter> {
    let mut with_total: Vec<(&EmissionRecord, f64)> = rows
        .iter()
        .filter_map(|r| r.ghg_total_mt.map(|v| (*r, v)))
        .collect();
    with_total.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    with_total
        .into_iter()
        .take(TOP_EMITTERS)
        .map(|(r, total)| TopEmitter {
            country: r.country.clone(),
            iso: r.iso.clone(),
            continent: r.continent,
            ghg_total_mt: total,
        })
        .collect()
}

fn continent_breakdown(rows: &[&EmissionRecord]) -> BTreeMap<Continent, f64> {
    let mut out = BTreeMap::new();
    for r in rows {
        if let Some(v) = r.ghg_total_mt {
            *out.entry(r.continent).or_insert(0.0) += v;
        }
    }
    out
}

/// Trends ending at `latest_year`. Both are omitted when that year has no
/// aggregated total; YoY also when `latest_year - 1` has none or sums to zero.
fn trends(yearly: &BTreeMap<i32, f64>, latest_year: i32) -> Trends {
    let Some(&current) = yearly.get(&latest_year) else {
        return Trends {
            yoy_change_percent: None,
            decade_change_percent: None,
        };
    };
    let yoy_change_percent = yearly
        .get(&(latest_year - 1))
        .and_then(|&prev| percent_change(prev, current));
    let series: Vec<f64> = yearly.range(..=latest_year).map(|(_, v)| *v).collect();
    let decade_change_percent = if series.len() >= DECADE_YEARS {
        percent_change(series[series.len() - DECADE_YEARS], current)
    } else {
        None
    };
    Trends {
        yoy_change_percent,
        decade_change_percent,
    }
}

/// Snapshot persisted as `data_insights.json`. `None` for an empty table.
pub fn generate_insights(
    records: &[EmissionRecord],
    generated_at: DateTime<Utc>,
) -> Option<InsightsSnapshot> {
    let latest_year = records.iter().map(|r| r.year).max()?;
    let min_year = records.iter().map(|r| r.year).min()?;
    let latest: Vec<&EmissionRecord> = records.iter().filter(|r| r.year == latest_year).collect();

    let latest_totals: Vec<f64> = latest.iter().filter_map(|r| r.ghg_total_mt).collect();
    let global_total_mt: Option<f64> = (!latest_totals.is_empty()).then(|| latest_totals.iter().sum());
    let countries: HashSet<&str> = records.iter().map(|r| r.country.as_str()).collect();

    Some(InsightsSnapshot {
        generated_at,
        latest_year,
        total_countries: countries.len(),
        total_records: records.len(),
        year_range: format!("{min_year} - {latest_year}"),
        global_total_mt,
        top_emitters: top_emitters(&latest),
        continent_breakdown: continent_breakdown(&latest),
        trends: trends(&yearly_totals(records), latest_year),
        quality_report: quality_report(records),
    })
}

/// Insights for `year`, or `None` when the merged table has no rows for it.
pub fn year_insights(
    records: &[EmissionRecord],
    sectors: &[SectorRecord],
    year: i32,
    generated_at: DateTime<Utc>,
) -> Option<YearInsights> {
    let rows: Vec<&EmissionRecord> = records.iter().filter(|r| r.year == year).collect();
    if rows.is_empty() {
        return None;
    }

    let global: f64 = rows.iter().filter_map(|r| r.ghg_total_mt).sum();
    let previous: Option<f64> = records
        .iter()
        .filter(|r| r.year == year - 1)
        .filter_map(|r| r.ghg_total_mt)
        .fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v));
    let yoy_change_percent = previous.and_then(|prev| percent_change(prev, global));

    let top = top_emitters(&rows);
    let continents = continent_breakdown(&rows);

    let mut sector_totals: BTreeMap<Sector, f64> = BTreeMap::new();
    for s in sectors.iter().filter(|s| s.year == year) {
        *sector_totals.entry(s.sector).or_insert(0.0) += s.emission_value;
    }
    let sector_breakdown = (!sector_totals.is_empty()).then_some(sector_totals);

    let countries: HashSet<&str> = rows.iter().map(|r| r.country.as_str()).collect();

    let mut key_findings = vec![format!(
        "Global GHG emissions in {year}: {} Mt CO2e",
        thousands(global, 1)
    )];
    if let Some(yoy) = yoy_change_percent {
        key_findings.push(format!("Year-over-year change: {yoy:+.1}%"));
    }
    if let Some(first) = top.first() {
        if global > 0.0 {
            key_findings.push(format!(
                "Top emitter ({}): {:.1}% of global emissions",
                first.country,
                first.ghg_total_mt / global * 100.0
            ));
        }
    }
    key_findings.push(format!("Countries reporting: {}", countries.len()));
    if let Some((continent, _)) = continents
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))
    {
        key_findings.push(format!("Highest emitting region: {continent}"));
    }

    Some(YearInsights {
        year,
        global_emissions_mt: global,
        yoy_change_percent,
        top_emitters: top,
        continent_breakdown: continents,
        sector_breakdown,
        key_findings,
        generated_at,
    })
}

/// `1234567.891` with one decimal becomes `1,234,567.9`.
pub fn thousands(value: f64, decimals: usize) -> String {
    let formatted = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (formatted.as_str(), None),
    };
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if value < 0.0 { "-" } else { "" };
    match frac_part {
        Some(f) => format!("{sign}{grouped}.{f}"),
        None => format!("{sign}{grouped}"),
    }
}
