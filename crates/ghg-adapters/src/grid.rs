//! Wide "one column per year" tables, as found in spreadsheet exports and in
//! some provider CSV downloads.
//!
//! A grid is a list of rows of loosely typed cells. [`detect_year_header`]
//! finds the row that labels the year columns; [`transpose_year_grid`] then
//! reshapes every (row, year column) cell into the matching gas column of a
//! country-year [`EmissionRecord`].

use std::collections::BTreeMap;

use ghg_core::{vocab, EmissionRecord, Gas, Source};

use crate::{
    accept_row, emission_amount, find_column, header_key, is_total_sector, looks_like_iso,
    parse_number, CleanError, YearWindow, COUNTRY_ALIASES, GAS_ALIASES, ISO_ALIASES,
    SECTOR_ALIASES,
};

/// Rows scanned from the top of a grid when looking for the year header.
pub const HEADER_SCAN_ROWS: usize = 10;

/// A header row needs strictly more year cells than this.
pub const MIN_YEAR_COLUMNS: usize = 5;

const HEADER_YEAR_MIN: i32 = 1990;
const HEADER_YEAR_MAX: i32 = 2030;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Number(f64),
    Text(String),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.trim().is_empty() {
            Cell::Empty
        } else {
            Cell::Text(value)
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Number(n) if n.fract() == 0.0 => Some(format!("{}", *n as i64)),
            Cell::Number(n) => Some(n.to_string()),
            Cell::Text(s) => Some(s.trim().to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Empty => None,
            Cell::Number(n) if n.is_finite() => Some(*n),
            Cell::Number(_) => None,
            Cell::Text(s) => parse_number(s),
        }
    }

    /// A header year: an integral number, a 4-digit string or a `Y_1990`
    /// style label, within the plausible reporting range.
    pub fn as_header_year(&self) -> Option<i32> {
        let year = match self {
            Cell::Number(n) if n.fract() == 0.0 => *n as i32,
            Cell::Text(s) => {
                let s = s.trim();
                let digits = s
                    .strip_prefix("Y_")
                    .or_else(|| s.strip_prefix("y_"))
                    .or_else(|| s.strip_prefix('Y'))
                    .or_else(|| s.strip_prefix('y'))
                    .unwrap_or(s);
                if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
                    return None;
                }
                digits.parse().ok()?
            }
            _ => return None,
        };
        (HEADER_YEAR_MIN..=HEADER_YEAR_MAX)
            .contains(&year)
            .then_some(year)
    }
}

/// Location of the year header inside a grid.
#[derive(Debug, Clone, PartialEq)]
pub struct YearHeader {
    pub row: usize,
    /// (column index, year) for every year cell of the header row.
    pub year_columns: Vec<(usize, i32)>,
    /// Normalized label of every column, empty for year and blank cells.
    pub labels: Vec<String>,
}

/// Scans the first [`HEADER_SCAN_ROWS`] rows for a row with more than
/// [`MIN_YEAR_COLUMNS`] year cells that also outnumber its other non-empty
/// cells.
pub fn detect_year_header(rows: &[Vec<Cell>]) -> Option<YearHeader> {
    rows.iter()
        .take(HEADER_SCAN_ROWS)
        .enumerate()
        .find_map(|(index, row)| {
            let mut year_columns = Vec::new();
            let mut labels = Vec::with_capacity(row.len());
            let mut other = 0usize;
            for (col, cell) in row.iter().enumerate() {
                if let Some(year) = cell.as_header_year() {
                    year_columns.push((col, year));
                    labels.push(String::new());
                } else if let Some(text) = cell.as_text() {
                    other += 1;
                    labels.push(header_key(&text));
                } else {
                    labels.push(String::new());
                }
            }
            (year_columns.len() > MIN_YEAR_COLUMNS && year_columns.len() > other).then(|| {
                YearHeader {
                    row: index,
                    year_columns,
                    labels,
                }
            })
        })
}

/// Everything a transposition needs besides the grid itself.
#[derive(Debug, Clone, Copy)]
pub struct GridContext {
    pub provider: Source,
    pub window: YearWindow,
    /// Gas for rows that carry no substance cell (e.g. derived from a sheet name).
    pub default_gas: Option<Gas>,
}

/// Reshapes a wide grid into country-year records.
///
/// Filled gap: year-column sheets used to be recognised by their header and
/// then dropped without output. This fills in the row extraction.
///
/// Rows whose sector column names a single sector are skipped so national
/// totals are not double counted. Rows whose gas is unmapped, or maps to a
/// gas without a record column, are skipped too.
pub fn transpose_year_grid(
    rows: &[Vec<Cell>],
    header: &YearHeader,
    ctx: GridContext,
) -> Result<Vec<EmissionRecord>, CleanError> {
    let country_col = find_column(&header.labels, COUNTRY_ALIASES);
    let iso_col = find_column(&header.labels, ISO_ALIASES);
    let gas_col = find_column(&header.labels, GAS_ALIASES);
    let sector_col = find_column(&header.labels, SECTOR_ALIASES);

    if country_col.is_none() && iso_col.is_none() {
        return Err(CleanError::Structure {
            provider: ctx.provider,
            detail: format!(
                "year header on row {} has no country or iso column",
                header.row + 1
            ),
        });
    }

    let mut acc = RecordAccumulator::new(ctx.provider);
    for row in rows.iter().skip(header.row + 1) {
        if !is_total_sector(cell_text(row, sector_col).as_deref()) {
            continue;
        }
        let gas = match cell_text(row, gas_col) {
            Some(label) => vocab::gas_from_label(&label),
            None => Some(ctx.default_gas.unwrap_or(Gas::GhgTotal)),
        };
        let Some(gas) = gas.filter(|g| *g != Gas::FGases) else {
            continue;
        };

        let country = cell_text(row, country_col);
        let iso = cell_text(row, iso_col).or_else(|| {
            country
                .as_deref()
                .filter(|c| looks_like_iso(c))
                .map(str::to_string)
        });
        let Some(country) = country.or_else(|| iso.clone()) else {
            continue;
        };

        for &(col, year) in &header.year_columns {
            let Some(identity) = accept_row(&country, iso.as_deref(), Some(year), ctx.window)
            else {
                continue;
            };
            let value = emission_amount(row.get(col).and_then(Cell::as_number));
            acc.add(identity.country, identity.iso, year, gas, value);
        }
    }
    Ok(acc.finish())
}

fn cell_text(row: &[Cell], col: Option<usize>) -> Option<String> {
    col.and_then(|c| row.get(c)).and_then(Cell::as_text)
}

/// Collects gas values cell by cell into one record per (iso, year). The first
/// non-null value seen for a gas column wins.
#[derive(Debug)]
pub struct RecordAccumulator {
    source: Source,
    records: BTreeMap<(String, i32), EmissionRecord>,
}

impl RecordAccumulator {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            records: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, country: String, iso: String, year: i32, gas: Gas, value: Option<f64>) {
        let source = self.source;
        let record = self
            .records
            .entry((iso.clone(), year))
            .or_insert_with(|| EmissionRecord::new(country, Some(iso), year, source));
        if record.gas_value(gas).is_none() {
            record.set_gas_value(gas, value);
        }
    }

    /// Records without any populated gas column are dropped.
    pub fn finish(self) -> Vec<EmissionRecord> {
        self.records
            .into_values()
            .filter(EmissionRecord::has_gas_data)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> Cell {
        Cell::text(s)
    }

    fn n(v: f64) -> Cell {
        Cell::Number(v)
    }

    fn header_row(first: &[&str], years: std::ops::RangeInclusive<i32>) -> Vec<Cell> {
        first
            .iter()
            .map(|s| t(s))
            .chain(years.map(|y| t(&format!("Y_{y}"))))
            .collect()
    }

    fn ctx() -> GridContext {
        GridContext {
            provider: Source::Edgar,
            window: YearWindow::new(1990, 2024),
            default_gas: None,
        }
    }

    #[test]
    fn header_year_spellings() {
        assert_eq!(n(1995.0).as_header_year(), Some(1995));
        assert_eq!(t("2001").as_header_year(), Some(2001));
        assert_eq!(t("Y_2010").as_header_year(), Some(2010));
        assert_eq!(t("1989").as_header_year(), None);
        assert_eq!(t("2031").as_header_year(), None);
        assert_eq!(n(2000.5).as_header_year(), None);
        assert_eq!(t("Name").as_header_year(), None);
    }

    #[test]
    fn header_is_found_below_title_rows() {
        let rows = vec![
            vec![t("EDGAR emissions by country")],
            vec![Cell::Empty],
            header_row(&["IPCC_annex", "Country_code_A3", "Name", "Substance"], 1990..=1997),
        ];
        let header = detect_year_header(&rows).expect("header row");
        assert_eq!(header.row, 2);
        assert_eq!(header.year_columns.len(), 8);
        assert_eq!(header.year_columns[0], (4, 1990));
        assert_eq!(header.labels[1], "country code a3");
    }

    #[test]
    fn header_requires_years_to_dominate() {
        // six years but seven labels
        let rows = vec![header_row(
            &["a", "b", "c", "d", "e", "f", "g"],
            2000..=2005,
        )];
        assert!(detect_year_header(&rows).is_none());

        // only five years
        let rows = vec![header_row(&["Name"], 2000..=2004)];
        assert!(detect_year_header(&rows).is_none());
    }

    #[test]
    fn header_beyond_scan_window_is_ignored() {
        let mut rows = vec![vec![t("note")]; HEADER_SCAN_ROWS];
        rows.push(header_row(&["Name"], 1990..=2000));
        assert!(detect_year_header(&rows).is_none());
    }

    #[test]
    fn transposes_cells_into_gas_columns() {
        let mut rows = vec![header_row(&["Country_code_A3", "Name", "Substance"], 1990..=1995)];
        let mut co2 = vec![t("FRA"), t("France"), t("CO2")];
        co2.extend((0..6).map(|i| n(400.0 + i as f64)));
        let mut ch4 = vec![t("FRA"), t("France"), t("CH4")];
        ch4.extend((0..6).map(|_| n(60.0)));
        let mut world = vec![t("WLD"), t("World"), t("CO2")];
        world.extend((0..6).map(|_| n(30000.0)));
        rows.extend([co2, ch4, world]);

        let header = detect_year_header(&rows).unwrap();
        let records = transpose_year_grid(&rows, &header, ctx()).unwrap();

        assert_eq!(records.len(), 6);
        let first = &records[0];
        assert_eq!(first.country, "France");
        assert_eq!(first.iso.as_deref(), Some("FRA"));
        assert_eq!(first.year, 1990);
        assert_eq!(first.co2_mt, Some(400.0));
        assert_eq!(first.ch4_mt, Some(60.0));
        assert_eq!(first.n2o_mt, None);
        assert_eq!(first.source, Source::Edgar);
        assert_eq!(records[5].co2_mt, Some(405.0));
    }

    #[test]
    fn default_gas_and_blank_cells() {
        let mut rows = vec![header_row(&["Name", "ISO"], 2015..=2020)];
        let mut de = vec![t("Germany"), t("DEU")];
        de.extend([n(800.0), Cell::Empty, t("n/a"), n(-1.0), n(790.0), n(780.0)]);
        rows.push(de);

        let header = detect_year_header(&rows).unwrap();
        let mut context = ctx();
        context.default_gas = Some(Gas::N2o);
        let records = transpose_year_grid(&rows, &header, context).unwrap();

        let years: Vec<i32> = records.iter().map(|r| r.year).collect();
        assert_eq!(years, vec![2015, 2019, 2020]);
        assert!(records.iter().all(|r| r.n2o_mt.is_some() && r.co2_mt.is_none()));
    }

    #[test]
    fn sector_rows_other_than_totals_are_skipped() {
        let mut rows = vec![header_row(&["Country", "Sector"], 2000..=2005)];
        let mut total = vec![t("JPN"), t("Total excluding LUCF")];
        total.extend((0..6).map(|_| n(1200.0)));
        let mut energy = vec![t("JPN"), t("Energy")];
        energy.extend((0..6).map(|_| n(900.0)));
        rows.extend([energy, total]);

        let header = detect_year_header(&rows).unwrap();
        let records = transpose_year_grid(&rows, &header, ctx()).unwrap();
        assert_eq!(records.len(), 6);
        assert!(records
            .iter()
            .all(|r| r.ghg_total_mt == Some(1200.0) && r.iso.as_deref() == Some("JPN")));
        assert!(records.iter().all(|r| r.country == "Japan"));
    }

    #[test]
    fn missing_identity_columns_is_structural() {
        let rows = vec![header_row(&["Substance"], 2000..=2006)];
        let header = detect_year_header(&rows).unwrap();
        let err = transpose_year_grid(&rows, &header, ctx()).unwrap_err();
        assert!(matches!(err, CleanError::Structure { .. }));
    }

    #[test]
    fn accumulator_keeps_first_value_and_drops_empty_records() {
        let mut acc = RecordAccumulator::new(Source::Unfccc);
        acc.add("Chile".into(), "CHL".into(), 2000, Gas::Co2, Some(50.0));
        acc.add("Chile".into(), "CHL".into(), 2000, Gas::Co2, Some(70.0));
        acc.add("Chile".into(), "CHL".into(), 2001, Gas::Co2, None);
        let records = acc.finish();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].co2_mt, Some(50.0));
        assert_eq!(records[0].continent, ghg_core::Continent::SouthAmerica);
    }
}
