use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use ghg_core::{vocab, EmissionRecord, Gas, Source};
use tracing::{debug, warn};

use crate::grid::{detect_year_header, transpose_year_grid, Cell, GridContext};
use crate::{CleanError, SourceCleaner, YearWindow};

/// Sheets shorter than this are cover pages or notes.
pub const MIN_SHEET_ROWS: usize = 5;

/// EDGAR country-level workbook. Each data sheet is a wide year grid with one
/// row per (country, substance); rows are transposed into country-year records.
///
/// Filled gap: earlier EDGAR handling stopped after detecting the year header
/// and emitted no rows. The transposition in [`transpose_year_grid`] completes
/// that extraction.
#[derive(Debug, Clone)]
pub struct EdgarWorkbookCleaner {
    window: YearWindow,
}

/// One worksheet's cells, detached from the workbook reader.
#[derive(Debug, Clone)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<Cell>>,
}

impl EdgarWorkbookCleaner {
    pub fn new(window: YearWindow) -> Self {
        Self { window }
    }

    /// Cleans already loaded sheets. Sheets without a year header are skipped;
    /// records for the same (iso, year) from different sheets are combined.
    pub fn clean_sheets(&self, sheets: &[Sheet]) -> Vec<EmissionRecord> {
        let mut combined: BTreeMap<(Option<String>, i32), EmissionRecord> = BTreeMap::new();
        for sheet in sheets {
            if sheet.rows.len() < MIN_SHEET_ROWS {
                debug!(sheet = %sheet.name, rows = sheet.rows.len(), "skipping short sheet");
                continue;
            }
            let Some(header) = detect_year_header(&sheet.rows) else {
                debug!(sheet = %sheet.name, "no year header; skipping sheet");
                continue;
            };
            let ctx = GridContext {
                provider: Source::Edgar,
                window: self.window,
                default_gas: gas_from_sheet_name(&sheet.name),
            };
            match transpose_year_grid(&sheet.rows, &header, ctx) {
                Ok(records) => {
                    debug!(sheet = %sheet.name, rows = records.len(), "sheet transposed");
                    merge_into(&mut combined, records);
                }
                Err(err) => warn!(sheet = %sheet.name, error = %err, "sheet skipped"),
            }
        }
        combined.into_values().collect()
    }
}

impl SourceCleaner for EdgarWorkbookCleaner {
    fn source(&self) -> Source {
        Source::Edgar
    }

    fn clean(&self, path: &Path) -> Result<Vec<EmissionRecord>, CleanError> {
        let mut workbook = open_workbook_auto(path)?;
        let mut sheets = Vec::new();
        for name in workbook.sheet_names() {
            let range = workbook.worksheet_range(&name)?;
            let rows = range
                .rows()
                .map(|row| row.iter().map(cell_from_data).collect())
                .collect();
            sheets.push(Sheet { name, rows });
        }
        Ok(self.clean_sheets(&sheets))
    }
}

fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Empty,
        Data::Int(v) => Cell::Number(*v as f64),
        Data::Float(v) => Cell::Number(*v),
        Data::String(s) => Cell::text(s.as_str()),
        other => Cell::text(other.to_string()),
    }
}

/// First token of the sheet name that names a gas, e.g. `CO2_fossil` or
/// `GHG_totals_by_country`.
pub fn gas_from_sheet_name(name: &str) -> Option<Gas> {
    vocab::gas_from_label(name).or_else(|| {
        name.split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|token| !token.is_empty())
            .find_map(vocab::gas_from_label)
    })
}

/// Folds `incoming` into `combined`, filling gas columns that are still empty
/// on an existing (iso, year) record.
fn merge_into(
    combined: &mut BTreeMap<(Option<String>, i32), EmissionRecord>,
    incoming: Vec<EmissionRecord>,
) {
    for record in incoming {
        match combined.entry((record.iso.clone(), record.year)) {
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                for gas in Gas::COLUMNS {
                    if existing.gas_value(gas).is_none() {
                        existing.set_gas_value(gas, record.gas_value(gas));
                    }
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn t(s: &str) -> Cell {
        Cell::text(s)
    }

    fn sheet(name: &str, country_rows: &[(&str, &str, f64)]) -> Sheet {
        let mut rows = vec![
            vec![t("Emissions Database for Global Atmospheric Research")],
            vec![Cell::Empty],
        ];
        let mut header = vec![t("Country_code_A3"), t("Name")];
        header.extend((1990..=1996).map(|y| Cell::Number(y as f64)));
        rows.push(header);
        for (iso, name, base) in country_rows {
            let mut row = vec![t(iso), t(name)];
            row.extend((0..7).map(|i| Cell::Number(base + i as f64)));
            rows.push(row);
        }
        Sheet {
            name: name.to_string(),
            rows,
        }
    }

    #[test]
    fn sheet_names_supply_the_gas() {
        assert_eq!(gas_from_sheet_name("CO2_fossil"), Some(Gas::Co2));
        assert_eq!(gas_from_sheet_name("GHG_totals_by_country"), Some(Gas::GhgTotal));
        assert_eq!(gas_from_sheet_name("N2O"), Some(Gas::N2o));
        assert_eq!(gas_from_sheet_name("info"), None);
    }

    #[test]
    fn sheets_combine_into_country_year_records() {
        let cleaner = EdgarWorkbookCleaner::new(YearWindow::new(1990, 2024));
        let sheets = vec![
            sheet("info", &[]),
            sheet("CO2_by_country", &[("IND", "India", 600.0), ("CHN", "China", 2400.0)]),
            sheet("CH4", &[("IND", "India", 500.0), ("EU27", "EU27", 400.0)]),
        ];
        let records = cleaner.clean_sheets(&sheets);

        assert_eq!(records.len(), 14);
        let india_1990 = records
            .iter()
            .find(|r| r.iso.as_deref() == Some("IND") && r.year == 1990)
            .expect("India 1990");
        assert_eq!(india_1990.co2_mt, Some(600.0));
        assert_eq!(india_1990.ch4_mt, Some(500.0));
        assert_eq!(india_1990.source, Source::Edgar);

        let china_1996 = records
            .iter()
            .find(|r| r.iso.as_deref() == Some("CHN") && r.year == 1996)
            .expect("China 1996");
        assert_eq!(china_1996.co2_mt, Some(2406.0));
        assert_eq!(china_1996.ch4_mt, None);
        assert!(records.windows(2).all(|w| (&w[0].iso, w[0].year) <= (&w[1].iso, w[1].year)));
    }

    #[test]
    fn first_sheet_wins_for_the_same_gas() {
        let cleaner = EdgarWorkbookCleaner::new(YearWindow::new(1990, 2024));
        let sheets = vec![
            sheet("CO2_fossil", &[("BRA", "Brazil", 400.0)]),
            sheet("CO2_revised", &[("BRA", "Brazil", 900.0)]),
        ];
        let records = cleaner.clean_sheets(&sheets);
        assert_eq!(records.len(), 7);
        assert!(records.iter().all(|r| r.co2_mt.is_some_and(|v| v < 900.0)));
    }

    #[test]
    fn sheets_without_year_header_yield_nothing() {
        let cleaner = EdgarWorkbookCleaner::new(YearWindow::new(1990, 2024));
        let rows = vec![vec![t("Name"), t("Value")]; 8];
        let sheets = vec![Sheet {
            name: "CO2".into(),
            rows,
        }];
        assert!(cleaner.clean_sheets(&sheets).is_empty());
    }

    #[test]
    fn non_workbook_file_fails_and_boundary_returns_empty() {
        let mut file = tempfile::Builder::new()
            .suffix(".xlsx")
            .tempfile()
            .expect("temp file");
        file.write_all(b"this is not a zip archive").expect("write");

        let cleaner = EdgarWorkbookCleaner::new(YearWindow::default());
        assert!(cleaner.clean(file.path()).is_err());
        assert!(crate::clean_or_empty(&cleaner, file.path()).is_empty());
    }
}
