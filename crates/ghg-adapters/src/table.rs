//! Climate Watch and UNFCCC exports. Both providers publish either a long
//! table (one row per country, year, gas and sector) or a wide table with one
//! column per year; the layout is recognized from the header.

use std::fs::File;
use std::path::Path;

use ghg_core::{vocab, EmissionRecord, Gas, Source};
use tracing::debug;

use crate::grid::{detect_year_header, transpose_year_grid, Cell, GridContext, RecordAccumulator};
use crate::{
    accept_row, emission_amount, find_column, header_key, io_error, is_total_sector,
    looks_like_iso, parse_number, parse_year, CleanError, SourceCleaner, YearWindow,
    COUNTRY_ALIASES, GAS_ALIASES, ISO_ALIASES, SECTOR_ALIASES, VALUE_ALIASES, YEAR_ALIASES,
};

#[derive(Debug, Clone)]
pub struct ProviderTableCleaner {
    source: Source,
    window: YearWindow,
}

impl ProviderTableCleaner {
    pub fn new(source: Source, window: YearWindow) -> Self {
        Self { source, window }
    }

    /// Cleans rows that were already split into fields; the first row is the header.
    pub fn clean_rows(&self, rows: &[Vec<String>]) -> Result<Vec<EmissionRecord>, CleanError> {
        let Some(first) = rows.first() else {
            return Err(self.structure("file is empty"));
        };
        let headers: Vec<String> = first.iter().map(|h| header_key(h)).collect();
        if find_column(&headers, YEAR_ALIASES).is_some() {
            debug!(source = %self.source, "long layout");
            return self.clean_long(&headers, &rows[1..]);
        }

        let grid: Vec<Vec<Cell>> = rows
            .iter()
            .map(|row| row.iter().map(|v| Cell::text(v.as_str())).collect())
            .collect();
        match detect_year_header(&grid) {
            Some(header) => {
                debug!(source = %self.source, header_row = header.row, "wide layout");
                transpose_year_grid(
                    &grid,
                    &header,
                    GridContext {
                        provider: self.source,
                        window: self.window,
                        default_gas: None,
                    },
                )
            }
            None => Err(self.structure("neither a year column nor a year header row")),
        }
    }

    fn clean_long(
        &self,
        headers: &[String],
        rows: &[Vec<String>],
    ) -> Result<Vec<EmissionRecord>, CleanError> {
        let country_col = find_column(headers, COUNTRY_ALIASES);
        let iso_col = find_column(headers, ISO_ALIASES);
        let year_col = find_column(headers, YEAR_ALIASES);
        let gas_col = find_column(headers, GAS_ALIASES);
        let sector_col = find_column(headers, SECTOR_ALIASES);
        let value_col = find_column(headers, VALUE_ALIASES);

        let mut missing = Vec::new();
        if country_col.is_none() && iso_col.is_none() {
            missing.push("country");
        }
        if value_col.is_none() {
            missing.push("value");
        }
        let (Some(year_col), Some(value_col), true) = (year_col, value_col, missing.is_empty())
        else {
            return Err(CleanError::MissingColumns {
                provider: self.source,
                columns: missing,
            });
        };

        let mut acc = RecordAccumulator::new(self.source);
        for row in rows {
            if !is_total_sector(field(row, sector_col).as_deref()) {
                continue;
            }
            let gas = match field(row, gas_col) {
                Some(label) => vocab::gas_from_label(&label),
                None => Some(Gas::GhgTotal),
            };
            let Some(gas) = gas.filter(|g| *g != Gas::FGases) else {
                continue;
            };
            let country = field(row, country_col);
            let iso = field(row, iso_col).or_else(|| country.clone().filter(|c| looks_like_iso(c)));
            let Some(country) = country.or_else(|| iso.clone()) else {
                continue;
            };
            let year = row.get(year_col).and_then(|v| parse_year(v));
            let Some(identity) = accept_row(&country, iso.as_deref(), year, self.window) else {
                continue;
            };
            let value = emission_amount(row.get(value_col).and_then(|v| parse_number(v)));
            acc.add(
                identity.country,
                identity.iso,
                year.unwrap_or_default(),
                gas,
                value,
            );
        }
        Ok(acc.finish())
    }

    fn structure(&self, detail: &str) -> CleanError {
        CleanError::Structure {
            provider: self.source,
            detail: detail.to_string(),
        }
    }
}

fn field(row: &[String], col: Option<usize>) -> Option<String> {
    col.and_then(|c| row.get(c))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl SourceCleaner for ProviderTableCleaner {
    fn source(&self) -> Source {
        self.source
    }

    fn clean(&self, path: &Path) -> Result<Vec<EmissionRecord>, CleanError> {
        let file = File::open(path).map_err(|e| io_error(path, e))?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file);
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect::<Vec<_>>());
        }
        self.clean_rows(&rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(text: &str) -> Vec<Vec<String>> {
        text.lines()
            .map(|line| line.split(',').map(str::to_string).collect())
            .collect()
    }

    fn cleaner(source: Source) -> ProviderTableCleaner {
        ProviderTableCleaner::new(source, YearWindow::new(1990, 2024))
    }

    #[test]
    fn long_layout_keeps_total_rows_only() {
        let input = rows(
            "Party,Code,Year,Gas,Category,Value\n\
             Brazil,BRA,2015,CO2,Total excluding LULUCF,460.5\n\
             Brazil,BRA,2015,CO2,Energy,410.0\n\
             Brazil,BRA,2015,Methane,Total excluding LULUCF,390.2\n\
             Brazil,BRA,2015,HFC,Total excluding LULUCF,12.0\n\
             Brazil,BRA,2015,Water vapour,Total excluding LULUCF,1.0\n\
             Brazil,BRA,1985,CO2,Total excluding LULUCF,200.0\n\
             Annex I,XAI,2015,CO2,Total excluding LULUCF,15000.0",
        );
        let records = cleaner(Source::Unfccc).clean_rows(&input).unwrap();
        assert_eq!(records.len(), 1);
        let br = &records[0];
        assert_eq!(br.year, 2015);
        assert_eq!(br.co2_mt, Some(460.5));
        assert_eq!(br.ch4_mt, Some(390.2));
        assert_eq!(br.ghg_total_mt, None);
        assert_eq!(br.source, Source::Unfccc);
    }

    #[test]
    fn long_layout_without_gas_column_is_ghg_total() {
        let input = rows(
            "country,year,emissions\n\
             KEN,2018,70.1\n\
             Kenya,2019,72.0",
        );
        let records = cleaner(Source::ClimateWatch).clean_rows(&input).unwrap();
        // "Kenya" has no iso column to fall back on
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].iso.as_deref(), Some("KEN"));
        assert_eq!(records[0].country, "Kenya");
        assert_eq!(records[0].ghg_total_mt, Some(70.1));
        assert_eq!(records[0].continent, ghg_core::Continent::Africa);
    }

    #[test]
    fn wide_layout_is_transposed() {
        let input = rows(
            "Country,Data source,Sector,Gas,Unit,2010,2011,2012,2013,2014,2015\n\
             MEX,CAIT,Total including LUCF,All GHG,MtCO2e,700,710,,730,740,750\n\
             MEX,CAIT,Agriculture,All GHG,MtCO2e,80,81,82,83,84,85\n\
             WORLD,CAIT,Total including LUCF,All GHG,MtCO2e,48000,48500,49000,49500,50000,50500",
        );
        let records = cleaner(Source::ClimateWatch).clean_rows(&input).unwrap();
        let years: Vec<i32> = records.iter().map(|r| r.year).collect();
        assert_eq!(years, vec![2010, 2011, 2013, 2014, 2015]);
        assert!(records
            .iter()
            .all(|r| r.iso.as_deref() == Some("MEX") && r.country == "Mexico"));
        assert_eq!(records[0].ghg_total_mt, Some(700.0));
        assert_eq!(records[0].continent, ghg_core::Continent::NorthAmerica);
    }

    #[test]
    fn unrecognized_layout_is_structural() {
        let input = rows("foo,bar\n1,2");
        let err = cleaner(Source::ClimateWatch).clean_rows(&input).unwrap_err();
        assert!(matches!(err, CleanError::Structure { .. }));

        let input = rows("year,note\n2020,hello");
        let err = cleaner(Source::Unfccc).clean_rows(&input).unwrap_err();
        assert!(matches!(err, CleanError::MissingColumns { .. }));

        let err = cleaner(Source::Unfccc).clean_rows(&[]).unwrap_err();
        assert!(matches!(err, CleanError::Structure { .. }));
    }

    #[test]
    fn reads_csv_files_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("climate_watch_historical.csv");
        std::fs::write(&path, "iso,country,year,gas,value\nARG,Argentina,2020,CO2,170.0\n").unwrap();
        let records = cleaner(Source::ClimateWatch).clean(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].country, "Argentina");
        assert_eq!(records[0].co2_mt, Some(170.0));
    }
}
