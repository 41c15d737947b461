use std::fs::File;
use std::path::Path;

use ghg_core::{EmissionRecord, Source};
use tracing::debug;

use crate::{
    accept_row, emission_amount, header_key, io_error, parse_number, parse_year, CleanError,
    SourceCleaner, YearWindow,
};

/// Our World in Data `owid-co2-data.csv`: already one row per country-year.
#[derive(Debug, Clone)]
pub struct OwidCsvCleaner {
    window: YearWindow,
}

impl OwidCsvCleaner {
    pub fn new(window: YearWindow) -> Self {
        Self { window }
    }
}

struct OwidColumns {
    country: usize,
    iso: usize,
    year: usize,
    co2: Option<usize>,
    ch4: Option<usize>,
    n2o: Option<usize>,
    ghg_total: Option<usize>,
    population: Option<usize>,
    gdp: Option<usize>,
}

impl OwidColumns {
    fn locate(headers: &csv::StringRecord) -> Result<Self, CleanError> {
        let keys: Vec<String> = headers.iter().map(header_key).collect();
        let find = |name: &str| keys.iter().position(|k| k == name);

        let mut missing = Vec::new();
        let mut required = |name: &'static str| {
            let found = find(name);
            if found.is_none() {
                missing.push(name);
            }
            found.unwrap_or_default()
        };
        let country = required("country");
        let iso = required("iso code");
        let year = required("year");
        if !missing.is_empty() {
            return Err(CleanError::MissingColumns {
                provider: Source::Owid,
                columns: missing,
            });
        }

        Ok(Self {
            country,
            iso,
            year,
            co2: find("co2"),
            ch4: find("methane"),
            n2o: find("nitrous oxide"),
            ghg_total: find("total ghg"),
            population: find("population"),
            gdp: find("gdp"),
        })
    }
}

impl SourceCleaner for OwidCsvCleaner {
    fn source(&self) -> Source {
        Source::Owid
    }

    fn clean(&self, path: &Path) -> Result<Vec<EmissionRecord>, CleanError> {
        let file = File::open(path).map_err(|e| io_error(path, e))?;
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
        let columns = OwidColumns::locate(reader.headers()?)?;

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for row in reader.records() {
            let row = row?;
            let field = |idx: Option<usize>| idx.and_then(|i| row.get(i)).and_then(parse_number);

            let Some(identity) = accept_row(
                row.get(columns.country).unwrap_or_default(),
                row.get(columns.iso),
                row.get(columns.year).and_then(parse_year),
                self.window,
            ) else {
                skipped += 1;
                continue;
            };
            let year = row.get(columns.year).and_then(parse_year).unwrap_or_default();

            let mut record = EmissionRecord::new(identity.country, Some(identity.iso), year, Source::Owid);
            record.co2_mt = emission_amount(field(columns.co2));
            record.ch4_mt = emission_amount(field(columns.ch4));
            record.n2o_mt = emission_amount(field(columns.n2o));
            record.ghg_total_mt = emission_amount(field(columns.ghg_total));
            record.population = field(columns.population);
            record.gdp = field(columns.gdp);
            records.push(record);
        }
        debug!(kept = records.len(), skipped, "owid rows filtered");
        Ok(records)
    }
}
