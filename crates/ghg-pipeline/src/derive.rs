//! Sector and gas views derived from the merged table. Both are pure.

use ghg_core::{EmissionRecord, Gas, GasRecord, Sector, SectorRecord};

/// Apportions each row's total across the canonical sectors by fixed share.
/// Rows without a total contribute nothing.
pub fn sector_view(records: &[EmissionRecord]) -> Vec<SectorRecord> {
    records
        .iter()
        .filter_map(|r| r.ghg_total_mt.map(|total| (r, total)))
        .flat_map(|(r, total)| {
            Sector::ALL.into_iter().map(move |sector| SectorRecord {
                country: r.country.clone(),
                iso: r.iso.clone(),
                continent: r.continent,
                year: r.year,
                sector,
                emission_value: total * sector.share(),
                gas: Gas::GhgTotal,
                source: r.source,
            })
        })
        .collect()
}

/// One row per populated gas column, in column order.
pub fn gas_view(records: &[EmissionRecord]) -> Vec<GasRecord> {
    records
        .iter()
        .flat_map(|r| {
            Gas::COLUMNS.into_iter().filter_map(move |gas| {
                r.gas_value(gas).map(|value| GasRecord {
                    country: r.country.clone(),
                    iso: r.iso.clone(),
                    continent: r.continent,
                    year: r.year,
                    gas,
                    emission_value: value,
                    source: r.source,
                })
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghg_core::Source;

    fn sample() -> Vec<EmissionRecord> {
        let mut a = EmissionRecord::new("India", Some("IND".into()), 2019, Source::Owid);
        a.co2_mt = Some(2600.0);
        a.ch4_mt = Some(700.0);
        a.ghg_total_mt = Some(3400.0);
        let mut b = EmissionRecord::new("India", Some("IND".into()), 2020, Source::Owid);
        b.n2o_mt = Some(250.0);
        let c = EmissionRecord::new("Nauru", Some("NRU".into()), 2020, Source::Edgar);
        vec![a, b, c]
    }

    #[test]
    fn sector_values_sum_to_total() {
        let records = sample();
        let sectors = sector_view(&records);
        assert_eq!(sectors.len(), Sector::ALL.len());
        let sum: f64 = sectors.iter().map(|s| s.emission_value).sum();
        assert!((sum - 3400.0).abs() / 3400.0 < 1e-9);
        assert!(sectors.iter().all(|s| s.gas == Gas::GhgTotal && s.year == 2019));
        assert_eq!(sectors[0].sector, Sector::Energy);
        assert!((sectors[0].emission_value - 3400.0 * 0.34).abs() < 1e-9);
    }

    #[test]
    fn gas_rows_match_populated_columns() {
        let records = sample();
        let gases = gas_view(&records);
        let populated: usize = records
            .iter()
            .map(|r| Gas::COLUMNS.iter().filter(|g| r.gas_value(**g).is_some()).count())
            .sum();
        assert_eq!(gases.len(), populated);
        let order: Vec<Gas> = gases.iter().map(|g| g.gas).collect();
        assert_eq!(order, vec![Gas::Co2, Gas::Ch4, Gas::GhgTotal, Gas::N2o]);
    }

    #[test]
    fn builders_are_idempotent() {
        let records = sample();
        assert_eq!(sector_view(&records), sector_view(&records));
        assert_eq!(gas_view(&records), gas_view(&records));
    }
}
