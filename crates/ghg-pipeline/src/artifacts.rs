//! Persisted outputs of a run and the readers the API uses to load them.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{Float64Array, Int32Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Utc};
use ghg_core::{EmissionRecord, GasRecord, InsightsSnapshot, SectorRecord};
use ghg_storage::{ArtifactStore, StoredArtifact};
use parquet::arrow::ArrowWriter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

pub const EMISSIONS_CSV: &str = "final_emissions_dataset.csv";
pub const SECTORS_CSV: &str = "emissions_by_sector.csv";
pub const GASES_CSV: &str = "emissions_by_gas.csv";
pub const INSIGHTS_JSON: &str = "data_insights.json";
pub const PARQUET_SNAPSHOT: &str = "snapshots/final_emissions_dataset.parquet";
pub const MANIFEST_JSON: &str = "snapshots/manifest.json";

pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub schema_version: u32,
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub files: Vec<ManifestFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

impl ManifestFile {
    fn from_stored(name: &str, stored: &StoredArtifact) -> Self {
        Self {
            name: name.to_string(),
            path: stored.relative_path.display().to_string(),
            sha256: stored.content_hash.clone(),
            bytes: stored.byte_size as u64,
        }
    }
}

/// Everything one run persists.
#[derive(Debug, Clone, Copy)]
pub struct RunOutputs<'a> {
    pub emissions: &'a [EmissionRecord],
    pub sectors: &'a [SectorRecord],
    pub gases: &'a [GasRecord],
    pub insights: &'a InsightsSnapshot,
}

/// Writes every artifact (each one atomically) and then the manifest that
/// lists their hashes.
pub async fn write_run_outputs(
    store: &ArtifactStore,
    run_id: Uuid,
    outputs: RunOutputs<'_>,
) -> Result<ArtifactManifest> {
    let pending: Vec<(&str, &str, Vec<u8>)> = vec![
        ("emissions", EMISSIONS_CSV, csv_bytes(outputs.emissions)?),
        ("emissions_by_sector", SECTORS_CSV, csv_bytes(outputs.sectors)?),
        ("emissions_by_gas", GASES_CSV, csv_bytes(outputs.gases)?),
        (
            "insights",
            INSIGHTS_JSON,
            serde_json::to_vec_pretty(outputs.insights).context("serializing insights")?,
        ),
        (
            "emissions_snapshot",
            PARQUET_SNAPSHOT,
            emissions_parquet_bytes(outputs.emissions)?,
        ),
    ];

    let mut files = Vec::with_capacity(pending.len());
    for (name, relative_path, bytes) in pending {
        let stored = store.write_atomic(relative_path, &bytes).await?;
        info!(
            artifact = name,
            path = %stored.absolute_path.display(),
            bytes = stored.byte_size,
            "artifact written"
        );
        files.push(ManifestFile::from_stored(name, &stored));
    }

    let manifest = ArtifactManifest {
        schema_version: MANIFEST_SCHEMA_VERSION,
        run_id,
        generated_at: Utc::now(),
        files,
    };
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing artifact manifest")?;
    store.write_atomic(MANIFEST_JSON, &bytes).await?;
    Ok(manifest)
}

pub fn csv_bytes<T: Serialize>(rows: &[T]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row).context("serializing csv row")?;
    }
    writer.into_inner().context("flushing csv buffer")
}

pub fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    csv::Reader::from_reader(file)
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .with_context(|| format!("parsing {}", path.display()))
}

pub fn read_insights(path: &Path) -> Result<InsightsSnapshot> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

pub fn read_manifest(path: &Path) -> Result<ArtifactManifest> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Columnar copy of the merged table, same column order as the CSV.
pub fn emissions_parquet_bytes(records: &[EmissionRecord]) -> Result<Vec<u8>> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("country", DataType::Utf8, false),
        ArrowField::new("iso", DataType::Utf8, true),
        ArrowField::new("year", DataType::Int32, false),
        ArrowField::new("continent", DataType::Utf8, false),
        ArrowField::new("co2_mt", DataType::Float64, true),
        ArrowField::new("ch4_mt", DataType::Float64, true),
        ArrowField::new("n2o_mt", DataType::Float64, true),
        ArrowField::new("ghg_total_mt", DataType::Float64, true),
        ArrowField::new("population", DataType::Float64, true),
        ArrowField::new("gdp", DataType::Float64, true),
        ArrowField::new("source", DataType::Utf8, false),
    ]));

    let countries = StringArray::from(
        records
            .iter()
            .map(|r| Some(r.country.as_str()))
            .collect::<Vec<_>>(),
    );
    let isos = StringArray::from(records.iter().map(|r| r.iso.as_deref()).collect::<Vec<_>>());
    let years = Int32Array::from(records.iter().map(|r| r.year).collect::<Vec<_>>());
    let continents = StringArray::from(
        records
            .iter()
            .map(|r| Some(r.continent.label()))
            .collect::<Vec<_>>(),
    );
    let float_column = |f: fn(&EmissionRecord) -> Option<f64>| {
        Float64Array::from(records.iter().map(f).collect::<Vec<_>>())
    };
    let sources = StringArray::from(
        records
            .iter()
            .map(|r| Some(r.source.label()))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(countries),
            Arc::new(isos),
            Arc::new(years),
            Arc::new(continents),
            Arc::new(float_column(|r| r.co2_mt)),
            Arc::new(float_column(|r| r.ch4_mt)),
            Arc::new(float_column(|r| r.n2o_mt)),
            Arc::new(float_column(|r| r.ghg_total_mt)),
            Arc::new(float_column(|r| r.population)),
            Arc::new(float_column(|r| r.gdp)),
            Arc::new(sources),
        ],
    )
    .context("building emissions record batch")?;

    let mut writer = ArrowWriter::try_new(Vec::new(), batch.schema(), None)
        .context("opening parquet writer")?;
    writer.write(&batch).context("writing emissions record batch")?;
    writer.into_inner().context("closing parquet writer")
}
