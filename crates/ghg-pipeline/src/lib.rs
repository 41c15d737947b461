//! Pipeline orchestration: download → clean → merge → derive → report →
//! persist.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ghg_adapters::{clean_or_empty, cleaner_for, YearWindow};
use ghg_core::EmissionRecord;
use ghg_storage::{ArtifactStore, HttpFetcher};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod artifacts;
pub mod config;
pub mod derive;
pub mod download;
pub mod merge;
pub mod registry;
pub mod report;

pub use artifacts::ArtifactManifest;
pub use config::{PipelineConfig, RunOptions};
pub use download::DownloadOutcome;
pub use merge::MergeError;
pub use registry::{SourceEntry, SourceRegistry};

pub const CRATE_NAME: &str = "ghg-pipeline";

/// Rows contributed by one registry entry.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRows {
    pub id: String,
    pub files: usize,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub downloads: Option<DownloadOutcome>,
    pub sources: Vec<SourceRows>,
    pub merged_records: usize,
    pub sector_records: usize,
    pub gas_records: usize,
    pub countries: usize,
    pub year_range: Option<(i32, i32)>,
    pub output_dir: String,
    pub manifest: Option<ArtifactManifest>,
}

pub struct Pipeline {
    config: PipelineConfig,
    http: HttpFetcher,
    window: YearWindow,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let http = HttpFetcher::new(config.http_client_config())?;
        Ok(Self {
            config,
            http,
            window: YearWindow::through_current_year(),
        })
    }

    pub fn with_year_window(mut self, window: YearWindow) -> Self {
        self.window = window;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run_once(&self, options: RunOptions) -> Result<PipelineSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", %run_id);
        self.run_inner(run_id, started_at, options)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        options: RunOptions,
    ) -> Result<PipelineSummary> {
        info!(
            data_dir = %self.config.data_dir.display(),
            output_dir = %self.config.output_dir.display(),
            window = %self.window,
            "pipeline starting"
        );
        let registry = SourceRegistry::load(&self.config.sources_file).await?;
        let raw_store = ArtifactStore::new(self.config.data_dir.clone());
        tokio::fs::create_dir_all(&self.config.data_dir)
            .await
            .with_context(|| format!("creating {}", self.config.data_dir.display()))?;

        let downloads = if options.skip_download {
            None
        } else {
            Some(download::download_all(&self.http, &raw_store, &registry, options.force).await)
        };
        if options.download_only {
            info!("download-only run; skipping processing");
            return Ok(self.summary(run_id, started_at, downloads, Vec::new(), None));
        }

        let (tables, sources) = self.clean_sources(&registry);
        let merged = merge::merge_sources(tables)?;
        let sectors = derive::sector_view(&merged);
        let gases = derive::gas_view(&merged);
        let insights = report::generate_insights(&merged, Utc::now())
            .context("merged table produced no insights")?;

        let output_store = ArtifactStore::new(self.config.output_dir.clone());
        let manifest = artifacts::write_run_outputs(
            &output_store,
            run_id,
            artifacts::RunOutputs {
                emissions: &merged,
                sectors: &sectors,
                gases: &gases,
                insights: &insights,
            },
        )
        .await
        .context("writing run outputs")?;

        let mut summary = self.summary(run_id, started_at, downloads, sources, Some(manifest));
        summary.merged_records = merged.len();
        summary.sector_records = sectors.len();
        summary.gas_records = gases.len();
        summary.countries = insights.total_countries;
        summary.year_range = insights.quality_report.year_range;

        info!(
            records = summary.merged_records,
            countries = summary.countries,
            year_range = %insights.year_range,
            "pipeline complete"
        );
        for (rank, emitter) in insights.top_emitters.iter().take(5).enumerate() {
            info!(
                rank = rank + 1,
                country = %emitter.country,
                ghg_total_mt = %report::thousands(emitter.ghg_total_mt, 1),
                "top emitter, latest year"
            );
        }
        Ok(summary)
    }

    fn clean_sources(&self, registry: &SourceRegistry) -> (Vec<Vec<EmissionRecord>>, Vec<SourceRows>) {
        let mut tables = Vec::new();
        let mut rows = Vec::new();
        for entry in registry.enabled() {
            let Some((source, format)) = entry.cleaning() else {
                continue;
            };
            let files = entry.resolve_files(&self.config.data_dir);
            if files.is_empty() {
                warn!(source = %entry.id, filename = %entry.filename, "no raw file found; source skipped");
            }
            let cleaner = cleaner_for(format, source, self.window);
            let mut count = 0usize;
            for path in &files {
                let table = clean_or_empty(cleaner.as_ref(), path);
                count += table.len();
                if !table.is_empty() {
                    tables.push(table);
                }
            }
            rows.push(SourceRows {
                id: entry.id.clone(),
                files: files.len(),
                rows: count,
            });
        }
        (tables, rows)
    }

    fn summary(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        downloads: Option<DownloadOutcome>,
        sources: Vec<SourceRows>,
        manifest: Option<ArtifactManifest>,
    ) -> PipelineSummary {
        PipelineSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            downloads,
            sources,
            merged_records: 0,
            sector_records: 0,
            gas_records: 0,
            countries: 0,
            year_range: None,
            output_dir: self.config.output_dir.display().to_string(),
            manifest,
        }
    }
}

pub async fn run_once_from_env(options: RunOptions) -> Result<PipelineSummary> {
    Pipeline::new(PipelineConfig::from_env())?.run_once(options).await
}

/// Reads the persisted insights snapshot of the last successful run.
pub fn load_insights(output_dir: &std::path::Path) -> Result<ghg_core::InsightsSnapshot> {
    artifacts::read_insights(&output_dir.join(artifacts::INSIGHTS_JSON))
}

/// Human-readable report of a persisted run, printed by `ghg-cli summary`.
pub fn summary_markdown(output_dir: Option<PathBuf>) -> Result<String> {
    let output_dir = output_dir.unwrap_or_else(|| PipelineConfig::from_env().output_dir);
    let insights = load_insights(&output_dir)?;

    let mut out = String::new();
    out.push_str("# Global Emissions Summary\n\n");
    out.push_str(&format!("- Generated: {}\n", insights.generated_at.to_rfc3339()));
    out.push_str(&format!("- Records: {}\n", insights.total_records));
    out.push_str(&format!("- Countries: {}\n", insights.total_countries));
    out.push_str(&format!("- Years: {}\n", insights.year_range));
    match insights.global_total_mt {
        Some(total) => out.push_str(&format!(
            "- Global total {}: {} Mt CO2e\n",
            insights.latest_year,
            report::thousands(total, 1)
        )),
        None => out.push_str(&format!("- Global total {}: n/a\n", insights.latest_year)),
    }
    if let Some(yoy) = insights.trends.yoy_change_percent {
        out.push_str(&format!("- Year-over-year: {yoy:+.1}%\n"));
    }
    if let Some(decade) = insights.trends.decade_change_percent {
        out.push_str(&format!("- Ten-year change: {decade:+.1}%\n"));
    }

    out.push_str("\n## Top Emitters\n");
    for (rank, emitter) in insights.top_emitters.iter().enumerate() {
        out.push_str(&format!(
            "{}. {}: {} Mt CO2e\n",
            rank + 1,
            emitter.country,
            report::thousands(emitter.ghg_total_mt, 1)
        ));
    }

    let sources: BTreeMap<String, usize> = insights
        .quality_report
        .sources
        .iter()
        .map(|(source, count)| (source.to_string(), *count))
        .collect();
    out.push_str("\n## Rows by Source\n");
    for (source, count) in sources {
        out.push_str(&format!("- {source}: {count}\n"));
    }
    Ok(out)
}
