//! Read-mostly cache over the persisted pipeline artifacts.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use ghg_core::{EmissionRecord, GasRecord, InsightsSnapshot, SectorRecord};
use ghg_pipeline::artifacts;
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("emissions data not found at {}; run the pipeline first", path.display())]
    DataUnavailable { path: PathBuf },
    #[error("failed to load emissions data: {0:#}")]
    Load(anyhow::Error),
}

/// Where the service finds each artifact.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub emissions: PathBuf,
    pub sectors: PathBuf,
    pub gases: PathBuf,
    pub insights: PathBuf,
}

impl ArtifactPaths {
    pub fn in_dir(output_dir: &Path) -> Self {
        Self {
            emissions: output_dir.join(artifacts::EMISSIONS_CSV),
            sectors: output_dir.join(artifacts::SECTORS_CSV),
            gases: output_dir.join(artifacts::GASES_CSV),
            insights: output_dir.join(artifacts::INSIGHTS_JSON),
        }
    }
}

/// Everything the API reads, loaded together and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct DataSnapshot {
    pub emissions: Vec<EmissionRecord>,
    pub sectors: Vec<SectorRecord>,
    pub gases: Vec<GasRecord>,
    pub insights: Option<InsightsSnapshot>,
    pub loaded_at: DateTime<Utc>,
}

impl DataSnapshot {
    /// The merged table is required. Sector and gas tables default to empty
    /// and the insights snapshot to `None` when their files are absent. An
    /// insights snapshot that does not describe the merged table it sits next
    /// to is dropped.
    pub fn load(paths: &ArtifactPaths) -> Result<Self, ServiceError> {
        if !paths.emissions.is_file() {
            return Err(ServiceError::DataUnavailable {
                path: paths.emissions.clone(),
            });
        }
        let emissions = artifacts::read_csv(&paths.emissions).map_err(ServiceError::Load)?;
        let sectors = optional_csv(&paths.sectors)?;
        let gases = optional_csv(&paths.gases)?;
        let insights = if paths.insights.is_file() {
            match artifacts::read_insights(&paths.insights) {
                Ok(insights) => Some(insights),
                Err(err) => {
                    warn!(path = %paths.insights.display(), error = %format!("{err:#}"), "ignoring unreadable insights");
                    None
                }
            }
        } else {
            None
        };
        let insights = insights.filter(|insights| {
            let matches = describes(insights, &emissions);
            if !matches {
                warn!(
                    path = %paths.insights.display(),
                    insights_records = insights.total_records,
                    records = emissions.len(),
                    "insights snapshot is stale; ignoring"
                );
            }
            matches
        });
        Ok(Self {
            emissions,
            sectors,
            gases,
            insights,
            loaded_at: Utc::now(),
        })
    }
}

fn describes(insights: &InsightsSnapshot, emissions: &[EmissionRecord]) -> bool {
    insights.total_records == emissions.len()
        && Some(insights.latest_year) == emissions.iter().map(|r| r.year).max()
}

fn optional_csv<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, ServiceError> {
    if !path.is_file() {
        return Ok(Vec::new());
    }
    artifacts::read_csv(path).map_err(ServiceError::Load)
}

#[derive(Default)]
struct CacheState {
    snapshot: Option<Arc<DataSnapshot>>,
    loaded_at: Option<Instant>,
}

pub struct DataService {
    paths: ArtifactPaths,
    ttl: Duration,
    state: RwLock<CacheState>,
}

impl DataService {
    pub fn new(paths: ArtifactPaths, ttl: Duration) -> Self {
        Self {
            paths,
            ttl,
            state: RwLock::new(CacheState::default()),
        }
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    /// Current snapshot, reloading from disk when the cache marker is unset or
    /// older than the TTL. The lock is only held to read or swap the pointer.
    pub async fn snapshot(&self) -> Result<Arc<DataSnapshot>, ServiceError> {
        if let Some(snapshot) = self.fresh() {
            return Ok(snapshot);
        }

        let paths = self.paths.clone();
        let loaded = tokio::task::spawn_blocking(move || DataSnapshot::load(&paths))
            .await
            .map_err(|err| ServiceError::Load(anyhow::Error::new(err)))??;
        let snapshot = Arc::new(loaded);
        info!(
            records = snapshot.emissions.len(),
            sectors = snapshot.sectors.len(),
            gases = snapshot.gases.len(),
            "emissions data loaded"
        );

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.snapshot = Some(Arc::clone(&snapshot));
        state.loaded_at = Some(Instant::now());
        Ok(snapshot)
    }

    /// Forces the next read to reload. Readers keep the snapshot they hold.
    pub fn invalidate(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.loaded_at = None;
        info!("data cache invalidated");
    }

    /// Load time of the snapshot currently held, if any.
    pub fn last_loaded(&self) -> Option<DateTime<Utc>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.snapshot.as_ref().map(|s| s.loaded_at)
    }

    fn fresh(&self) -> Option<Arc<DataSnapshot>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match (&state.snapshot, state.loaded_at) {
            (Some(snapshot), Some(at)) if at.elapsed() < self.ttl => Some(Arc::clone(snapshot)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghg_core::Source;
    use ghg_pipeline::artifacts::csv_bytes;
    use ghg_pipeline::report::generate_insights;
    use tempfile::tempdir;

    fn write_emissions(dir: &Path, countries: &[&str]) -> Vec<EmissionRecord> {
        let rows: Vec<EmissionRecord> = countries
            .iter()
            .map(|c| {
                let mut r = EmissionRecord::new(*c, Some("FRA".into()), 2020, Source::Owid);
                r.ghg_total_mt = Some(400.0);
                r
            })
            .collect();
        std::fs::write(dir.join(artifacts::EMISSIONS_CSV), csv_bytes(&rows).unwrap()).unwrap();
        rows
    }

    fn write_insights(dir: &Path, rows: &[EmissionRecord]) {
        let insights = generate_insights(rows, Utc::now()).unwrap();
        std::fs::write(
            dir.join(artifacts::INSIGHTS_JSON),
            serde_json::to_vec(&insights).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn missing_merged_table_is_unavailable() {
        let dir = tempdir().unwrap();
        let service = DataService::new(ArtifactPaths::in_dir(dir.path()), DEFAULT_CACHE_TTL);
        let err = service.snapshot().await.unwrap_err();
        assert!(matches!(err, ServiceError::DataUnavailable { .. }));
        assert!(service.last_loaded().is_none());
    }

    #[tokio::test]
    async fn cached_until_invalidated() {
        let dir = tempdir().unwrap();
        write_emissions(dir.path(), &["France"]);
        let service = DataService::new(ArtifactPaths::in_dir(dir.path()), DEFAULT_CACHE_TTL);

        let first = service.snapshot().await.unwrap();
        assert_eq!(first.emissions.len(), 1);
        assert!(first.sectors.is_empty());
        assert!(first.insights.is_none());

        write_emissions(dir.path(), &["France", "France"]);
        assert_eq!(service.snapshot().await.unwrap().emissions.len(), 1);

        service.invalidate();
        let second = service.snapshot().await.unwrap();
        assert_eq!(second.emissions.len(), 2);
        // a reader holding the old snapshot still sees it
        assert_eq!(first.emissions.len(), 1);
    }

    #[tokio::test]
    async fn persisted_insights_load_only_when_they_match_the_table() {
        let dir = tempdir().unwrap();
        let rows = write_emissions(dir.path(), &["France", "France"]);
        write_insights(dir.path(), &rows);
        let service = DataService::new(ArtifactPaths::in_dir(dir.path()), Duration::ZERO);

        let snapshot = service.snapshot().await.unwrap();
        let insights = snapshot.insights.as_ref().expect("insights");
        assert_eq!(insights.total_records, 2);
        assert_eq!(insights.latest_year, 2020);

        // the table changed after the snapshot was written
        write_emissions(dir.path(), &["France", "France", "France"]);
        let snapshot = service.snapshot().await.unwrap();
        assert_eq!(snapshot.emissions.len(), 3);
        assert!(snapshot.insights.is_none());
    }

    #[tokio::test]
    async fn zero_ttl_reloads_every_read() {
        let dir = tempdir().unwrap();
        write_emissions(dir.path(), &["France"]);
        let service = DataService::new(ArtifactPaths::in_dir(dir.path()), Duration::ZERO);
        assert_eq!(service.snapshot().await.unwrap().emissions.len(), 1);
        write_emissions(dir.path(), &["France", "France", "France"]);
        assert_eq!(service.snapshot().await.unwrap().emissions.len(), 3);
    }
}
