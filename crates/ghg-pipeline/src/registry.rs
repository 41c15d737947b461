//! `sources.yaml`: which raw files exist, where they come from and which
//! cleaner reads them.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ghg_adapters::SourceFormat;
use ghg_core::Source;
use serde::Deserialize;
use tokio::fs;
use tracing::info;

const BUILTIN_REGISTRY: &str = include_str!("../../../sources.yaml");

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    pub id: String,
    pub display_name: String,
    /// Provider tag; entries without one are reference downloads only.
    #[serde(default)]
    pub source: Option<Source>,
    #[serde(default)]
    pub format: Option<SourceFormat>,
    #[serde(default)]
    pub url: Option<String>,
    /// File name under the data directory. A single `*` matches any run of
    /// characters (local-only entries such as `EDGAR*.xlsx`).
    pub filename: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

impl SourceRegistry {
    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN_REGISTRY).context("parsing built-in source registry")
    }

    pub fn parse(text: &str) -> Result<Self> {
        let registry: Self = serde_yaml::from_str(text)?;
        registry.validate()?;
        Ok(registry)
    }

    /// Reads `path`, or falls back to the built-in registry when it is absent.
    pub async fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path).await {
            Ok(text) => Self::parse(&text).with_context(|| format!("parsing {}", path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no source registry file; using built-in sources");
                Self::builtin()
            }
            Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceEntry> {
        self.sources.iter().filter(|s| s.enabled)
    }

    fn validate(&self) -> Result<()> {
        for entry in &self.sources {
            if entry.url.is_some() && entry.filename.contains('*') {
                bail!("source {} has a url but a wildcard filename", entry.id);
            }
            if entry.filename.matches('*').count() > 1 {
                bail!("source {} filename may contain at most one '*'", entry.id);
            }
            if entry.source.is_some() != entry.format.is_some() {
                bail!("source {} must set both `source` and `format`, or neither", entry.id);
            }
        }
        Ok(())
    }
}

impl SourceEntry {
    /// Source tag and cleaner format, for entries that feed the merge.
    pub fn cleaning(&self) -> Option<(Source, SourceFormat)> {
        self.source.zip(self.format)
    }

    /// Existing files under `data_dir` this entry refers to, sorted by name.
    pub fn resolve_files(&self, data_dir: &Path) -> Vec<PathBuf> {
        let Some((prefix, suffix)) = self.filename.split_once('*') else {
            let path = data_dir.join(&self.filename);
            return if path.is_file() { vec![path] } else { Vec::new() };
        };
        let Ok(entries) = std::fs::read_dir(data_dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
            .filter(|e| {
                let name = e.file_name();
                let name = name.to_string_lossy();
                name.len() >= prefix.len() + suffix.len()
                    && name.starts_with(prefix)
                    && name.ends_with(suffix)
            })
            .map(|e| e.path())
            .collect();
        files.sort();
        files
    }
}
