use std::path::PathBuf;
use std::time::Duration;

use ghg_storage::{HttpClientConfig, RetryPolicy};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub sources_file: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub download_attempts: usize,
    pub download_delay_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/raw"),
            output_dir: PathBuf::from("./data"),
            sources_file: PathBuf::from("./sources.yaml"),
            user_agent: default_user_agent(),
            http_timeout_secs: 60,
            download_attempts: 3,
            download_delay_secs: 2,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: env_path("GHG_DATA_DIR").unwrap_or(defaults.data_dir),
            output_dir: env_path("GHG_OUTPUT_DIR").unwrap_or(defaults.output_dir),
            sources_file: env_path("GHG_SOURCES_FILE").unwrap_or(defaults.sources_file),
            user_agent: std::env::var("GHG_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: env_parse("GHG_HTTP_TIMEOUT_SECS")
                .unwrap_or(defaults.http_timeout_secs),
            download_attempts: env_parse("GHG_DOWNLOAD_ATTEMPTS")
                .unwrap_or(defaults.download_attempts),
            download_delay_secs: env_parse("GHG_DOWNLOAD_DELAY_SECS")
                .unwrap_or(defaults.download_delay_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.download_attempts,
            delay: Duration::from_secs(self.download_delay_secs),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            retry: self.retry_policy(),
        }
    }
}

/// Which steps of a run execute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub download_only: bool,
    pub skip_download: bool,
    /// Re-download files that already exist.
    pub force: bool,
}

fn default_user_agent() -> String {
    format!("ghg-pipeline/{}", env!("CARGO_PKG_VERSION"))
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("./data/raw"));
        assert_eq!(config.output_dir, PathBuf::from("./data"));
        let retry = config.retry_policy();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.delay, Duration::from_secs(2));
        let http = config.http_client_config();
        assert_eq!(http.timeout, Duration::from_secs(60));
        assert!(http.user_agent.unwrap().starts_with("ghg-pipeline/"));
    }
}
