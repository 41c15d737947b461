use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ghg_pipeline::{Pipeline, PipelineConfig, RunOptions};
use ghg_web::WebConfig;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "ghg-cli", version)]
#[command(about = "Global emissions data pipeline and API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download, clean, merge and persist the emissions dataset.
    Run {
        #[arg(long, conflicts_with = "skip_download")]
        download_only: bool,
        #[arg(long)]
        skip_download: bool,
        /// Re-download raw files that already exist.
        #[arg(long)]
        force: bool,
        /// Raw source files (GHG_DATA_DIR).
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Processed outputs (GHG_OUTPUT_DIR).
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Serve the processed dataset over HTTP.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Directory holding the processed outputs.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Print a report of the last persisted run.
    Summary {
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run {
        download_only: false,
        skip_download: false,
        force: false,
        data_dir: None,
        output_dir: None,
    }) {
        Commands::Run {
            download_only,
            skip_download,
            force,
            data_dir,
            output_dir,
        } => {
            let mut config = PipelineConfig::from_env();
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            if let Some(dir) = output_dir {
                config.output_dir = dir;
            }
            let summary = Pipeline::new(config)?
                .run_once(RunOptions {
                    download_only,
                    skip_download,
                    force,
                })
                .await?;
            if let Some(downloads) = summary.downloads.as_ref().filter(|_| download_only) {
                println!(
                    "download complete: downloaded={} skipped={} failed={}",
                    downloads.downloaded.len(),
                    downloads.skipped.len(),
                    downloads.failed.len()
                );
                return Ok(());
            }
            let years = summary
                .year_range
                .map(|(min, max)| format!("{min}-{max}"))
                .unwrap_or_else(|| "n/a".to_string());
            println!(
                "run complete: run_id={} records={} countries={} years={} output={}",
                summary.run_id, summary.merged_records, summary.countries, years, summary.output_dir
            );
        }
        Commands::Serve {
            host,
            port,
            data_dir,
        } => {
            let mut config = WebConfig::from_env();
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(dir) = data_dir {
                config.output_dir = dir;
            }
            info!(host = %config.host, port = config.port, "starting API server");
            ghg_web::serve(config).await?;
        }
        Commands::Summary { output_dir } => {
            print!("{}", ghg_pipeline::summary_markdown(output_dir)?);
        }
    }

    Ok(())
}
