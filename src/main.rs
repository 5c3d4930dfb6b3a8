use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use healthai_etl::app::ports::{ExportPort, SourcePort};
use healthai_etl::app::{ProcessOutcome, ProcessUseCase};
use healthai_etl::config::AppConfig;
use healthai_etl::constants::DEFAULT_CONFIG_PATH;
use healthai_etl::infra::{CsvFileExporter, FileSource, HttpSource, JsonFileExporter, SqliteStore};
use healthai_etl::observability::{self, metrics};
use healthai_etl::pipeline::ingestion::SourceFormat;
use healthai_etl::RunStatistics;

#[derive(Parser)]
#[command(name = "healthai_etl")]
#[command(about = "Validate, normalize, enrich and deduplicate fitness datasets")]
#[command(version)]
struct Cli {
    /// Application config file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Write Prometheus metrics to this file when the command finishes
    #[arg(long)]
    metrics_out: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a domain's raw data through the pipeline and export the result
    Process {
        /// Domain to process, as named in config.toml
        #[arg(long, required_unless_present = "all", conflicts_with = "all")]
        domain: Option<String>,
        /// Process every configured domain concurrently
        #[arg(long)]
        all: bool,
        /// Raw input file, overriding the domain's configured file
        #[arg(long, conflicts_with = "all")]
        input: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Both)]
        format: OutputFormat,
    },
    /// Compile a domain's rules without processing any data
    Check {
        /// Domain to check; all configured domains when omitted
        #[arg(long)]
        domain: Option<String>,
    },
    /// Download a domain's remote snapshot into the raw data directory
    Fetch {
        #[arg(long)]
        domain: String,
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
    Both,
    Sqlite,
    All,
}

fn build_exporters(config: &AppConfig, format: OutputFormat) -> Result<Vec<Box<dyn ExportPort>>> {
    let dir = &config.paths.processed_dir;
    let mut exporters: Vec<Box<dyn ExportPort>> = Vec::new();
    if matches!(format, OutputFormat::Json | OutputFormat::Both | OutputFormat::All) {
        exporters.push(Box::new(JsonFileExporter::new(dir)));
    }
    if matches!(format, OutputFormat::Csv | OutputFormat::Both | OutputFormat::All) {
        exporters.push(Box::new(CsvFileExporter::new(dir)));
    }
    if matches!(format, OutputFormat::Sqlite | OutputFormat::All) {
        let store = SqliteStore::open(&config.paths.database)
            .with_context(|| format!("Failed to open database {}", config.paths.database.display()))?;
        exporters.push(Box::new(store));
    }
    Ok(exporters)
}

async fn process_domain(
    config: Arc<AppConfig>,
    name: String,
    input: Option<PathBuf>,
    format: OutputFormat,
) -> Result<ProcessOutcome> {
    let domain = config.load_domain(&name)?;
    let pipeline = Arc::new(domain.build_pipeline(&name)?);
    let path = input
        .or_else(|| config.raw_path(&domain))
        .ok_or_else(|| anyhow!("Domain '{}' has no source file; pass --input", name))?;

    let source: Box<dyn SourcePort> = Box::new(FileSource::new(path, &domain.source.origin));
    let exporters = build_exporters(&config, format)?;
    ProcessUseCase::new(pipeline, source, domain.source.clone(), exporters)
        .execute()
        .await
}

fn print_outcome(outcome: &ProcessOutcome) {
    let stats = &outcome.stats;
    println!("\n📊 Results for {} ({}):", stats.domain, stats.origin);
    println!("   Total records: {}", stats.total);
    println!("   Accepted: {}", stats.accepted);
    println!("   Accepted with defaults: {}", stats.accepted_with_default);
    println!("   Rejected: {}", stats.rejected);
    println!("   Duplicates removed: {}", stats.duplicates_removed);
    println!("   Output records: {}", stats.output);
    for (field, n) in &stats.defaults_by_field {
        println!("   Default applied to '{}': {}", field, n);
    }
    for (reason, n) in &stats.rejections_by_reason {
        println!("   Rejected ({}): {}", reason, n);
    }
    for export in &outcome.exports {
        println!(
            "   {} → {} ({} written, {} unchanged)",
            export.format, export.target, export.written, export.unchanged
        );
    }
}

async fn run_process(
    config: Arc<AppConfig>,
    domain: Option<String>,
    all: bool,
    input: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    if !all {
        let name = domain.ok_or_else(|| anyhow!("--domain is required"))?;
        let outcome = process_domain(config, name, input, format).await?;
        print_outcome(&outcome);
        return Ok(());
    }

    let names = config.domain_names();
    if names.is_empty() {
        return Err(anyhow!("No domains configured"));
    }

    let handles: Vec<_> = names
        .into_iter()
        .map(|name| {
            let config = Arc::clone(&config);
            let task_name = name.clone();
            (name, tokio::spawn(process_domain(config, task_name, None, format)))
        })
        .collect();

    let mut combined: Option<RunStatistics> = None;
    let mut failures = 0;
    for (name, handle) in handles {
        match handle.await {
            Ok(Ok(outcome)) => {
                print_outcome(&outcome);
                match combined.as_mut() {
                    Some(total) => total.merge(&outcome.stats),
                    None => combined = Some(outcome.stats),
                }
            }
            Ok(Err(e)) => {
                failures += 1;
                error!("Domain '{}' failed: {:#}", name, e);
                println!("❌ {} failed: {:#}", name, e);
            }
            Err(e) => {
                failures += 1;
                error!("Domain '{}' task panicked: {}", name, e);
            }
        }
    }

    if let Some(total) = combined {
        println!(
            "\n✅ All domains: {} records in, {} out ({} rejected, {} duplicates)",
            total.total, total.output, total.rejected, total.duplicates_removed
        );
    }
    if failures > 0 {
        return Err(anyhow!("{} domain(s) failed", failures));
    }
    Ok(())
}

fn run_check(config: &AppConfig, domain: Option<String>) -> Result<()> {
    let names = match domain {
        Some(name) => vec![name],
        None => config.domain_names(),
    };
    for name in names {
        let domain = config.load_domain(&name)?;
        let pipeline = domain
            .build_pipeline(&name)
            .with_context(|| format!("Domain '{}' has invalid rules", name))?;
        let key = pipeline
            .primary_key()
            .map(|k| k.fields().join(", "))
            .unwrap_or_else(|| "none".to_string());
        println!(
            "✅ {}: {} fields, {} enrichment rules, primary key [{}]",
            name,
            domain.fields.len(),
            domain.enrich.len(),
            key
        );
    }
    Ok(())
}

async fn run_fetch(config: &AppConfig, name: &str, timeout_secs: u64) -> Result<()> {
    let domain = config.load_domain(name)?;
    let url = domain
        .source
        .url
        .as_deref()
        .ok_or_else(|| anyhow!("Domain '{}' has no source url", name))?;

    let source = HttpSource::new(url, &domain.source.origin, Duration::from_secs(timeout_secs))?;
    info!("Fetching {}", source.describe());
    let payload = source.read().await?;

    let extension = match domain.source.format {
        SourceFormat::Json => "json",
        SourceFormat::Csv => "csv",
    };
    tokio::fs::create_dir_all(&config.paths.raw_dir).await?;
    let path = config.paths.raw_dir.join(format!(
        "{}_{}.{}",
        name,
        payload.fetched_at.format("%Y%m%d_%H%M%S"),
        extension
    ));
    tokio::fs::write(&path, &payload.bytes).await?;
    metrics::sources::load_success(&domain.source.origin, payload.bytes.len());
    println!("📥 Saved {} bytes to {}", payload.bytes.len(), path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_with(&cli.config)?;

    let _guard = observability::init_logging(&config.paths.log_dir, &config.logging.filter_directive())
        .context("Failed to initialize logging")?;
    if let Err(e) = metrics::init() {
        error!("{}", e);
    }

    let config = Arc::new(config);
    let result = match cli.command {
        Commands::Process {
            domain,
            all,
            input,
            format,
        } => run_process(Arc::clone(&config), domain, all, input, format).await,
        Commands::Check { domain } => run_check(&config, domain),
        Commands::Fetch { domain, timeout_secs } => run_fetch(&config, &domain, timeout_secs).await,
    };

    if let Some(path) = cli.metrics_out {
        if let Some(text) = metrics::render() {
            std::fs::write(&path, text).with_context(|| format!("Failed to write metrics to {}", path.display()))?;
        }
    }
    result
}
