use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kira_accession_resolver::cache::CacheStore;
use kira_accession_resolver::config::ConfigLoader;
use kira_accession_resolver::error::KiraError;
use kira_accession_resolver::output::{OutputFormat, write_resolution};
use kira_accession_resolver::scheduler::Resolver;

#[derive(Parser)]
#[command(name = "kira-resolve")]
#[command(about = "Resolve SRA/ENA accessions to BioProject and GEO/ArrayExpress ids")]
#[command(version, author)]
struct Cli {
    /// Accessions to resolve (SRP, SRX, ERP, ERX).
    accessions: Vec<String>,

    /// File with one accession per line; blank lines and `#` comments are skipped.
    #[arg(long)]
    input: Option<PathBuf>,

    #[arg(long)]
    config: Option<String>,

    #[arg(long, conflicts_with = "no_cache")]
    cache_file: Option<Utf8PathBuf>,

    #[arg(long)]
    no_cache: bool,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    max_workers: Option<usize>,

    /// Seconds between batches.
    #[arg(long)]
    delay: Option<f64>,

    #[arg(long)]
    max_retries: Option<u32>,

    /// Seconds before each retry round.
    #[arg(long)]
    retry_delay: Option<f64>,

    /// Falls back to `NCBI_API_KEY`.
    #[arg(long)]
    api_key: Option<String>,

    /// Re-attempt accessions cached with an empty result.
    #[arg(long)]
    refresh_misses: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::InvalidConfig(_)
        | KiraError::InputRead(_)
        | KiraError::InvalidAccession(_) => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut raw = ConfigLoader::load(cli.config.as_deref())?;
    if cli.batch_size.is_some() {
        raw.batch_size = cli.batch_size;
    }
    if cli.max_workers.is_some() {
        raw.max_workers = cli.max_workers;
    }
    if cli.delay.is_some() {
        raw.delay_between_batches = cli.delay;
    }
    if cli.max_retries.is_some() {
        raw.max_retries = cli.max_retries;
    }
    if cli.retry_delay.is_some() {
        raw.retry_delay = cli.retry_delay;
    }
    if cli.api_key.is_some() {
        raw.api_key = cli.api_key.clone();
    }
    if cli.refresh_misses {
        raw.refresh_cached_misses = Some(true);
    }
    let mut config = ConfigLoader::resolve_config(raw)?;

    config.cache_file = if cli.no_cache {
        None
    } else if let Some(path) = cli.cache_file.clone() {
        Some(path)
    } else {
        match config.cache_file.take() {
            Some(path) => Some(path),
            None => Some(CacheStore::default_path()?),
        }
    };

    let mut accessions = cli.accessions.clone();
    if let Some(path) = &cli.input {
        accessions.extend(read_accession_list(path)?);
    }
    if accessions.is_empty() {
        return Err(KiraError::InvalidAccession(
            "no accessions given; pass them as arguments or with --input".to_string(),
        )
        .into());
    }

    let resolver = Resolver::from_config(config)?;
    let started = std::time::Instant::now();
    let resolution = resolver.resolve(&accessions, &|count: usize| {
        info!(processed = count, "progress");
    });
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "done");

    let mut stdout = io::stdout().lock();
    write_resolution(&mut stdout, &resolution, cli.format).into_diagnostic()?;
    Ok(())
}

fn read_accession_list(path: &Path) -> Result<Vec<String>, KiraError> {
    let content = fs::read_to_string(path).map_err(|_| KiraError::InputRead(path.to_path_buf()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
