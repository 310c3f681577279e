use std::{fs::File, path::PathBuf, sync::Mutex};

use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, NaiveDateTime};
use clap::Parser;
use price_sync::{EngineOptions, OutputPaths, RunRequest, sync_to_files};
use stream_ingestor::{
    ProductCatalog, ProductSelection, StreamConfig,
    providers::stream_rest::provider::StreamProvider,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Sync market price series into wide and spot-price CSV files")]
struct Cli {
    /// Client configuration (TOML).
    #[arg(long, value_name = "FILE")]
    config: PathBuf,
    /// Market code or alias, e.g. `caiso`, `iso-ne`.
    #[arg(long)]
    market: String,
    /// Location name or identifier; repeat for several.
    #[arg(long = "location", required = true)]
    locations: Vec<String>,
    /// `all`, `energy`, `energy_da` or a comma-separated product list.
    #[arg(long, default_value = "all")]
    products: ProductSelection,
    /// Range start: `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` or `MM/DD/YYYY`.
    #[arg(long, value_parser = parse_datetime)]
    start: NaiveDateTime,
    /// Range end, exclusive.
    #[arg(long, value_parser = parse_datetime)]
    end: NaiveDateTime,
    #[arg(long, value_name = "DIR", default_value = ".")]
    wide_dir: PathBuf,
    #[arg(long, value_name = "FILE")]
    spot_output: Option<PathBuf>,
    /// SPOTPRICEID lookup table.
    #[arg(long, value_name = "FILE")]
    spot_map: Option<PathBuf>,
    /// Composite-key column of the lookup table; detected when omitted.
    #[arg(long)]
    spot_key_column: Option<String>,
    /// Spot-price CSV reused across runs; needs --spot-map.
    #[arg(long, value_name = "FILE")]
    cache: Option<PathBuf>,
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
    /// Fail when a location has no real-time energy prices.
    #[arg(long)]
    require_energy: bool,
    /// Force the service-side cache flag instead of deriving it per batch.
    #[arg(long)]
    use_cache: Option<bool>,
}

fn parse_datetime(raw: &str) -> Result<NaiveDateTime, String> {
    let raw = raw.trim();
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(ts);
    }
    ["%Y-%m-%d", "%m/%d/%Y"]
        .iter()
        .find_map(|fmt| {
            NaiveDate::parse_from_str(raw, fmt)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| format!("unrecognized date {raw:?}"))
}

fn init_tracing(log_file: Option<&PathBuf>) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("create log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_ref())?;

    let cfg = StreamConfig::from_path(&cli.config)
        .with_context(|| format!("load config {}", cli.config.display()))?;
    let catalog = match &cfg.catalog_path {
        Some(path) => ProductCatalog::from_path(path)?,
        None => ProductCatalog::builtin()?,
    };
    let provider = StreamProvider::from_config(&cfg).context("build market-data client")?;

    let req = RunRequest {
        market: cli.market,
        locations: cli.locations,
        selection: cli.products,
        start: cli.start,
        end: cli.end,
        require_energy: cli.require_energy,
        use_cache: cli.use_cache,
    };
    let paths = OutputPaths {
        wide_dir: cli.wide_dir,
        spot_output: cli.spot_output,
        spot_map: cli.spot_map,
        spot_key_column: cli.spot_key_column,
        cache: cli.cache,
    };
    let now = chrono::Local::now().naive_local();

    match sync_to_files(
        &provider,
        &catalog,
        EngineOptions::from(&cfg),
        &paths,
        &req,
        now,
    )
    .await
    {
        Ok(summary) => {
            info!(
                files = summary.wide_files.len(),
                spot_rows = summary.spot_rows,
                fetched = summary.fetched,
                "done"
            );
            Ok(())
        }
        Err(e) => bail!("price sync failed: {e}"),
    }
}
