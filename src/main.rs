use anyhow::{Context, Result};
use clap::Parser;
use freqsev::{
    config::{Config, OutOfRange, PairSpec},
    explore::{self, sample, PairReport, Table},
    fetch::HttpFetcher,
    model::{ModelInputExport, PricingModel},
    pipeline::{self, CachePolicy, DatasetOutcome},
    render::{HistogramRenderer, TextRenderer},
};
use arrow::record_batch::RecordBatch;
use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    process::ExitCode,
};
use tokio::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Fetch the French MTPL frequency/severity datasets, cache them as Parquet
/// and reconcile each policy table with its claims.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// YAML configuration file (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ignore cached Parquet files and rebuild every dataset
    #[arg(long)]
    refresh: bool,

    /// Number of histogram bins
    #[arg(long)]
    bins: Option<usize>,

    /// Lower bound of the claim-amount histogram
    #[arg(long)]
    bin_min: Option<f64>,

    /// Upper bound of the claim-amount histogram
    #[arg(long)]
    bin_max: Option<f64>,

    /// Fold out-of-range amounts into the edge bins instead of excluding them
    #[arg(long)]
    clamp: bool,

    /// Write the pair reports as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Export model inputs (Parquet) for each pair into this directory
    #[arg(long)]
    model_dir: Option<PathBuf>,
}

impl Args {
    fn apply(&self, cfg: &mut Config) {
        cfg.refresh |= self.refresh;
        let h = &mut cfg.explore.histogram;
        if let Some(bins) = self.bins {
            h.bins = bins;
        }
        if let Some(min) = self.bin_min {
            h.bin_min = min;
        }
        if let Some(max) = self.bin_max {
            h.bin_max = max;
        }
        if self.clamp {
            h.out_of_range = OutOfRange::Clamp;
        }
    }
}

/// Explore, render and optionally export every configured pair. A failing
/// pair is logged and counted; the remaining pairs still run.
fn explore_pairs(
    cfg: &Config,
    outcomes: &[DatasetOutcome],
    model_dir: Option<&Path>,
) -> (Vec<PairReport>, usize) {
    let by_name: HashMap<&str, &DatasetOutcome> =
        outcomes.iter().map(|o| (o.name.as_str(), o)).collect();
    let mut reports: Vec<PairReport> = Vec::new();
    let mut failed = 0;
    for pair in &cfg.pairs {
        let (Some(policies), Some(claims)) = (
            by_name.get(pair.policies.as_str()).and_then(|o| o.batch()),
            by_name.get(pair.claims.as_str()).and_then(|o| o.batch()),
        ) else {
            warn!(policies = %pair.policies, claims = %pair.claims, "pair skipped, a dataset is missing");
            continue;
        };

        match explore::explore_pair(pair, policies, claims, &cfg.explore.histogram) {
            Ok(report) => {
                println!("\n{report}");
                reports.push(report);
            }
            Err(e) => {
                error!(policies = %pair.policies, claims = %pair.claims, "exploration failed: {e}");
                failed += 1;
                continue;
            }
        }

        if let Err(e) = finish_pair(cfg, pair, policies, claims, model_dir) {
            error!(policies = %pair.policies, claims = %pair.claims, "{e:#}");
            failed += 1;
        }
    }
    (reports, failed)
}

/// Draw the claim-amount histogram, then hand the pair to the model export.
fn finish_pair(
    cfg: &Config,
    pair: &PairSpec,
    policies: &RecordBatch,
    claims: &RecordBatch,
    model_dir: Option<&Path>,
) -> Result<()> {
    let h = &cfg.explore.histogram;
    let values = explore::amount_series(pair, claims)?;
    let mut renderer = TextRenderer::new(io::stdout().lock(), h.bins, h.out_of_range);
    renderer.render(&values, (h.bin_min, h.bin_max), &cfg.explore.render);

    if let Some(dir) = model_dir {
        let (p, c) = sample::model_inputs(
            Table::new(&pair.policies, policies),
            Table::new(&pair.claims, claims),
            &pair.key,
            cfg.explore.sample_size,
            cfg.explore.seed,
        )?;
        let mut model = ModelInputExport::new(dir, &pair.policies);
        model
            .fit(&p, &c)
            .with_context(|| format!("exporting model inputs for {}", pair.policies))?;
        info!(dir = %model.dir().display(), files = model.written().len(), "model inputs exported");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(io::stderr)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    // ─── 2) configuration ────────────────────────────────────────────
    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    args.apply(&mut cfg);
    cfg.validate().context("after applying command-line overrides")?;
    let descriptors = cfg.descriptors();
    info!(
        datasets = descriptors.len(),
        pairs = cfg.pairs.len(),
        store = %cfg.store_dir.display(),
        "startup"
    );

    // ─── 3) ingest every dataset ─────────────────────────────────────
    let start = Instant::now();
    let fetcher = HttpFetcher::new(&cfg.http)?;
    let outcomes = pipeline::run_batch(
        &fetcher,
        &descriptors,
        CachePolicy::from_refresh(cfg.refresh),
        cfg.max_concurrency,
    )
    .await;
    for outcome in &outcomes {
        println!("{outcome}");
    }
    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    info!(failed, elapsed = ?start.elapsed(), "ingestion finished");

    // ─── 4) explore each pair whose tables both loaded ───────────────
    let (reports, explore_failed) = explore_pairs(&cfg, &outcomes, args.model_dir.as_deref());

    // ─── 5) optional JSON report ─────────────────────────────────────
    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&reports)?;
        fs::write(path, json).with_context(|| format!("writing report {}", path.display()))?;
        info!(path = %path.display(), pairs = reports.len(), "report written");
    }

    if failed + explore_failed > 0 {
        return Ok(ExitCode::FAILURE);
    }
    info!("all done");
    Ok(ExitCode::SUCCESS)
}
